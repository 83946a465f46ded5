// ============================================================
// Layer 5 — Optimal-Transport Layer Matcher
// ============================================================
// Many-to-many matching between student and teacher layers,
// as an Earth Mover's Distance problem:
//
//   d[i,j]  = MSE(student layer i, teacher layer j)   on device
//   flow    = entropic OT plan with marginals (w_s, w_t)  on host
//   loss    = Σ_ij flow[i,j] · d[i,j]                  on device
//
// The plan is solved with Sinkhorn iterations over the cost
// matrix normalised by its largest entry, so epsilon is relative
// to the scale of the distances.
//
// Layer weights start uniform and are only changed through
// update_weight, which moves weight toward layers whose
// transport cost is low:
//
//   c_i = Σ_j flow[i,j] · d[i,j] / w_i
//   w_i = Σ_k c_k / c_i            (c_i ≠ 0)
//   w   = softmax(w / T)
//
// and the same over columns for the teacher.

use burn::{prelude::*, tensor::TensorData};
use ndarray::{Array1, Array2, Axis};

use crate::domain::error::{DistillError, DistillResult};
use crate::ml::attention::AttentionStack;

/// Result of one matching call. `flow` and `distance` are host copies,
/// [student_layers, teacher_layers].
#[derive(Debug, Clone)]
pub struct TransportOutcome<B: Backend> {
    pub loss:     Tensor<B, 1>,
    pub flow:     Array2<f64>,
    pub distance: Array2<f64>,
}

pub trait LayerMatcher<B: Backend> {
    fn loss(
        &self,
        student: &AttentionStack<B>,
        teacher: &AttentionStack<B>,
    ) -> DistillResult<TransportOutcome<B>>;

    fn update_weight(&mut self, flow: &Array2<f64>, distance: &Array2<f64>);
}

#[derive(Debug, Clone, Copy)]
pub struct EmdConfig {
    /// Entropic regularisation, relative to the largest distance.
    pub epsilon:        f64,
    pub max_iterations: usize,
    /// Stop once both marginals are within this of their targets.
    pub tolerance:      f64,
    /// Softmax temperature of the weight update.
    pub temperature:    f64,
}

impl Default for EmdConfig {
    fn default() -> Self {
        Self {
            epsilon:        0.05,
            max_iterations: 1000,
            tolerance:      1e-9,
            temperature:    1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmdMatcher {
    config:         EmdConfig,
    student_weight: Array1<f64>,
    teacher_weight: Array1<f64>,
}

impl EmdMatcher {
    pub fn new(student_layers: usize, teacher_layers: usize) -> DistillResult<Self> {
        Self::with_config(student_layers, teacher_layers, EmdConfig::default())
    }

    pub fn with_config(
        student_layers: usize,
        teacher_layers: usize,
        config:         EmdConfig,
    ) -> DistillResult<Self> {
        if student_layers == 0 || teacher_layers == 0 {
            return Err(DistillError::config(format!(
                "layer matching needs at least one layer per side, got {student_layers} student / {teacher_layers} teacher"
            )));
        }
        if config.epsilon <= 0.0 || config.temperature <= 0.0 {
            return Err(DistillError::config("EMD epsilon and temperature must be positive"));
        }
        Ok(Self {
            config,
            student_weight: uniform(student_layers),
            teacher_weight: uniform(teacher_layers),
        })
    }

    #[cfg(test)]
    pub fn student_weight(&self) -> &Array1<f64> {
        &self.student_weight
    }

    #[cfg(test)]
    pub fn teacher_weight(&self) -> &Array1<f64> {
        &self.teacher_weight
    }

    fn check_counts<B: Backend>(
        &self,
        student: &AttentionStack<B>,
        teacher: &AttentionStack<B>,
    ) -> DistillResult<()> {
        let expected = (self.student_weight.len(), self.teacher_weight.len());
        let found    = (student.len(), teacher.len());
        if expected != found {
            return Err(DistillError::config(format!(
                "matcher built for {}x{} layers but got {}x{}",
                expected.0, expected.1, found.0, found.1
            )));
        }
        Ok(())
    }

    /// Entropic transport plan between the current weights for `cost`.
    fn plan(&self, cost: &Array2<f64>) -> Array2<f64> {
        let scale = cost.iter().cloned().fold(0.0f64, f64::max);
        let scale = if scale > 0.0 { scale } else { 1.0 };
        let kernel = cost.mapv(|c| (-(c / scale) / self.config.epsilon).exp());

        let a = &self.student_weight;
        let b = &self.teacher_weight;
        let mut u = Array1::<f64>::ones(a.len());
        let mut v = Array1::<f64>::ones(b.len());

        for _ in 0..self.config.max_iterations {
            let kv = kernel.dot(&v);
            u = a / &kv.mapv(|x| x.max(f64::MIN_POSITIVE));
            let ktu = kernel.t().dot(&u);
            v = b / &ktu.mapv(|x| x.max(f64::MIN_POSITIVE));

            let flow = transport(&kernel, &u, &v);
            let row_err = max_abs_diff(&flow.sum_axis(Axis(1)), a);
            let col_err = max_abs_diff(&flow.sum_axis(Axis(0)), b);
            if row_err < self.config.tolerance && col_err < self.config.tolerance {
                return flow;
            }
        }
        transport(&kernel, &u, &v)
    }
}

impl<B: Backend> LayerMatcher<B> for EmdMatcher {
    fn loss(
        &self,
        student: &AttentionStack<B>,
        teacher: &AttentionStack<B>,
    ) -> DistillResult<TransportOutcome<B>> {
        if student.is_empty() || teacher.is_empty() {
            return Err(DistillError::config("nothing to match: a layer stack is empty"));
        }
        self.check_counts(student, teacher)?;

        let pairs = match (student, teacher) {
            (AttentionStack::Merged(s), AttentionStack::Merged(t))   => pairwise_mse(s, t)?,
            (AttentionStack::PerHead(s), AttentionStack::PerHead(t)) => pairwise_mse(s, t)?,
            _ => {
                return Err(DistillError::config(
                    "student and teacher expose different representation layouts",
                ))
            }
        };
        let (rows, cols) = (student.len(), teacher.len());
        let distances = Tensor::cat(pairs, 0);
        let device    = distances.device();

        // One device→host transfer for the whole matrix.
        let host: Vec<f64> = distances
            .clone()
            .into_data()
            .convert::<f64>()
            .to_vec()
            .map_err(|e| DistillError::config(format!("distance readback failed: {e:?}")))?;
        let distance = Array2::from_shape_vec((rows, cols), host)
            .map_err(|e| DistillError::config(e.to_string()))?;
        let flow = self.plan(&distance);

        let flow_values: Vec<f32> = flow.iter().map(|&f| f as f32).collect();
        let flow_tensor = Tensor::<B, 1>::from_data(TensorData::new(flow_values, [rows * cols]), &device);
        let loss = (distances * flow_tensor).sum();

        Ok(TransportOutcome { loss, flow, distance })
    }

    fn update_weight(&mut self, flow: &Array2<f64>, distance: &Array2<f64>) {
        let cost = flow * distance;
        if !cost.iter().all(|c| c.is_finite()) {
            tracing::warn!("EMD weights kept: transport cost is not finite");
            return;
        }
        let student_cost = cost.sum_axis(Axis(1));
        let teacher_cost = cost.sum_axis(Axis(0));
        self.student_weight = reweight(&self.student_weight, &student_cost, self.config.temperature);
        self.teacher_weight = reweight(&self.teacher_weight, &teacher_cost, self.config.temperature);
        tracing::debug!(
            "EMD weights: student {:?} teacher {:?}",
            self.student_weight.as_slice(),
            self.teacher_weight.as_slice()
        );
    }
}

fn uniform(n: usize) -> Array1<f64> {
    Array1::from_elem(n, 1.0 / n as f64)
}

fn transport(kernel: &Array2<f64>, u: &Array1<f64>, v: &Array1<f64>) -> Array2<f64> {
    let mut flow = kernel.clone();
    for ((i, j), f) in flow.indexed_iter_mut() {
        *f *= u[i] * v[j];
    }
    flow
}

fn max_abs_diff(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}

fn reweight(weight: &Array1<f64>, layer_cost: &Array1<f64>, temperature: f64) -> Array1<f64> {
    let per_weight: Array1<f64> = layer_cost
        .iter()
        .zip(weight.iter())
        .map(|(&c, &w)| if w > 0.0 { c / w } else { 0.0 })
        .collect();
    let total: f64 = per_weight.sum();
    let inverted = per_weight.mapv(|c| if c != 0.0 { total / c } else { 0.0 });
    softmax(&inverted.mapv(|w| w / temperature))
}

fn softmax(x: &Array1<f64>) -> Array1<f64> {
    let max = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exp = x.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

fn pairwise_mse<B: Backend, const D: usize>(
    student: &[Tensor<B, D>],
    teacher: &[Tensor<B, D>],
) -> DistillResult<Vec<Tensor<B, 1>>> {
    let mut pairs = Vec::with_capacity(student.len() * teacher.len());
    for (i, s) in student.iter().enumerate() {
        for (j, t) in teacher.iter().enumerate() {
            if s.dims() != t.dims() {
                return Err(DistillError::config(format!(
                    "student layer {i} {:?} cannot be matched with teacher layer {j} {:?}",
                    s.dims(),
                    t.dims()
                )));
            }
            pairs.push((s.clone() - t.clone()).powf_scalar(2.0).mean());
        }
    }
    Ok(pairs)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray;

    fn constant_stack(values: &[f32]) -> AttentionStack<TB> {
        let device = Default::default();
        AttentionStack::Merged(
            values.iter().map(|&v| Tensor::<TB, 3>::full([1, 2, 2], v, &device)).collect(),
        )
    }

    fn scalar(t: Tensor<TB, 1>) -> f64 {
        t.into_scalar() as f64
    }

    #[test]
    fn test_plan_marginals_match_weights() {
        let matcher = EmdMatcher::new(2, 3).unwrap();
        let out = LayerMatcher::<TB>::loss(&matcher, &constant_stack(&[0.0, 1.0]), &constant_stack(&[0.1, 0.5, 2.0])).unwrap();

        assert_eq!(out.flow.dim(), (2, 3));
        assert!(out.flow.iter().all(|&f| f >= 0.0));
        for row in out.flow.sum_axis(Axis(1)).iter() {
            assert!((row - 0.5).abs() < 1e-6);
        }
        for col in out.flow.sum_axis(Axis(0)).iter() {
            assert!((col - 1.0 / 3.0).abs() < 1e-6);
        }
        assert!((out.distance[[1, 2]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_loss_is_flow_weighted_distance() {
        let matcher = EmdMatcher::new(2, 2).unwrap();
        let out = LayerMatcher::<TB>::loss(&matcher, &constant_stack(&[0.0, 1.0]), &constant_stack(&[0.2, 3.0])).unwrap();
        let expected: f64 = (&out.flow * &out.distance).sum();
        let loss = scalar(out.loss);
        assert!((loss - expected).abs() < 1e-4, "{loss} vs {expected}");
        // Cheap diagonal pairing dominates: 0.5·0.04 + 0.5·4
        assert!((loss - 2.02).abs() < 1e-2);
    }

    #[test]
    fn test_frozen_weights_give_identical_loss() {
        let matcher = EmdMatcher::new(2, 2).unwrap();
        let (s, t) = (constant_stack(&[0.0, 1.0]), constant_stack(&[0.2, 3.0]));
        let first  = scalar(LayerMatcher::<TB>::loss(&matcher, &s, &t).unwrap().loss);
        let second = scalar(LayerMatcher::<TB>::loss(&matcher, &s, &t).unwrap().loss);
        assert_eq!(first, second);
    }

    #[test]
    fn test_weight_update_changes_loss() {
        let mut matcher = EmdMatcher::new(2, 2).unwrap();
        let (s, t) = (constant_stack(&[0.0, 1.0]), constant_stack(&[0.2, 3.0]));
        let before = LayerMatcher::<TB>::loss(&matcher, &s, &t).unwrap();
        LayerMatcher::<TB>::update_weight(&mut matcher, &before.flow, &before.distance);
        let after = scalar(LayerMatcher::<TB>::loss(&matcher, &s, &t).unwrap().loss);

        assert!((scalar(before.loss) - after).abs() > 1e-3);
        // The cheaply matched first layers take almost all the weight.
        assert!(matcher.student_weight()[0] > 0.99);
        assert!(matcher.teacher_weight()[0] > 0.99);
        assert!((matcher.student_weight().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_layer_count_mismatch_is_configuration_error() {
        let matcher = EmdMatcher::new(3, 2).unwrap();
        let err = LayerMatcher::<TB>::loss(&matcher, &constant_stack(&[0.0, 1.0]), &constant_stack(&[0.2, 3.0])).unwrap_err();
        assert!(matches!(err, DistillError::Configuration(_)));
    }

    #[test]
    fn test_shape_mismatch_is_configuration_error() {
        let matcher = EmdMatcher::new(1, 1).unwrap();
        let device = Default::default();
        let s = AttentionStack::Merged(vec![Tensor::<TB, 3>::zeros([1, 2, 2], &device)]);
        let t = AttentionStack::Merged(vec![Tensor::<TB, 3>::zeros([1, 2, 4], &device)]);
        assert!(matches!(
            LayerMatcher::<TB>::loss(&matcher, &s, &t),
            Err(DistillError::Configuration(_))
        ));
    }

    #[test]
    fn test_non_finite_cost_keeps_weights() {
        let mut matcher = EmdMatcher::new(2, 2).unwrap();
        let flow = Array2::from_elem((2, 2), 0.25);
        let mut distance = Array2::from_elem((2, 2), 1.0);
        distance[[0, 1]] = f64::NAN;

        LayerMatcher::<TB>::update_weight(&mut matcher, &flow, &distance);
        assert_eq!(matcher.student_weight().to_vec(), vec![0.5, 0.5]);
        assert_eq!(matcher.teacher_weight().to_vec(), vec![0.5, 0.5]);
    }
}
