// ============================================================
// Layer 5 — Training Mode and Composite Loss
// ============================================================
// The flag combination (use_kd, use_emd, hidn2attn, update_emd)
// is resolved once at setup into a TrainingMode:
//
//   Supervised                 task loss only
//   Distill { transfer: None } KD blend against teacher logits
//   Distill { transfer: Some } KD blend, plus layer matching on
//                              hidden states or attention maps
//
// CompositeLoss binds that mode to a layer matcher and turns one
// step's student/teacher outputs into the loss to backpropagate.
//
// The matching loss is Detached by default: it is computed (and
// may drive the weight update) but does not reach the gradient.
// TransportGradient::Additive adds rate · matching loss instead.

use burn::{prelude::*, tensor::ElementConversion};

use crate::application::train_use_case::TrainConfig;
use crate::domain::error::{DistillError, DistillResult};
use crate::domain::task::OutputMode;
use crate::ml::attention::to_attention;
use crate::ml::emd::LayerMatcher;
use crate::ml::loss::{task_loss, KdLoss};
use crate::ml::network::{LayerStack, NetworkOutput};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportGradient {
    Detached,
    Additive { rate: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepresentationPipeline {
    /// Match raw hidden states
    Hidden,
    /// Convert hidden states to attention maps first
    Attention,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferMode {
    pub pipeline:        RepresentationPipeline,
    pub weight_feedback: bool,
    pub gradient:        TransportGradient,
}

#[derive(Debug, Clone, Copy)]
pub enum TrainingMode {
    Supervised,
    Distill {
        kd:       KdLoss,
        transfer: Option<TransferMode>,
    },
}

impl TrainingMode {
    pub fn resolve(cfg: &TrainConfig) -> Self {
        if !cfg.use_kd {
            if cfg.use_emd {
                tracing::warn!("use_emd needs use_kd; layer matching is disabled for this run");
            }
            return Self::Supervised;
        }
        let transfer = cfg.use_emd.then(|| TransferMode {
            pipeline: if cfg.hidn2attn {
                RepresentationPipeline::Attention
            } else {
                RepresentationPipeline::Hidden
            },
            weight_feedback: cfg.update_emd,
            gradient: match cfg.emd_rate {
                Some(rate) => TransportGradient::Additive { rate },
                None       => TransportGradient::Detached,
            },
        });
        Self::Distill {
            kd: KdLoss::new(cfg.kd_alpha, cfg.kd_temperature),
            transfer,
        }
    }

    pub fn needs_teacher(&self) -> bool {
        matches!(self, Self::Distill { .. })
    }

    pub fn transfer(&self) -> Option<TransferMode> {
        match self {
            Self::Distill { transfer, .. } => *transfer,
            Self::Supervised => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Supervised => "supervised".to_string(),
            Self::Distill { kd, transfer: None } => {
                format!("kd (alpha={}, T={})", kd.alpha, kd.temperature)
            }
            Self::Distill { kd, transfer: Some(t) } => format!(
                "kd (alpha={}, T={}) + emd on {:?}, feedback={}, gradient={:?}",
                kd.alpha, kd.temperature, t.pipeline, t.weight_feedback, t.gradient
            ),
        }
    }
}

/// Loss of one step plus what the trainer logs about it.
#[derive(Debug, Clone)]
pub struct AssembledLoss<B: Backend> {
    pub loss:            Tensor<B, 1>,
    pub transport_loss:  Option<f64>,
    pub weights_updated: bool,
}

pub struct CompositeLoss<B: Backend> {
    mode:        TrainingMode,
    output_mode: OutputMode,
    matcher:     Option<Box<dyn LayerMatcher<B>>>,
}

impl<B: Backend> CompositeLoss<B> {
    pub fn new(
        mode:        TrainingMode,
        output_mode: OutputMode,
        matcher:     Option<Box<dyn LayerMatcher<B>>>,
    ) -> DistillResult<Self> {
        if mode.transfer().is_some() && matcher.is_none() {
            return Err(DistillError::config("layer transfer is enabled but no matcher was built"));
        }
        Ok(Self { mode, output_mode, matcher })
    }

    pub fn mode(&self) -> &TrainingMode {
        &self.mode
    }

    /// `mask` is the batch attention mask as floats, used when
    /// representations are converted to attention maps.
    ///
    /// A non-finite KD or transport loss fails with `NumericInstability`
    /// before the matcher's weights are touched, so a skipped step leaves
    /// the layer weights as they were.
    pub fn assemble(
        &mut self,
        student: &NetworkOutput<B>,
        teacher: Option<&NetworkOutput<B>>,
        labels:  Tensor<B, 1>,
        mask:    Tensor<B, 2>,
        step:    usize,
    ) -> DistillResult<AssembledLoss<B>> {
        let (kd, transfer) = match self.mode {
            TrainingMode::Supervised => {
                return Ok(AssembledLoss {
                    loss:            task_loss(student.logits.clone(), labels, self.output_mode),
                    transport_loss:  None,
                    weights_updated: false,
                });
            }
            TrainingMode::Distill { kd, transfer } => (kd, transfer),
        };

        let teacher = teacher
            .ok_or_else(|| DistillError::config("distillation is enabled but no teacher output was given"))?;
        if teacher.logits.dims() != student.logits.dims() {
            return Err(DistillError::config(format!(
                "teacher logits {:?} do not match student logits {:?}",
                teacher.logits.dims(),
                student.logits.dims()
            )));
        }
        let kd_terms = kd.forward(
            student.logits.clone(),
            teacher.logits.clone(),
            labels,
            self.output_mode,
        );
        tracing::trace!(
            "step {step}: kd soft {:.6} hard {:.6}",
            kd_terms.soft.clone().into_scalar().elem::<f64>(),
            kd_terms.hard.clone().into_scalar().elem::<f64>(),
        );

        let Some(transfer) = transfer else {
            return Ok(AssembledLoss { loss: kd_terms.total, transport_loss: None, weights_updated: false });
        };

        let student_layers = layers_of(student, "student")?;
        let teacher_layers = layers_of(teacher, "teacher")?;
        let (s_maps, t_maps) = match transfer.pipeline {
            RepresentationPipeline::Attention => (
                to_attention(student_layers, mask.clone()),
                to_attention(teacher_layers, mask),
            ),
            RepresentationPipeline::Hidden => (student_layers.into_stacked(), teacher_layers.into_stacked()),
        };

        let matcher = self
            .matcher
            .as_mut()
            .ok_or_else(|| DistillError::config("layer transfer is enabled but no matcher was built"))?;
        let outcome = matcher.loss(&s_maps, &t_maps)?;
        let transport_value: f64 = outcome.loss.clone().into_scalar().elem();
        let kd_value: f64 = kd_terms.total.clone().into_scalar().elem();
        for value in [kd_value, transport_value] {
            if !value.is_finite() {
                return Err(DistillError::NumericInstability { step, value });
            }
        }

        if transfer.weight_feedback {
            matcher.update_weight(&outcome.flow, &outcome.distance);
        }

        let loss = match transfer.gradient {
            TransportGradient::Detached          => kd_terms.total,
            TransportGradient::Additive { rate } => kd_terms.total + outcome.loss.mul_scalar(rate),
        };
        Ok(AssembledLoss {
            loss,
            transport_loss:  Some(transport_value),
            weights_updated: transfer.weight_feedback,
        })
    }
}

fn layers_of<B: Backend>(output: &NetworkOutput<B>, side: &str) -> DistillResult<LayerStack<B>> {
    match &output.layers {
        Some(stack) if !stack.is_empty() => Ok(stack.clone()),
        Some(_) => Err(DistillError::config(format!("{side} exposed an empty layer stack"))),
        None    => Err(DistillError::config(format!("layer transfer needs {side} representations"))),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;
    use crate::ml::emd::EmdMatcher;

    type TB = NdArray;

    fn output(logits: Vec<f32>, layer_values: &[f32]) -> NetworkOutput<TB> {
        let device = Default::default();
        let rows = logits.len() / 2;
        NetworkOutput {
            logits: Tensor::from_data(TensorData::new(logits, [rows, 2]), &device),
            layers: Some(LayerStack::Merged(
                layer_values.iter().map(|&v| Tensor::<TB, 3>::full([rows, 3, 4], v, &device)).collect(),
            )),
        }
    }

    fn labels() -> Tensor<TB, 1> {
        Tensor::from_floats([0.0, 1.0], &Default::default())
    }

    fn mask() -> Tensor<TB, 2> {
        Tensor::ones([2, 3], &Default::default())
    }

    fn config(use_kd: bool, use_emd: bool) -> TrainConfig {
        TrainConfig { use_kd, use_emd, ..TrainConfig::default() }
    }

    fn scalar(t: Tensor<TB, 1>) -> f64 {
        t.into_scalar() as f64
    }

    #[test]
    fn test_resolve_modes() {
        assert!(matches!(TrainingMode::resolve(&config(false, false)), TrainingMode::Supervised));
        assert!(matches!(TrainingMode::resolve(&config(false, true)), TrainingMode::Supervised));
        assert!(matches!(
            TrainingMode::resolve(&config(true, false)),
            TrainingMode::Distill { transfer: None, .. }
        ));

        let cfg = TrainConfig { hidn2attn: true, update_emd: true, emd_rate: Some(0.5), ..config(true, true) };
        let transfer = TrainingMode::resolve(&cfg).transfer().unwrap();
        assert_eq!(transfer.pipeline, RepresentationPipeline::Attention);
        assert!(transfer.weight_feedback);
        assert_eq!(transfer.gradient, TransportGradient::Additive { rate: 0.5 });
    }

    #[test]
    fn test_supervised_is_task_loss() {
        let mut composite = CompositeLoss::<TB>::new(TrainingMode::Supervised, OutputMode::Classification, None).unwrap();
        let student = output(vec![2.0, 0.0, 0.0, 1.0], &[]);
        let got = composite.assemble(&student, None, labels(), mask(), 0).unwrap();
        let expected = task_loss(student.logits.clone(), labels(), OutputMode::Classification);
        assert!((scalar(got.loss) - scalar(expected)).abs() < 1e-6);
        assert!(got.transport_loss.is_none());
    }

    #[test]
    fn test_distill_without_teacher_is_configuration_error() {
        let mode = TrainingMode::resolve(&config(true, false));
        let mut composite = CompositeLoss::<TB>::new(mode, OutputMode::Classification, None).unwrap();
        let student = output(vec![2.0, 0.0, 0.0, 1.0], &[]);
        assert!(matches!(
            composite.assemble(&student, None, labels(), mask(), 0),
            Err(DistillError::Configuration(_))
        ));
    }

    #[test]
    fn test_teacher_logit_shape_mismatch_is_configuration_error() {
        let mode = TrainingMode::resolve(&config(true, false));
        let mut composite = CompositeLoss::<TB>::new(mode, OutputMode::Classification, None).unwrap();
        let student = output(vec![2.0, 0.0, 0.0, 1.0], &[]);
        let teacher = output(vec![2.0, 0.0], &[]);
        assert!(matches!(
            composite.assemble(&student, Some(&teacher), labels(), mask(), 0),
            Err(DistillError::Configuration(_))
        ));
    }

    #[test]
    fn test_transfer_without_matcher_is_rejected() {
        let mode = TrainingMode::resolve(&config(true, true));
        assert!(CompositeLoss::<TB>::new(mode, OutputMode::Classification, None).is_err());
    }

    #[test]
    fn test_detached_transport_leaves_kd_loss_untouched() {
        let mode = TrainingMode::resolve(&TrainConfig { update_emd: true, ..config(true, true) });
        let matcher: Box<dyn LayerMatcher<TB>> = Box::new(EmdMatcher::new(2, 2).unwrap());
        let mut composite = CompositeLoss::new(mode, OutputMode::Classification, Some(matcher)).unwrap();
        let student = output(vec![2.0, 0.0, 0.0, 1.0], &[0.0, 1.0]);
        let teacher = output(vec![1.0, 0.0, 0.0, 2.0], &[0.2, 3.0]);

        let got = composite.assemble(&student, Some(&teacher), labels(), mask(), 0).unwrap();
        let kd = KdLoss::new(TrainConfig::default().kd_alpha, TrainConfig::default().kd_temperature)
            .forward(student.logits.clone(), teacher.logits.clone(), labels(), OutputMode::Classification);

        assert!((scalar(got.loss) - scalar(kd.total)).abs() < 1e-6);
        assert!(got.transport_loss.unwrap() > 0.0);
        assert!(got.weights_updated);
    }

    #[test]
    fn test_additive_transport_adds_scaled_loss() {
        let mode = TrainingMode::resolve(&TrainConfig { emd_rate: Some(2.0), ..config(true, true) });
        let matcher: Box<dyn LayerMatcher<TB>> = Box::new(EmdMatcher::new(2, 2).unwrap());
        let mut composite = CompositeLoss::new(mode, OutputMode::Classification, Some(matcher)).unwrap();
        let student = output(vec![2.0, 0.0, 0.0, 1.0], &[0.0, 1.0]);
        let teacher = output(vec![1.0, 0.0, 0.0, 2.0], &[0.2, 3.0]);

        let got = composite.assemble(&student, Some(&teacher), labels(), mask(), 0).unwrap();
        let kd = KdLoss::new(TrainConfig::default().kd_alpha, TrainConfig::default().kd_temperature)
            .forward(student.logits.clone(), teacher.logits.clone(), labels(), OutputMode::Classification);
        let expected = scalar(kd.total) + 2.0 * got.transport_loss.unwrap();

        assert!((scalar(got.loss) - expected).abs() < 1e-4);
        assert!(!got.weights_updated);
    }

    #[test]
    fn test_missing_layers_is_configuration_error() {
        let mode = TrainingMode::resolve(&config(true, true));
        let matcher: Box<dyn LayerMatcher<TB>> = Box::new(EmdMatcher::new(2, 2).unwrap());
        let mut composite = CompositeLoss::new(mode, OutputMode::Classification, Some(matcher)).unwrap();
        let mut student = output(vec![2.0, 0.0, 0.0, 1.0], &[0.0, 1.0]);
        student.layers = None;
        let teacher = output(vec![1.0, 0.0, 0.0, 2.0], &[0.2, 3.0]);
        assert!(matches!(
            composite.assemble(&student, Some(&teacher), labels(), mask(), 0),
            Err(DistillError::Configuration(_))
        ));
    }

    fn matching_loss(update_emd: bool, emd_rate: Option<f64>) -> CompositeLoss<TB> {
        let mode = TrainingMode::resolve(&TrainConfig { update_emd, emd_rate, ..config(true, true) });
        let matcher: Box<dyn LayerMatcher<TB>> = Box::new(EmdMatcher::new(2, 2).unwrap());
        CompositeLoss::new(mode, OutputMode::Classification, Some(matcher)).unwrap()
    }

    fn transport_of(composite: &mut CompositeLoss<TB>, student: &NetworkOutput<TB>, teacher: &NetworkOutput<TB>) -> f64 {
        composite
            .assemble(student, Some(teacher), labels(), mask(), 0)
            .unwrap()
            .transport_loss
            .unwrap()
    }

    #[test]
    fn test_frozen_layer_weights_repeat_transport_loss() {
        let mut composite = matching_loss(false, None);
        let student = output(vec![2.0, 0.0, 0.0, 1.0], &[0.0, 1.0]);
        let teacher = output(vec![1.0, 0.0, 0.0, 2.0], &[0.2, 3.0]);

        let first  = transport_of(&mut composite, &student, &teacher);
        let second = transport_of(&mut composite, &student, &teacher);
        assert_eq!(first, second);
    }

    #[test]
    fn test_weight_feedback_changes_next_transport_loss() {
        let mut composite = matching_loss(true, None);
        let student = output(vec![2.0, 0.0, 0.0, 1.0], &[0.0, 1.0]);
        let teacher = output(vec![1.0, 0.0, 0.0, 2.0], &[0.2, 3.0]);

        let first  = transport_of(&mut composite, &student, &teacher);
        let second = transport_of(&mut composite, &student, &teacher);
        assert!((first - second).abs() > 1e-3, "{first} vs {second}");
    }

    #[test]
    fn test_non_finite_step_leaves_layer_weights_alone() {
        let student = output(vec![2.0, 0.0, 0.0, 1.0], &[0.0, 1.0]);
        let teacher = output(vec![1.0, 0.0, 0.0, 2.0], &[0.2, 3.0]);
        let broken  = output(vec![2.0, 0.0, 0.0, 1.0], &[f32::NAN, 1.0]);

        let mut interrupted = matching_loss(true, Some(1.0));
        transport_of(&mut interrupted, &student, &teacher);
        assert!(matches!(
            interrupted.assemble(&broken, Some(&teacher), labels(), mask(), 7),
            Err(DistillError::NumericInstability { step: 7, .. })
        ));
        let after = transport_of(&mut interrupted, &student, &teacher);

        let mut clean = matching_loss(true, Some(1.0));
        transport_of(&mut clean, &student, &teacher);
        let expected = transport_of(&mut clean, &student, &teacher);

        assert!(after.is_finite());
        assert_eq!(after, expected);
    }
}
