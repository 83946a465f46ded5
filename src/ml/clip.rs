// ============================================================
// Layer 5 — Global Gradient-Norm Clipping
// ============================================================
// Burn's optimizer-level clipping works per parameter tensor.
// This clips the L2 norm of ALL gradients taken together:
//
//   norm  = sqrt(Σ_p ‖g_p‖²)
//   g_p  ← g_p · max_norm / (norm + 1e-6)     when norm > max_norm
//
// Gradients live in GradientsParams on the inner backend, keyed
// by parameter id, so both passes walk the module with a visitor.

use std::marker::PhantomData;

use burn::{
    module::{ModuleVisitor, ParamId},
    optim::GradientsParams,
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};

struct SquaredNorm<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    total: Option<Tensor<B::InnerBackend, 1>>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) else {
            return;
        };
        let squared = grad.powf_scalar(2.0).sum();
        self.total = Some(match self.total.take() {
            Some(total) => total + squared,
            None        => squared,
        });
    }
}

struct Rescale<'a, B: AutodiffBackend> {
    grads:  &'a mut GradientsParams,
    factor: f64,
    _b:     PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Rescale<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads.register::<B::InnerBackend, D>(id, grad.mul_scalar(self.factor));
        }
    }
}

/// L2 norm over every gradient of `module` held in `grads`.
pub fn global_norm<B, M>(module: &M, grads: &GradientsParams) -> f64
where
    B: AutodiffBackend,
    M: Module<B>,
{
    let mut visitor = SquaredNorm::<B> { grads, total: None };
    module.visit(&mut visitor);
    visitor
        .total
        .map(|total| total.into_scalar().elem::<f64>().sqrt())
        .unwrap_or(0.0)
}

/// Scale all gradients down so their joint norm is at most `max_norm`.
/// Returns the norm measured before clipping. A non-positive ceiling
/// disables clipping.
pub fn clip_global_norm<B, M>(module: &M, mut grads: GradientsParams, max_norm: f64) -> (GradientsParams, f64)
where
    B: AutodiffBackend,
    M: Module<B>,
{
    let norm = global_norm::<B, M>(module, &grads);
    if max_norm > 0.0 && norm.is_finite() && norm > max_norm {
        let mut visitor = Rescale::<B> { grads: &mut grads, factor: max_norm / (norm + 1e-6), _b: PhantomData };
        module.visit(&mut visitor);
    }
    (grads, norm)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::OutputMode;
    use crate::ml::loss::task_loss;
    use crate::ml::model::{tests::{tiny_batch, tiny_config, TestAutodiff}, EncoderClassifier, LayerOutput};
    use crate::ml::network::ClassifierNetwork;

    fn model_and_grads() -> (EncoderClassifier<TestAutodiff>, GradientsParams) {
        let model: EncoderClassifier<TestAutodiff> = tiny_config(2, LayerOutput::None).init(&Default::default());
        let batch = tiny_batch::<TestAutodiff>(&[0.0, 1.0, 1.0]);
        let logits = model.forward_batch(&batch).logits;
        let grads = task_loss(logits, batch.labels.clone(), OutputMode::Classification).backward();
        let grads = GradientsParams::from_grads(grads, &model);
        (model, grads)
    }

    #[test]
    fn test_joint_norm_is_brought_to_ceiling() {
        let (model, grads) = model_and_grads();
        let before = global_norm::<TestAutodiff, _>(&model, &grads);
        assert!(before > 0.0);

        let (clipped, reported) = clip_global_norm::<TestAutodiff, _>(&model, grads, before / 2.0);
        let after = global_norm::<TestAutodiff, _>(&model, &clipped);
        assert!((reported - before).abs() < 1e-9);
        assert!((after - before / 2.0).abs() < 1e-3 * before, "{after} vs {}", before / 2.0);
    }

    #[test]
    fn test_small_gradients_pass_through() {
        let (model, grads) = model_and_grads();
        let before = global_norm::<TestAutodiff, _>(&model, &grads);

        let (kept, _) = clip_global_norm::<TestAutodiff, _>(&model, grads, before * 10.0);
        let after = global_norm::<TestAutodiff, _>(&model, &kept);
        assert!((after - before).abs() < 1e-6 * before.max(1.0));
    }
}
