// ============================================================
// Layer 5 — Validation Pass
// ============================================================
// Runs a network over a whole evaluation set without gradient
// tracking (callers hand in `model.valid()`, which lives on the
// inner backend), keeps predictions and labels in batch order,
// and computes the task metric once over the full set.
//
//   classification → argmax over the logits
//   regression     → the single logit column, flattened

use anyhow::Result;
use burn::{data::dataloader::DataLoaderBuilder, prelude::*, tensor::ElementConversion};

use crate::data::batcher::{BatchSource, GlueBatch, GlueBatcher};
use crate::data::dataset::GlueDataset;
use crate::domain::average::AverageMeter;
use crate::domain::error::{DistillError, DistillResult};
use crate::domain::metrics::compute_metrics;
use crate::domain::task::{GlueTask, MetricRecord, OutputMode};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::loss::task_loss;
use crate::ml::model::{EncoderClassifier, LayerOutput};
use crate::ml::network::ClassifierNetwork;

type InferBackend = burn::backend::Wgpu;

#[derive(Debug, Clone)]
pub struct EvalSummary {
    /// The task's selected metric
    pub metric:  f64,
    /// Sample-weighted mean task loss
    pub loss:    f64,
    pub record:  MetricRecord,
    pub samples: usize,
}

pub fn evaluate<B, M>(
    model:  &M,
    source: &dyn BatchSource<B>,
    task:   GlueTask,
) -> DistillResult<EvalSummary>
where
    B: Backend,
    M: ClassifierNetwork<B> + ?Sized,
{
    let mode = model.output_mode();
    let mut losses = AverageMeter::new();
    let mut preds  = Vec::new();
    let mut labels = Vec::new();

    for batch in source.batches() {
        let n = batch.batch_size();
        let logits = model.forward_batch(&batch).logits;
        let loss: f64 = task_loss(logits.clone(), batch.labels.clone(), mode).into_scalar().elem();
        losses.update(loss, n);

        preds.extend(host_predictions(logits, mode)?);
        labels.extend(host_labels(&batch)?);
    }

    if labels.is_empty() {
        return Err(DistillError::DataExhausted("evaluation set".to_string()));
    }
    let record = compute_metrics(task, &preds, &labels)?;
    let metric = task.select(&record)?;
    Ok(EvalSummary { metric, loss: losses.avg(), record, samples: labels.len() })
}

/// Reload the best checkpoint of a run and evaluate it on `dataset`.
pub fn run_evaluation(
    task:         GlueTask,
    dataset:      GlueDataset,
    batch_size:   usize,
    ckpt_manager: &CheckpointManager,
) -> Result<EvalSummary> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    let (model, model_cfg): (EncoderClassifier<InferBackend>, _) =
        ckpt_manager.load_best(LayerOutput::None, &device)?;
    tracing::info!(
        "Loaded best checkpoint from '{}': {} layers, d_model={}",
        ckpt_manager.dir().display(),
        model_cfg.num_layers,
        model_cfg.d_model
    );

    let loader = DataLoaderBuilder::new(GlueBatcher::<InferBackend>::new(device))
        .batch_size(batch_size)
        .num_workers(1)
        .build(dataset);
    Ok(evaluate::<InferBackend, _>(&model, &loader, task)?)
}

/// Logits → one prediction per row, on the host.
pub fn host_predictions<B: Backend>(logits: Tensor<B, 2>, mode: OutputMode) -> DistillResult<Vec<f64>> {
    let flat = match mode {
        OutputMode::Classification => logits.argmax(1).float().flatten::<1>(0, 1),
        OutputMode::Regression     => logits.flatten::<1>(0, 1),
    };
    to_host(flat)
}

pub fn host_labels<B: Backend>(batch: &GlueBatch<B>) -> DistillResult<Vec<f64>> {
    to_host(batch.labels.clone())
}

fn to_host<B: Backend>(values: Tensor<B, 1>) -> DistillResult<Vec<f64>> {
    values
        .into_data()
        .convert::<f64>()
        .to_vec()
        .map_err(|e| DistillError::config(format!("tensor readback failed: {e:?}")))
}
