// ============================================================
// Layer 5 — Distillation Training Loop
// ============================================================
// Epoch orchestration for a student trained against a frozen
// teacher:
//
//   Initializing
//     → Training(e)    drop-path = ceiling · e / epochs
//                      lr        = cosine(e), T_max = epochs / 2
//                      every batch: forward both networks,
//                      assemble the loss, backward, SGD step
//     → Validating(e)  model.valid() on the inner backend,
//                      metric over the whole dev set,
//                      strict-greater best update, checkpoint
//     → … → Finished
//
// Key Burn insight:
//   - Training uses MyBackend (Autodiff<Wgpu>) for gradients
//   - model.valid() returns the model on MyInnerBackend (Wgpu)
//   - The teacher lives on MyInnerBackend from the start, so it
//     can never receive a gradient
//   - Gradients are fresh per backward(); there is nothing to zero
//
// A step whose loss is not finite is skipped (no backward, no
// update) and the epoch carries on.

use anyhow::{Context, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, GradientsParams, Optimizer, SgdConfig,
    },
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::{BatchSource, GlueBatch, GlueBatcher},
    dataset::GlueDataset,
};
use crate::domain::{
    average::AverageMeter,
    best::BestModelState,
    error::{DistillError, DistillResult},
    metrics::compute_metrics,
    task::GlueTask,
};
use crate::infra::{
    checkpoint::{load_encoder, CheckpointManager, CheckpointSink},
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::{
    clip::clip_global_norm,
    emd::{EmdMatcher, LayerMatcher},
    evaluator::{evaluate, host_labels, host_predictions},
    model::{EncoderClassifier, EncoderConfig, LayerOutput},
    network::{ClassifierNetwork, FrozenTeacher, StudentNetwork, TeacherFamily},
    schedule::CosineAnnealing,
    strategy::{CompositeLoss, TrainingMode},
};

type MyBackend      = burn::backend::Autodiff<burn::backend::Wgpu>;
type MyInnerBackend = burn::backend::Wgpu;

// ─── Settings and state ──────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub task:            GlueTask,
    pub epochs:          usize,
    pub lr:              f64,
    pub lr_min:          f64,
    pub drop_path_prob:  f64,
    /// Ceiling on the joint L2 norm of all gradients; 0 disables clipping
    pub grad_clip:       f64,
    pub print_freq:      usize,
    /// Used for progress lines only
    pub steps_per_epoch: usize,
}

impl TrainerSettings {
    pub fn from_config(cfg: &TrainConfig, task: GlueTask, steps_per_epoch: usize) -> Self {
        Self {
            task,
            epochs:         cfg.epochs,
            lr:             cfg.lr,
            lr_min:         cfg.lr_min,
            drop_path_prob: cfg.drop_path_prob,
            grad_clip:      cfg.grad_clip,
            print_freq:     cfg.print_freq.max(1),
            steps_per_epoch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initializing,
    Training(usize),
    Validating(usize),
    Finished,
}

/// Gradients and bookkeeping of one successful step.
pub struct StepPass<B: AutodiffBackend> {
    pub grads:  B::Gradients,
    pub loss:   f64,
    pub metric: f64,
    pub n:      usize,
}

#[derive(Debug, Clone)]
pub struct EpochStats {
    pub loss:    f64,
    pub metric:  f64,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct FitSummary {
    pub best_metric:   f64,
    pub best_epoch:    Option<usize>,
    pub history:       Vec<EpochMetrics>,
    pub skipped_steps: usize,
}

pub struct DistillTrainer<B: AutodiffBackend> {
    settings: TrainerSettings,
    loss:     CompositeLoss<B>,
    teacher:  Option<FrozenTeacher<B::InnerBackend>>,
    schedule: CosineAnnealing,
    phase:    RunPhase,
}

impl<B: AutodiffBackend> DistillTrainer<B> {
    pub fn new(
        settings: TrainerSettings,
        loss:     CompositeLoss<B>,
        teacher:  Option<FrozenTeacher<B::InnerBackend>>,
    ) -> DistillResult<Self> {
        if loss.mode().needs_teacher() && teacher.is_none() {
            return Err(DistillError::config("distillation is enabled but no teacher was loaded"));
        }
        if settings.epochs == 0 {
            return Err(DistillError::config("epochs must be at least 1"));
        }
        if let Some(t) = &teacher {
            if t.output_mode() != settings.task.output_mode() {
                return Err(DistillError::config(format!(
                    "{} teacher has a {} head but task {} is {}",
                    t.family(), t.output_mode(), settings.task, settings.task.output_mode()
                )));
            }
        }
        let schedule = CosineAnnealing::for_run(settings.lr, settings.lr_min, settings.epochs);
        Ok(Self { settings, loss, teacher, schedule, phase: RunPhase::Initializing })
    }

    #[cfg(test)]
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    // ── One mini-batch ────────────────────────────────────────────────────────
    pub fn train_step<M>(&mut self, model: &M, batch: &GlueBatch<B>, step: usize) -> DistillResult<StepPass<B>>
    where
        M: ClassifierNetwork<B>,
    {
        let n = batch.batch_size();
        let student = model.forward_batch(batch);
        let [rows, _] = student.logits.dims();
        if rows != n {
            return Err(DistillError::config(format!(
                "student produced {rows} logit rows for a batch of {n}"
            )));
        }

        let teacher = self.teacher.as_ref().map(|t| t.forward(batch));
        let assembled = self.loss.assemble(
            &student,
            teacher.as_ref(),
            batch.labels.clone(),
            batch.float_mask(),
            step,
        )?;

        let loss_value: f64 = assembled.loss.clone().into_scalar().elem();
        if !loss_value.is_finite() {
            return Err(DistillError::NumericInstability { step, value: loss_value });
        }
        if let Some(transport) = assembled.transport_loss {
            tracing::trace!("step {step}: transport loss {transport:.6}, reweighted={}", assembled.weights_updated);
        }

        let grads = assembled.loss.backward();

        let mode   = model.output_mode();
        let preds  = host_predictions(student.logits, mode)?;
        let labels = host_labels(batch)?;
        let record = compute_metrics(self.settings.task, &preds, &labels)?;
        let metric = self.settings.task.select(&record)?;

        Ok(StepPass { grads, loss: loss_value, metric, n })
    }

    // ── One epoch over the training source ───────────────────────────────────
    pub fn train_epoch<M, O>(
        &mut self,
        mut model: M,
        optim:     &mut O,
        source:    &dyn BatchSource<B>,
        epoch:     usize,
        lr:        f64,
    ) -> DistillResult<(M, EpochStats)>
    where
        M: StudentNetwork<B>,
        O: Optimizer<M, B>,
    {
        let epochs = self.settings.epochs;
        let total  = self.settings.steps_per_epoch.max(1);
        let mut losses  = AverageMeter::new();
        let mut top1    = AverageMeter::new();
        let mut skipped = 0usize;

        tracing::info!("Epoch {} LR {}", epoch, lr);

        for (step, batch) in source.batches().enumerate() {
            match self.train_step(&model, &batch, step) {
                Ok(pass) => {
                    let grads = GradientsParams::from_grads(pass.grads, &model);
                    let (grads, norm) = clip_global_norm::<B, M>(&model, grads, self.settings.grad_clip);
                    tracing::trace!("step {step}: grad norm {norm:.4}");
                    model = optim.step(lr, model, grads);

                    losses.update(pass.loss, pass.n);
                    top1.update(pass.metric, pass.n);

                    if step % self.settings.print_freq == 0 || step + 1 == total {
                        tracing::info!(
                            "Train: [{:2}/{}] Step {:03}/{:03} Loss {:.3} Prec {:.1}%",
                            epoch + 1, epochs, step, total - 1, losses.avg(), top1.last() * 100.0,
                        );
                    }
                }
                Err(err) if err.is_recoverable() => {
                    tracing::warn!("Skipping step {step} ({:?}): {err}", self.phase);
                    skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if losses.count() == 0 && skipped == 0 {
            return Err(DistillError::DataExhausted("training set".to_string()));
        }
        Ok((model, EpochStats { loss: losses.avg(), metric: top1.avg(), skipped }))
    }

    // ── Full run ──────────────────────────────────────────────────────────────
    pub fn fit<M, O>(
        &mut self,
        mut model:   M,
        optim:       &mut O,
        train:       &dyn BatchSource<B>,
        valid:       &dyn BatchSource<B::InnerBackend>,
        sink:        &dyn CheckpointSink<M>,
        metrics_log: Option<&MetricsLogger>,
    ) -> DistillResult<(M, FitSummary)>
    where
        M: StudentNetwork<B>,
        <M as AutodiffModule<B>>::InnerModule: ClassifierNetwork<B::InnerBackend>,
        O: Optimizer<M, B>,
    {
        let epochs = self.settings.epochs;
        let task   = self.settings.task;
        let mut best    = BestModelState::new();
        let mut history = Vec::with_capacity(epochs);
        let mut skipped_steps = 0usize;

        tracing::info!("Training mode: {}", self.loss.mode().describe());

        for epoch in 0..epochs {
            // ── Training phase ────────────────────────────────────────────────
            self.phase = RunPhase::Training(epoch);
            let drop_prob = self.settings.drop_path_prob * epoch as f64 / epochs as f64;
            model.set_drop_path_prob(drop_prob);
            let lr = self.schedule.lr_at(epoch);

            let (trained, train_stats) = self.train_epoch(model, optim, train, epoch, lr)?;
            model = trained;
            skipped_steps += train_stats.skipped;

            // ── Validation phase ──────────────────────────────────────────────
            // model.valid() → inner backend, dropout and drop-path disabled
            self.phase = RunPhase::Validating(epoch);
            let summary = evaluate(&model.valid(), valid, task)?;
            tracing::info!("val: [{:2}/{}] Final Prec@1 {:.4}%", epoch + 1, epochs, summary.metric * 100.0);
            tracing::debug!("val record: {:?} over {} samples", summary.record, summary.samples);

            let is_best = best.observe(epoch + 1, summary.metric);
            if let Err(err) = sink.save_checkpoint(&model, epoch + 1, is_best) {
                tracing::warn!("Checkpoint for epoch {} not saved: {err:#}", epoch + 1);
            }

            let row = EpochMetrics {
                epoch:        epoch + 1,
                lr,
                train_loss:   train_stats.loss,
                train_metric: train_stats.metric,
                val_loss:     summary.loss,
                val_metric:   summary.metric,
                is_best,
            };
            if let Some(logger) = metrics_log {
                if let Err(err) = logger.log(&row) {
                    tracing::warn!("Metrics row for epoch {} not written: {err:#}", epoch + 1);
                }
            }
            history.push(row);

            tracing::info!("Present best Prec@1 = {:.4}%", best.best() * 100.0);
        }

        self.phase = RunPhase::Finished;
        tracing::info!("Final best Prec@1 = {:.4}%", best.best() * 100.0);

        Ok((model, FitSummary {
            best_metric: best.best(),
            best_epoch:  best.best_epoch(),
            history,
            skipped_steps,
        }))
    }
}

// ─── Wgpu wiring ──────────────────────────────────────────────────────────────
pub fn run_training(
    cfg:           &TrainConfig,
    task:          GlueTask,
    train_dataset: GlueDataset,
    val_dataset:   GlueDataset,
    ckpt_manager:  CheckpointManager,
) -> Result<FitSummary> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);
    MyBackend::seed(cfg.seed);

    let mode = TrainingMode::resolve(cfg);
    let layer_output = match mode.transfer() {
        None                          => LayerOutput::None,
        Some(_) if cfg.per_head_reps => LayerOutput::PerHead,
        Some(_)                       => LayerOutput::Merged,
    };

    // ── Teacher (inner backend, frozen) ──────────────────────────────────────
    // Also loaded without KD when its token embeddings seed the student.
    let wants_teacher = mode.needs_teacher() || (cfg.init_embeddings && cfg.teacher_model.is_some());
    let teacher_model: Option<(EncoderClassifier<MyInnerBackend>, EncoderConfig)> = if wants_teacher {
        let dir = cfg.teacher_model.as_deref()
            .context("use_kd is set but no --teacher-model directory was given")?;
        let (teacher, teacher_cfg) = load_encoder::<MyInnerBackend>(dir, layer_output, &device)?;
        if teacher_cfg.num_labels != task.num_labels() {
            return Err(DistillError::config(format!(
                "teacher has {} labels but task {} needs {}",
                teacher_cfg.num_labels, task, task.num_labels()
            )).into());
        }
        tracing::info!("Teacher loaded from '{}': {} layers, d_model={}", dir, teacher_cfg.num_layers, teacher_cfg.d_model);
        Some((teacher, teacher_cfg))
    } else {
        None
    };

    // ── Student ───────────────────────────────────────────────────────────────
    let model_cfg = EncoderConfig::new(
        cfg.vocab_size, cfg.max_seq_len, cfg.d_model, cfg.num_heads,
        cfg.layers, cfg.d_ff, task.num_labels(), task.output_mode(),
    )
    .with_dropout(cfg.dropout)
    .with_layer_output(layer_output);
    let mut model: EncoderClassifier<MyBackend> = model_cfg.init(&device);
    ckpt_manager.save_encoder_config(&model_cfg)?;

    if let (true, Some((teacher, _))) = (cfg.init_embeddings, teacher_model.as_ref()) {
        if model.init_token_embedding_from(teacher) {
            tracing::info!("Student token embeddings initialised from the teacher");
        }
    }
    // Reported in millions of parameters, the usual "MB" of these logs
    let mb_params = model.num_params() as f64 / 1e6;
    tracing::info!("Model ready: {} layers, d_model={}", model.num_layers(), cfg.d_model);
    tracing::info!("Model size = {:.3} MB", mb_params);

    // ── Loss strategy ─────────────────────────────────────────────────────────
    let matcher: Option<Box<dyn LayerMatcher<MyBackend>>> = match (mode.transfer(), teacher_model.as_ref()) {
        (Some(_), Some((_, teacher_cfg))) => {
            Some(Box::new(EmdMatcher::new(cfg.layers, teacher_cfg.num_layers)?))
        }
        _ => None,
    };
    let mode_needs_teacher = mode.needs_teacher();
    let loss = CompositeLoss::new(mode, task.output_mode(), matcher)?;

    let family: TeacherFamily = cfg.teacher_type.parse()?;
    let teacher = teacher_model.filter(|_| mode_needs_teacher).map(|(network, _)| {
        FrozenTeacher::new(Box::new(network) as Box<dyn ClassifierNetwork<MyInnerBackend>>, family)
    });

    // ── SGD with momentum and weight decay ───────────────────────────────────
    // v = μ·v + g + λ·θ
    // θ = θ - lr · v
    // Gradients reach the optimizer already clipped to a joint norm of grad_clip.
    let mut optim = SgdConfig::new()
        .with_momentum(Some(MomentumConfig::new().with_momentum(cfg.momentum).with_dampening(0.0)))
        .with_weight_decay(Some(WeightDecayConfig::new(cfg.weight_decay as f32)))
        .init();

    // ── Training data loader (AutodiffBackend) ────────────────────────────────
    let steps_per_epoch = train_dataset.batch_count(cfg.batch_size);
    tracing::info!("train_loader length {} ({} samples)", steps_per_epoch, train_dataset.sample_count());
    let train_loader = DataLoaderBuilder::new(GlueBatcher::<MyBackend>::new(device.clone()))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(1)
        .build(train_dataset);

    // ── Validation data loader (InnerBackend — no autodiff overhead) ──────────
    let val_loader = DataLoaderBuilder::new(GlueBatcher::<MyInnerBackend>::new(device.clone()))
        .batch_size(cfg.batch_size)
        .num_workers(1)
        .build(val_dataset);

    let metrics_log = if ckpt_manager.is_writer() {
        MetricsLogger::new(ckpt_manager.dir())
            .inspect(|logger| tracing::info!("Epoch metrics go to '{}'", logger.csv_path().display()))
            .map_err(|err| tracing::warn!("metrics.csv disabled: {err:#}"))
            .ok()
    } else {
        None
    };

    let settings = TrainerSettings::from_config(cfg, task, steps_per_epoch);
    let mut trainer = DistillTrainer::new(settings, loss, teacher)?;
    let (_, summary) = trainer.fit(
        model,
        &mut optim,
        &train_loader,
        &val_loader,
        &ckpt_manager,
        metrics_log.as_ref(),
    )?;

    tracing::info!("Training complete!");
    Ok(summary)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use burn::backend::{Autodiff, NdArray};
    use crate::domain::task::OutputMode;
    use crate::ml::model::tests::{tiny_batch, tiny_config};

    type TB = Autodiff<NdArray>;
    type TI = NdArray;

    /// Records every checkpoint request instead of writing files.
    #[derive(Default)]
    struct RecordingSink {
        calls: RefCell<Vec<(usize, bool)>>,
    }

    impl<M> CheckpointSink<M> for RecordingSink {
        fn save_checkpoint(&self, _model: &M, epoch: usize, is_best: bool) -> Result<()> {
            self.calls.borrow_mut().push((epoch, is_best));
            Ok(())
        }
    }

    fn settings(task: GlueTask, epochs: usize) -> TrainerSettings {
        TrainerSettings {
            task,
            epochs,
            lr:              0.05,
            lr_min:          0.0,
            drop_path_prob:  0.1,
            grad_clip:       5.0,
            print_freq:      1,
            steps_per_epoch: 2,
        }
    }

    fn sgd() -> SgdConfig {
        SgdConfig::new()
            .with_momentum(Some(MomentumConfig::new().with_momentum(0.9).with_dampening(0.0)))
    }

    #[test]
    fn test_supervised_fit_checkpoints_every_epoch() {
        let device = Default::default();
        let model: EncoderClassifier<TB> = tiny_config(2, LayerOutput::None).init(&device);
        let loss = CompositeLoss::new(TrainingMode::Supervised, OutputMode::Classification, None).unwrap();
        let mut trainer = DistillTrainer::<TB>::new(settings(GlueTask::Sst2, 3), loss, None).unwrap();

        let train: Vec<GlueBatch<TB>> = vec![tiny_batch(&[0.0, 1.0, 0.0, 1.0]), tiny_batch(&[1.0, 0.0])];
        let valid: Vec<GlueBatch<TI>> = vec![tiny_batch(&[0.0, 1.0, 1.0])];
        let sink = RecordingSink::default();
        let mut optim = sgd().init();

        let (_, summary) = trainer.fit(model, &mut optim, &train, &valid, &sink, None).unwrap();

        let calls = sink.calls.borrow();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], (1, true));
        assert_eq!(summary.history.len(), 3);
        let max_val = summary.history.iter().map(|m| m.val_metric).fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(summary.best_metric, max_val);
        assert_eq!(trainer.phase(), RunPhase::Finished);
        for (row, call) in summary.history.iter().zip(calls.iter()) {
            assert_eq!(row.is_best, call.1);
        }
    }

    #[test]
    fn test_distill_fit_with_layer_matching() {
        let device = Default::default();
        let teacher_net: EncoderClassifier<TI> = tiny_config(3, LayerOutput::Merged).init(&device);
        let teacher = FrozenTeacher::new(
            Box::new(teacher_net) as Box<dyn ClassifierNetwork<TI>>,
            TeacherFamily::Bert,
        );
        let cfg = TrainConfig { use_kd: true, use_emd: true, update_emd: true, hidn2attn: true, ..TrainConfig::default() };
        let matcher: Box<dyn LayerMatcher<TB>> = Box::new(EmdMatcher::new(2, 3).unwrap());
        let loss = CompositeLoss::new(TrainingMode::resolve(&cfg), OutputMode::Classification, Some(matcher)).unwrap();
        let mut trainer = DistillTrainer::<TB>::new(settings(GlueTask::Mrpc, 2), loss, Some(teacher)).unwrap();

        let model: EncoderClassifier<TB> = tiny_config(2, LayerOutput::Merged).init(&device);
        let train: Vec<GlueBatch<TB>> = vec![tiny_batch(&[0.0, 1.0, 0.0, 1.0])];
        let valid: Vec<GlueBatch<TI>> = vec![tiny_batch(&[0.0, 1.0])];
        let sink = RecordingSink::default();
        let mut optim = sgd().init();

        let (_, summary) = trainer.fit(model, &mut optim, &train, &valid, &sink, None).unwrap();
        assert_eq!(sink.calls.borrow().len(), 2);
        assert!(summary.best_metric.is_finite());
        assert_eq!(summary.skipped_steps, 0);
    }

    #[test]
    fn test_distill_without_teacher_is_rejected() {
        let cfg  = TrainConfig { use_kd: true, ..TrainConfig::default() };
        let loss = CompositeLoss::<TB>::new(TrainingMode::resolve(&cfg), OutputMode::Classification, None).unwrap();
        assert!(matches!(
            DistillTrainer::<TB>::new(settings(GlueTask::Sst2, 1), loss, None),
            Err(DistillError::Configuration(_))
        ));
    }

    #[test]
    fn test_teacher_head_must_match_task() {
        let device = Default::default();
        let teacher_net: EncoderClassifier<TI> = tiny_config(1, LayerOutput::None).init(&device);
        let teacher = FrozenTeacher::new(
            Box::new(teacher_net) as Box<dyn ClassifierNetwork<TI>>,
            TeacherFamily::Roberta,
        );
        let cfg  = TrainConfig { use_kd: true, ..TrainConfig::default() };
        let loss = CompositeLoss::<TB>::new(TrainingMode::resolve(&cfg), OutputMode::Regression, None).unwrap();
        assert!(matches!(
            DistillTrainer::<TB>::new(settings(GlueTask::StsB, 1), loss, Some(teacher)),
            Err(DistillError::Configuration(_))
        ));
    }

    #[test]
    fn test_non_finite_loss_skips_step() {
        let device = Default::default();
        let model: EncoderClassifier<TB> = EncoderConfig::new(16, 6, 8, 2, 1, 16, 1, OutputMode::Regression)
            .with_dropout(0.0)
            .init(&device);
        let loss = CompositeLoss::new(TrainingMode::Supervised, OutputMode::Regression, None).unwrap();
        let mut trainer = DistillTrainer::<TB>::new(settings(GlueTask::StsB, 1), loss, None).unwrap();

        let batch = tiny_batch::<TB>(&[f32::NAN, 1.0]);
        assert!(matches!(
            trainer.train_step(&model, &batch, 4),
            Err(DistillError::NumericInstability { step: 4, .. })
        ));

        let mut optim = sgd().init();
        let (_, stats) = trainer.train_epoch(model, &mut optim, &vec![batch], 0, 0.01).unwrap();
        assert_eq!(stats.skipped, 1);
    }
}
