// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full distillation pipeline in order:
//
//   Step 1: Resolve the task             (Layer 3 - domain)
//   Step 2: Load the tokenizer           (Layer 6 - infra)
//   Step 3: Read train / dev TSV splits  (Layer 4 - data)
//   Step 4: Tokenise into samples        (Layer 4 - data)
//   Step 5: Build datasets               (Layer 4 - data)
//   Step 6: Save config                  (Layer 6 - infra)
//   Step 7: Run the training loop        (Layer 5 - ml)

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::data::{
    dataset::GlueDataset,
    loader::GlueLoader,
    preprocessor::Preprocessor,
};
use crate::domain::{task::GlueTask, traits::ExampleSource};
use crate::infra::{
    checkpoint::CheckpointManager,
    tokenizer_store::TokenizerStore,
};
use crate::ml::trainer::{run_training, FitSummary};

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a run. Saved as train_config.json next to
// the checkpoints so `eval` can rebuild the same pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    // ── Data ──
    pub task:           String,
    pub data_dir:       String,
    pub tokenizer:      Option<String>,
    pub checkpoint_dir: String,
    pub max_seq_len:    usize,
    pub batch_size:     usize,

    // ── Optimisation ──
    pub epochs:         usize,
    pub lr:             f64,
    pub lr_min:         f64,
    pub momentum:       f64,
    pub weight_decay:   f64,
    pub grad_clip:      f64,
    pub drop_path_prob: f64,
    pub print_freq:     usize,
    pub seed:           u64,

    // ── Distillation ──
    pub teacher_model:  Option<String>,
    pub teacher_type:   String,
    pub use_kd:         bool,
    pub use_emd:        bool,
    pub hidn2attn:      bool,
    pub update_emd:     bool,
    pub kd_alpha:       f64,
    pub kd_temperature: f64,
    /// Adds rate · matching loss to the backpropagated loss when set
    pub emd_rate:       Option<f64>,
    pub init_embeddings: bool,

    // ── Student architecture ──
    pub layers:         usize,
    pub d_model:        usize,
    pub num_heads:      usize,
    pub d_ff:           usize,
    pub dropout:        f64,
    pub per_head_reps:  bool,
    /// Filled in from the tokenizer before training
    pub vocab_size:     usize,

    /// Process rank; only rank 0 writes checkpoints and metrics
    pub rank:           usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            task:            "sst-2".to_string(),
            data_dir:        "data/glue/SST-2".to_string(),
            tokenizer:       None,
            checkpoint_dir:  "checkpoints".to_string(),
            max_seq_len:     128,
            batch_size:      32,
            epochs:          10,
            lr:              0.025,
            lr_min:          0.001,
            momentum:        0.9,
            weight_decay:    3e-4,
            grad_clip:       5.0,
            drop_path_prob:  0.2,
            print_freq:      50,
            seed:            2,
            teacher_model:   None,
            teacher_type:    "bert".to_string(),
            use_kd:          false,
            use_emd:         false,
            hidn2attn:       false,
            update_emd:      false,
            kd_alpha:        0.5,
            kd_temperature:  1.0,
            emd_rate:        None,
            init_embeddings: true,
            layers:          4,
            d_model:         312,
            num_heads:       12,
            d_ff:            1200,
            dropout:         0.1,
            per_head_reps:   false,
            vocab_size:      30522,
            rank:            0,
        }
    }
}

impl TrainConfig {
    pub fn is_writer(&self) -> bool {
        self.rank == 0
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<FitSummary> {
        let mut cfg = self.config.clone();

        // ── Step 1: Resolve the task ──────────────────────────────────────────
        let task: GlueTask = cfg.task.parse()?;
        cfg.task = task.id().to_string();
        tracing::info!("Task {} ({}, {} labels)", task, task.output_mode(), task.num_labels());

        // ── Step 2: Tokenizer shared with the teacher ─────────────────────────
        let store = TokenizerStore::resolve(cfg.tokenizer.as_deref(), cfg.teacher_model.as_deref())?;
        let tokenizer = store.load()?;
        cfg.tokenizer  = Some(store.path().display().to_string());
        cfg.vocab_size = tokenizer.get_vocab_size(true);

        // ── Step 3: Read the TSV splits ───────────────────────────────────────
        let loader = GlueLoader::new(&cfg.data_dir, task);
        let train_examples = loader.train_examples()?;
        let dev_examples   = loader.dev_examples()?;
        tracing::info!(
            "Loaded {} train / {} dev examples from '{}'",
            train_examples.len(),
            dev_examples.len(),
            cfg.data_dir
        );

        // ── Step 4: Tokenise ──────────────────────────────────────────────────
        let preprocessor  = Preprocessor::new(tokenizer, task, cfg.max_seq_len)?;
        let train_samples = preprocessor.encode_all(&train_examples)?;
        let dev_samples   = preprocessor.encode_all(&dev_examples)?;

        // ── Step 5: Build Burn datasets ───────────────────────────────────────
        let train_dataset = GlueDataset::new(train_samples);
        let val_dataset   = GlueDataset::new(dev_samples);

        // ── Step 6: Save config for eval ──────────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.checkpoint_dir, cfg.is_writer());
        ckpt_manager.save_config(&cfg)?;

        // ── Step 7: Run training loop (Layer 5) ───────────────────────────────
        run_training(&cfg, task, train_dataset, val_dataset, ckpt_manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let cfg: TrainConfig = serde_json::from_str(r#"{"task": "cola", "use_kd": true}"#).unwrap();
        assert_eq!(cfg.task, "cola");
        assert!(cfg.use_kd);
        assert_eq!(cfg.epochs, TrainConfig::default().epochs);
        assert!(cfg.emd_rate.is_none());
    }

    #[test]
    fn test_only_rank_zero_writes() {
        assert!(TrainConfig::default().is_writer());
        assert!(!TrainConfig { rank: 3, ..TrainConfig::default() }.is_writer());
    }
}
