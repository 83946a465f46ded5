// ============================================================
// Layer 2 — EvalUseCase
// ============================================================
// Re-runs the validation pass of a finished run:
//
//   Step 1: Load train_config.json from the checkpoint dir
//   Step 2: Load the same tokenizer the run used
//   Step 3: Read and tokenise the dev split
//   Step 4: Reload the best checkpoint and evaluate

use anyhow::{Context, Result};

use crate::data::{dataset::GlueDataset, loader::GlueLoader, preprocessor::Preprocessor};
use crate::domain::{task::GlueTask, traits::ExampleSource};
use crate::infra::{checkpoint::CheckpointManager, tokenizer_store::TokenizerStore};
use crate::ml::evaluator::{run_evaluation, EvalSummary};

pub struct EvalUseCase {
    ckpt_manager: CheckpointManager,
    /// Overrides the data directory stored in the run's config
    data_dir:     Option<String>,
    batch_size:   Option<usize>,
}

impl EvalUseCase {
    pub fn new(checkpoint_dir: String, data_dir: Option<String>, batch_size: Option<usize>) -> Self {
        Self {
            ckpt_manager: CheckpointManager::new(checkpoint_dir, false),
            data_dir,
            batch_size,
        }
    }

    pub fn execute(&self) -> Result<(GlueTask, EvalSummary)> {
        // ── Step 1: Run configuration ─────────────────────────────────────────
        let cfg = self.ckpt_manager.load_config()?;
        let task: GlueTask = cfg.task.parse()?;
        match self.ckpt_manager.latest_epoch() {
            Ok(epoch) => tracing::info!("Run stopped after epoch {} of {}", epoch, cfg.epochs),
            Err(err)  => tracing::warn!("No epoch marker in the checkpoint dir: {err:#}"),
        }

        // ── Step 2: Tokenizer ─────────────────────────────────────────────────
        let tokenizer_path = cfg
            .tokenizer
            .as_deref()
            .context("train_config.json does not record a tokenizer path")?;
        let tokenizer = TokenizerStore::new(tokenizer_path).load()?;

        // ── Step 3: Dev split ─────────────────────────────────────────────────
        let data_dir = self.data_dir.as_deref().unwrap_or(&cfg.data_dir);
        let examples = GlueLoader::new(data_dir, task).dev_examples()?;
        let samples  = Preprocessor::new(tokenizer, task, cfg.max_seq_len)?.encode_all(&examples)?;
        tracing::info!("Evaluating {} on {} dev examples", task, samples.len());

        // ── Step 4: Evaluate the best checkpoint ──────────────────────────────
        let batch_size = self.batch_size.unwrap_or(cfg.batch_size);
        let summary = run_evaluation(task, GlueDataset::new(samples), batch_size, &self.ckpt_manager)?;
        Ok((task, summary))
    }
}
