// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// Seams the application layer programs against. Burn-specific
// seams (networks, layer matcher, checkpoint sink) live in the
// ml and infra layers; the ones here are framework-free.

use anyhow::Result;

use crate::domain::example::GlueExample;

// ─── ExampleSource ────────────────────────────────────────────────────────────
/// Anything that can produce the train and evaluation examples of a task.
///
/// Implementations:
///   - GlueLoader → reads `<data_dir>/train.tsv` and the task's dev file
pub trait ExampleSource {
    fn train_examples(&self) -> Result<Vec<GlueExample>>;

    fn dev_examples(&self) -> Result<Vec<GlueExample>>;
}
