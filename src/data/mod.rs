// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// From GLUE TSV files to device tensor batches:
//
//   train.tsv / dev.tsv
//       │
//       ▼
//   GlueLoader        → rows → GlueExample (task column layout)
//       │
//       ▼
//   Preprocessor      → clean + tokenise + pad → GlueSample
//       │
//       ▼
//   GlueDataset       → Burn Dataset
//       │
//       ▼
//   GlueBatcher       → GlueBatch tensors
//       │
//       ▼
//   DataLoader        → batches for the trainer (one prefetch worker)

/// Reads a task's TSV splits
pub mod loader;

/// Cleans and tokenises examples into fixed-length samples
pub mod preprocessor;

/// Implements Burn's Dataset trait for GLUE samples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
