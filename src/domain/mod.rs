// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types and rules with no Burn types, no file I/O:
//
//   task.rs     — task table, output modes, metric dispatch
//   metrics.rs  — accuracy / F1 / MCC / correlation records
//   average.rs  — weighted running mean for losses and metrics
//   best.rs     — best-metric tracking across epochs
//   error.rs    — typed errors of the training core
//   example.rs  — a labelled text example
//   traits.rs   — framework-free seams

pub mod average;
pub mod best;
pub mod error;
pub mod example;
pub mod metrics;
pub mod task;
pub mod traits;
