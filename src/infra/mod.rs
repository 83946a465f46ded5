// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Disk-facing concerns shared by the other layers:
//
//   checkpoint.rs      — model records (Burn CompactRecorder),
//                        encoder and run configs as JSON, and
//                        loading a teacher from its directory
//
//   tokenizer_store.rs — locating and loading the tokenizer.json
//                        shared by teacher and student
//
//   metrics.rs         — per-epoch metrics appended to metrics.csv

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Tokenizer lookup and loading
pub mod tokenizer_store;

/// Training metrics CSV logger
pub mod metrics;
