// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn-specific code lives here. Other layers only see
// the summaries this layer returns.
//
//   network.rs   — network traits, layer stacks, the frozen teacher
//   model.rs     — transformer encoder classifier (student and teacher)
//   attention.rs — attention maps recovered from hidden states
//   emd.rs       — Earth Mover's Distance layer matcher
//   loss.rs      — task loss and the KD blend
//   strategy.rs  — training mode and the composite loss
//   schedule.rs  — cosine learning-rate annealing
//   clip.rs      — joint gradient-norm clipping
//   evaluator.rs — validation pass and GLUE metrics
//   trainer.rs   — the epoch loop, checkpoints and the run wiring

pub mod network;

/// Transformer encoder classifier
pub mod model;

pub mod attention;

/// Many-to-many layer matching via optimal transport
pub mod emd;

pub mod loss;

/// Supervised / KD / KD + matching loss assembly
pub mod strategy;

pub mod schedule;

pub mod clip;

pub mod evaluator;

/// Training loop with validation and checkpointing
pub mod trainer;
