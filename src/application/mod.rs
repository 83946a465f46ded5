// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// one goal each: train a student, or evaluate a trained one.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - Only workflow coordination

// The distillation training workflow
pub mod train_use_case;

// Re-evaluation of a finished run's best checkpoint
pub mod eval_use_case;
