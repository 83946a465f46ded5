// ============================================================
// Layer 3 — Domain Errors
// ============================================================
// Typed failures the training core can raise. Everything
// outside the core (file I/O, tokenizer loading, CLI) keeps
// using anyhow, and these convert into anyhow::Error via `?`.
//
//   UnknownTask        — task identifier not in the metric table
//   Configuration      — fatal setup or contract violation
//   NumericInstability — loss became NaN/inf, step is skipped
//   DataExhausted      — empty evaluation set
//   MissingMetric      — metric record lacks the selected field
//   LengthMismatch     — predictions and labels differ in length

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DistillError {
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("non-finite loss ({value}) at step {step}")]
    NumericInstability { step: usize, value: f64 },

    #[error("no samples in {0}")]
    DataExhausted(String),

    #[error("metric record for '{task}' has no '{field}' entry")]
    MissingMetric { task: String, field: &'static str },

    #[error("{predictions} predictions but {labels} labels")]
    LengthMismatch { predictions: usize, labels: usize },
}

impl DistillError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// True for failures that abort a single step but not the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NumericInstability { .. })
    }
}

pub type DistillResult<T> = std::result::Result<T, DistillError>;
