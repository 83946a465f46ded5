// ============================================================
// Layer 3 — GlueExample Domain Type
// ============================================================
// One labelled example as read from a task's TSV file, before
// tokenisation. Single-sentence tasks (cola, sst-2, books) leave
// `text_b` empty; pair tasks fill both sides.
//
// The label stays a string here: class names ("entailment"),
// digits ("1") or scores ("3.800") depending on the task. The
// data layer maps it to a number with the task's label list.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlueExample {
    /// `<split>-<line>` identifier, handy in error messages
    pub guid: String,

    pub text_a: String,

    pub text_b: Option<String>,

    pub label: String,
}

impl GlueExample {
    pub fn new(
        guid:   impl Into<String>,
        text_a: impl Into<String>,
        text_b: Option<String>,
        label:  impl Into<String>,
    ) -> Self {
        Self {
            guid:   guid.into(),
            text_a: text_a.into(),
            text_b,
            label:  label.into(),
        }
    }
}
