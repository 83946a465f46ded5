// ============================================================
// Layer 3 — Tasks and Metric Dispatch
// ============================================================
// Every benchmark task the trainer understands, together with
// the facts the rest of the system needs about it:
//
//   • output mode   — classification head or regression head
//   • label count   — width of the logits
//   • metric field  — which entry of the metric record drives
//                     best-model selection
//
//   | task family                               | field  |
//   |-------------------------------------------|--------|
//   | cola                                      | mcc    |
//   | sst-2, mnli, mnli-mm, qnli, rte, books    | acc    |
//   | mrpc, qqp                                 | f1     |
//   | sts-b                                     | corr   |
//
// Anything else is an UnknownTask error. A silent default here
// would pick the wrong checkpoint as "best".

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::domain::error::{DistillError, DistillResult};

/// Metric name → value, as produced by `domain::metrics::compute_metrics`.
pub type MetricRecord = BTreeMap<String, f64>;

// ─── OutputMode ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Classification,
    Regression,
}

impl FromStr for OutputMode {
    type Err = DistillError;

    fn from_str(s: &str) -> DistillResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "classification" => Ok(Self::Classification),
            "regression"     => Ok(Self::Regression),
            other => Err(DistillError::config(format!("unrecognized output mode '{other}'"))),
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classification => f.write_str("classification"),
            Self::Regression     => f.write_str("regression"),
        }
    }
}

// ─── GlueTask ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlueTask {
    Cola,
    Sst2,
    Mnli,
    MnliMm,
    Qnli,
    Rte,
    Books,
    Mrpc,
    Qqp,
    StsB,
}

impl GlueTask {
    pub const ALL: [GlueTask; 10] = [
        Self::Cola, Self::Sst2, Self::Mnli, Self::MnliMm, Self::Qnli,
        Self::Rte, Self::Books, Self::Mrpc, Self::Qqp, Self::StsB,
    ];

    /// Canonical lower-case identifier, e.g. `sst-2`.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Cola   => "cola",
            Self::Sst2   => "sst-2",
            Self::Mnli   => "mnli",
            Self::MnliMm => "mnli-mm",
            Self::Qnli   => "qnli",
            Self::Rte    => "rte",
            Self::Books  => "books",
            Self::Mrpc   => "mrpc",
            Self::Qqp    => "qqp",
            Self::StsB   => "sts-b",
        }
    }

    pub fn output_mode(&self) -> OutputMode {
        match self {
            Self::StsB => OutputMode::Regression,
            _          => OutputMode::Classification,
        }
    }

    /// Width of the logits the student must produce.
    pub fn num_labels(&self) -> usize {
        match self {
            Self::Mnli | Self::MnliMm => 3,
            Self::StsB                => 1,
            _                         => 2,
        }
    }

    /// The field of the metric record used for reporting and best-model selection.
    pub fn metric_field(&self) -> &'static str {
        match self {
            Self::Cola => "mcc",
            Self::Sst2 | Self::Mnli | Self::MnliMm | Self::Qnli | Self::Rte | Self::Books => "acc",
            Self::Mrpc | Self::Qqp => "f1",
            Self::StsB => "corr",
        }
    }

    /// Pull this task's headline metric out of a metric record.
    pub fn select(&self, record: &MetricRecord) -> DistillResult<f64> {
        let field = self.metric_field();
        record.get(field).copied().ok_or_else(|| DistillError::MissingMetric {
            task:  self.id().to_string(),
            field,
        })
    }
}

impl FromStr for GlueTask {
    type Err = DistillError;

    fn from_str(s: &str) -> DistillResult<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.id() == lowered)
            .ok_or(DistillError::UnknownTask(lowered))
    }
}

impl fmt::Display for GlueTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch_metric(task_id: &str, record: &MetricRecord) -> DistillResult<f64> {
        task_id.parse::<GlueTask>()?.select(record)
    }

    fn full_record() -> MetricRecord {
        [("acc", 0.1), ("f1", 0.2), ("mcc", 0.3), ("corr", 0.4), ("pearson", 0.5)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_dispatch_table_is_complete() {
        let record = full_record();
        let expected = [
            ("cola", 0.3),
            ("sst-2", 0.1), ("mnli", 0.1), ("mnli-mm", 0.1),
            ("qnli", 0.1), ("rte", 0.1), ("books", 0.1),
            ("mrpc", 0.2), ("qqp", 0.2),
            ("sts-b", 0.4),
        ];
        for (task, value) in expected {
            assert_eq!(dispatch_metric(task, &record).unwrap(), value, "task {task}");
        }
    }

    #[test]
    fn test_unknown_task_is_an_error() {
        let err = dispatch_metric("wnli", &full_record()).unwrap_err();
        assert_eq!(err, DistillError::UnknownTask("wnli".into()));
        assert!(matches!(
            dispatch_metric("", &full_record()),
            Err(DistillError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_task_ids_are_case_insensitive() {
        assert_eq!("SST-2".parse::<GlueTask>().unwrap(), GlueTask::Sst2);
        assert_eq!("CoLA".parse::<GlueTask>().unwrap(), GlueTask::Cola);
    }

    #[test]
    fn test_missing_field_is_reported() {
        let mut record = full_record();
        record.remove("mcc");
        assert!(matches!(
            GlueTask::Cola.select(&record),
            Err(DistillError::MissingMetric { field: "mcc", .. })
        ));
    }

    #[test]
    fn test_regression_only_for_stsb() {
        for task in GlueTask::ALL {
            let expect = if task == GlueTask::StsB {
                OutputMode::Regression
            } else {
                OutputMode::Classification
            };
            assert_eq!(task.output_mode(), expect);
        }
        assert!("ranking".parse::<OutputMode>().is_err());
    }
}
