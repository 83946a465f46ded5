// ============================================================
// Layer 4 — GLUE TSV Loader
// ============================================================
// Reads a task's train and dev splits from the standard GLUE
// directory layout:
//
//   <data_dir>/
//     train.tsv
//     dev.tsv                ← most tasks
//     dev_matched.tsv        ← mnli
//     dev_mismatched.tsv     ← mnli-mm
//
// Each task stores its sentences and label in different
// columns; `parse_row` knows the layout of every task:
//
//   cola     no header   sentence=3           label=1
//   sst-2    header      sentence=0           label=1
//   books    header      sentence=0           label=1
//   mrpc     header      a=3   b=4            label=0
//   qqp      header      a=3   b=4            label=5
//   sts-b    header      a=7   b=8            label=last
//   mnli(-mm)header      a=8   b=9            label=last
//   qnli/rte header      a=1   b=2            label=last
//
// Quote characters are not special: GLUE files are split on
// tabs only.

use anyhow::{Context, Result};
use std::{fs, path::{Path, PathBuf}};

use crate::domain::example::GlueExample;
use crate::domain::task::GlueTask;
use crate::domain::traits::ExampleSource;

pub struct GlueLoader {
    dir:  PathBuf,
    task: GlueTask,
}

impl GlueLoader {
    pub fn new(dir: impl Into<PathBuf>, task: GlueTask) -> Self {
        Self { dir: dir.into(), task }
    }

    fn train_file(&self) -> PathBuf {
        self.dir.join("train.tsv")
    }

    fn dev_file(&self) -> PathBuf {
        let name = match self.task {
            GlueTask::Mnli   => "dev_matched.tsv",
            GlueTask::MnliMm => "dev_mismatched.tsv",
            _                => "dev.tsv",
        };
        self.dir.join(name)
    }

    fn read_split(&self, path: &Path, split: &str) -> Result<Vec<GlueExample>> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Cannot read {} split from '{}'", split, path.display()))?;

        let skip = usize::from(has_header(self.task));
        let mut examples = Vec::new();
        for (i, line) in text.lines().enumerate().skip(skip) {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let guid = format!("{split}-{i}");
            let example = parse_row(self.task, &fields, &guid).with_context(|| {
                format!("Malformed row {} in '{}'", i + 1, path.display())
            })?;
            examples.push(example);
        }

        tracing::info!("Loaded {} {} examples from '{}'", examples.len(), split, path.display());
        Ok(examples)
    }
}

impl ExampleSource for GlueLoader {
    fn train_examples(&self) -> Result<Vec<GlueExample>> {
        self.read_split(&self.train_file(), "train")
    }

    fn dev_examples(&self) -> Result<Vec<GlueExample>> {
        self.read_split(&self.dev_file(), "dev")
    }
}

fn has_header(task: GlueTask) -> bool {
    task != GlueTask::Cola
}

fn parse_row(task: GlueTask, fields: &[&str], guid: &str) -> Result<GlueExample> {
    let col = |i: usize| -> Result<String> {
        fields
            .get(i)
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("{guid}: expected column {i}, row has {}", fields.len()))
    };
    let last = || -> Result<String> { col(fields.len().saturating_sub(1)) };

    let example = match task {
        GlueTask::Cola =>
            GlueExample::new(guid, col(3)?, None, col(1)?),
        GlueTask::Sst2 | GlueTask::Books =>
            GlueExample::new(guid, col(0)?, None, col(1)?),
        GlueTask::Mrpc =>
            GlueExample::new(guid, col(3)?, Some(col(4)?), col(0)?),
        GlueTask::Qqp =>
            GlueExample::new(guid, col(3)?, Some(col(4)?), col(5)?),
        GlueTask::StsB =>
            GlueExample::new(guid, col(7)?, Some(col(8)?), last()?),
        GlueTask::Mnli | GlueTask::MnliMm =>
            GlueExample::new(guid, col(8)?, Some(col(9)?), last()?),
        GlueTask::Qnli | GlueTask::Rte =>
            GlueExample::new(guid, col(1)?, Some(col(2)?), last()?),
    };
    Ok(example)
}

/// Class names in label-index order. Empty for regression tasks.
pub fn label_list(task: GlueTask) -> &'static [&'static str] {
    match task {
        GlueTask::Mnli | GlueTask::MnliMm => &["contradiction", "entailment", "neutral"],
        GlueTask::Qnli | GlueTask::Rte    => &["entailment", "not_entailment"],
        GlueTask::StsB                    => &[],
        _                                 => &["0", "1"],
    }
}

/// Numeric training target for a raw label string.
pub fn label_value(task: GlueTask, label: &str) -> Result<f32> {
    let label = label.trim();
    if task == GlueTask::StsB {
        return label
            .parse::<f32>()
            .with_context(|| format!("'{label}' is not a similarity score"));
    }
    label_list(task)
        .iter()
        .position(|l| *l == label)
        .map(|i| i as f32)
        .ok_or_else(|| anyhow::anyhow!("'{label}' is not a {task} label"))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_layouts() {
        let cola = parse_row(GlueTask::Cola, &["gj04", "1", "", "The sailors rode."], "t").unwrap();
        assert_eq!(cola.text_a, "The sailors rode.");
        assert_eq!(cola.label, "1");
        assert!(cola.text_b.is_none());

        let rte = parse_row(GlueTask::Rte, &["0", "premise", "hypothesis", "entailment"], "t").unwrap();
        assert_eq!(rte.text_b.as_deref(), Some("hypothesis"));
        assert_eq!(rte.label, "entailment");

        let mrpc = parse_row(GlueTask::Mrpc, &["1", "a", "b", "s1", "s2"], "t").unwrap();
        assert_eq!((mrpc.text_a.as_str(), mrpc.label.as_str()), ("s1", "1"));
    }

    #[test]
    fn test_short_row_is_an_error() {
        assert!(parse_row(GlueTask::Qqp, &["1", "2"], "t").is_err());
    }

    #[test]
    fn test_label_values() {
        assert_eq!(label_value(GlueTask::Mnli, "neutral").unwrap(), 2.0);
        assert_eq!(label_value(GlueTask::StsB, "3.800").unwrap(), 3.8);
        assert!(label_value(GlueTask::Sst2, "positive").is_err());
    }

    #[test]
    fn test_reads_split_with_header() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("train.tsv"), "sentence\tlabel\ngood film\t1\n\nbad film\t0\n").unwrap();
        fs::write(dir.path().join("dev.tsv"), "sentence\tlabel\nfine\t1\n").unwrap();

        let loader = GlueLoader::new(dir.path(), GlueTask::Sst2);
        let train  = loader.train_examples().unwrap();
        assert_eq!(train.len(), 2);
        assert_eq!(train[1].text_a, "bad film");
        assert_eq!(loader.dev_examples().unwrap().len(), 1);
    }
}
