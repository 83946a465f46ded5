// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training metrics to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch:        the epoch number (1, 2, 3, ...)
//   - lr:           learning rate used for that epoch
//   - train_loss:   sample-weighted mean loss over training steps
//   - train_metric: sample-weighted mean of the per-step task metric
//   - val_loss:     mean task loss on the dev set
//   - val_metric:   task metric over the whole dev set
//   - is_best:      whether this epoch produced the best checkpoint
//
// Output file: checkpoints/metrics.csv
//
//   epoch,lr,train_loss,train_metric,val_loss,val_metric,is_best
//   1,0.100000,0.693100,0.512000,0.688000,0.540000,true
//   2,0.090451,0.642000,0.604000,0.671000,0.532000,false

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

const HEADER: &str = "epoch,lr,train_loss,train_metric,val_loss,val_metric,is_best";

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:        usize,
    pub lr:           f64,
    pub train_loss:   f64,
    pub train_metric: f64,
    pub val_loss:     f64,
    pub val_metric:   f64,
    pub is_best:      bool,
}

impl EpochMetrics {
    fn to_csv_row(&self) -> String {
        format!(
            "{},{:.6},{:.6},{:.6},{:.6},{:.6},{}",
            self.epoch,
            self.lr,
            self.train_loss,
            self.train_metric,
            self.val_loss,
            self.val_metric,
            self.is_best,
        )
    }
}

/// Appends epoch metrics to `metrics.csv`.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet, so a resumed
    /// run keeps appending to the same log.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;
        let csv_path = dir.join("metrics.csv");

        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }
        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;
        writeln!(f, "{}", m.to_csv_row())?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_metric={:.4}",
            m.epoch,
            m.train_loss,
            m.val_metric,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
