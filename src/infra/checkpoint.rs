// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores encoder weights using Burn's CompactRecorder.
//
// Directory layout:
//   checkpoints/
//     checkpoint.mpk       ← weights after the latest epoch
//     best.mpk             ← weights of the best validation epoch
//     latest_epoch.json    ← number of the latest saved epoch
//     encoder_config.json  ← architecture needed to rebuild the model
//     train_config.json    ← the full run configuration
//     metrics.csv          ← one row per epoch (infra::metrics)
//
// A checkpoint directory doubles as a teacher directory: a teacher
// is rebuilt from encoder_config.json and best.mpk.
//
// Only the writer process (rank 0) touches the disk; every other
// rank gets a manager whose saves are no-ops.

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::model::{EncoderClassifier, EncoderConfig, LayerOutput};

const LATEST: &str = "checkpoint";
const BEST: &str = "best";
const ENCODER_CONFIG: &str = "encoder_config.json";
const TRAIN_CONFIG: &str = "train_config.json";
const LATEST_EPOCH: &str = "latest_epoch.json";

/// Receives the model at the end of every epoch.
pub trait CheckpointSink<M> {
    fn save_checkpoint(&self, model: &M, epoch: usize, is_best: bool) -> Result<()>;
}

pub struct CheckpointManager {
    dir:    PathBuf,
    writer: bool,
}

impl CheckpointManager {
    /// `writer` is false on every process except rank 0.
    pub fn new(dir: impl Into<PathBuf>, writer: bool) -> Self {
        let dir = dir.into();
        if writer {
            // create_dir_all behaves like `mkdir -p`; a failure shows up on the first save
            fs::create_dir_all(&dir).ok();
        }
        Self { dir, writer }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_writer(&self) -> bool {
        self.writer
    }

    /// Save the latest weights, and a copy as "best" when `is_best`.
    pub fn save_model<B: Backend>(
        &self,
        model:   &EncoderClassifier<B>,
        epoch:   usize,
        is_best: bool,
    ) -> Result<()> {
        if !self.writer {
            return Ok(());
        }
        self.record(model, LATEST)?;
        if is_best {
            self.record(model, BEST)?;
        }

        let latest_path = self.dir.join(LATEST_EPOCH);
        fs::write(&latest_path, serde_json::to_string(&epoch)?)
            .with_context(|| format!("Failed to write {LATEST_EPOCH}"))?;

        tracing::debug!("Saved checkpoint: epoch {} (best={})", epoch, is_best);
        Ok(())
    }

    fn record<B: Backend>(&self, model: &EncoderClassifier<B>, name: &str) -> Result<()> {
        // Path without extension, the recorder adds it
        let path = self.dir.join(name);
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))
    }

    /// Rebuild the best model of a finished run.
    pub fn load_best<B: Backend>(
        &self,
        layer_output: LayerOutput,
        device:       &B::Device,
    ) -> Result<(EncoderClassifier<B>, EncoderConfig)> {
        load_encoder(&self.dir, layer_output, device)
    }

    pub fn save_encoder_config(&self, cfg: &EncoderConfig) -> Result<()> {
        self.write_json(ENCODER_CONFIG, cfg)
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        self.write_json(TRAIN_CONFIG, cfg)
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(TRAIN_CONFIG);
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. Make sure you have run 'train' before 'eval'.",
                path.display()
            )
        })?;
        serde_json::from_str(&json)
            .with_context(|| format!("'{}' is not a valid training config", path.display()))
    }

    /// Epoch number of the most recent save.
    pub fn latest_epoch(&self) -> Result<usize> {
        let path = self.dir.join(LATEST_EPOCH);
        let s = fs::read_to_string(&path)
            .with_context(|| format!("Cannot find '{LATEST_EPOCH}'. Have you run 'train' first?"))?;
        Ok(serde_json::from_str::<usize>(&s)?)
    }

    fn write_json<T: serde::Serialize>(&self, name: &str, value: &T) -> Result<()> {
        if !self.writer {
            return Ok(());
        }
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write '{}'", path.display()))?;
        tracing::debug!("Saved '{}'", path.display());
        Ok(())
    }
}

impl<B: Backend> CheckpointSink<EncoderClassifier<B>> for CheckpointManager {
    fn save_checkpoint(&self, model: &EncoderClassifier<B>, epoch: usize, is_best: bool) -> Result<()> {
        self.save_model(model, epoch, is_best)
    }
}

/// Rebuild an encoder from a checkpoint directory: the architecture from
/// encoder_config.json, the weights from best.mpk. `layer_output` overrides
/// the stored setting so a teacher can expose the layers the student needs.
pub fn load_encoder<B: Backend>(
    dir:          impl AsRef<Path>,
    layer_output: LayerOutput,
    device:       &B::Device,
) -> Result<(EncoderClassifier<B>, EncoderConfig)> {
    let dir  = dir.as_ref();
    let path = dir.join(ENCODER_CONFIG);
    let json = fs::read_to_string(&path)
        .with_context(|| format!("Cannot read encoder config '{}'", path.display()))?;
    let cfg: EncoderConfig = serde_json::from_str(&json)
        .with_context(|| format!("'{}' is not a valid encoder config", path.display()))?;
    let cfg = cfg.with_layer_output(layer_output);

    let weights = dir.join(BEST);
    let record = CompactRecorder::new()
        .load(weights.clone(), device)
        .with_context(|| format!("Cannot load weights '{}'", weights.display()))?;
    let model = cfg.init::<B>(device).load_record(record);
    Ok((model, cfg))
}
