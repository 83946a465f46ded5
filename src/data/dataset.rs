use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

/// One tokenised, padded example. Every sequence field has length max_seq_len.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlueSample {
    pub input_ids:   Vec<u32>,
    pub input_mask:  Vec<u32>,
    pub segment_ids: Vec<u32>,
    /// Class index (classification) or similarity score (regression)
    pub label:       f32,
    /// Number of non-padding tokens
    pub seq_length:  usize,
}

pub struct GlueDataset {
    samples: Vec<GlueSample>,
}

impl GlueDataset {
    pub fn new(samples: Vec<GlueSample>) -> Self { Self { samples } }

    pub fn sample_count(&self) -> usize { self.samples.len() }

    /// Batches per epoch for a given batch size, counting the ragged tail.
    pub fn batch_count(&self, batch_size: usize) -> usize {
        self.samples.len().div_ceil(batch_size.max(1))
    }
}

impl Dataset<GlueSample> for GlueDataset {
    fn get(&self, index: usize) -> Option<GlueSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
