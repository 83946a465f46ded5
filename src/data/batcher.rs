// ============================================================
// Layer 4 — GLUE Batcher
// ============================================================
// Implements Burn's Batcher trait to stack GlueSamples into
// device tensors:
//
//   input_ids    [batch, seq]  Int
//   input_mask   [batch, seq]  Int   1 = token, 0 = padding
//   segment_ids  [batch, seq]  Int
//   labels       [batch]       Float class index or score
//   seq_lengths  [batch]       Int
//
// Samples are pre-padded to the same length, so stacking is a
// flatten + reshape.

use std::sync::Arc;

use burn::{
    data::dataloader::{batcher::Batcher, DataLoader},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::dataset::GlueSample;

#[derive(Debug, Clone)]
pub struct GlueBatch<B: Backend> {
    pub input_ids:   Tensor<B, 2, Int>,
    pub input_mask:  Tensor<B, 2, Int>,
    pub segment_ids: Tensor<B, 2, Int>,
    pub labels:      Tensor<B, 1>,
    pub seq_lengths: Tensor<B, 1, Int>,
}

impl<B: Backend> GlueBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.input_ids.dims()[0]
    }

    /// Mask as floats, for the attention bias.
    pub fn float_mask(&self) -> Tensor<B, 2> {
        self.input_mask.clone().float()
    }

    /// Copy of the batch with every segment id set to 0, for models
    /// that have no token-type embedding (RoBERTa, GPT-2).
    pub fn without_segments(&self) -> Self {
        Self {
            segment_ids: self.segment_ids.zeros_like(),
            ..self.clone()
        }
    }
}

impl<B: AutodiffBackend> GlueBatch<B> {
    /// Same batch on the inner backend, outside the autodiff graph.
    pub fn inner(&self) -> GlueBatch<B::InnerBackend> {
        GlueBatch {
            input_ids:   self.input_ids.clone().inner(),
            input_mask:  self.input_mask.clone().inner(),
            segment_ids: self.segment_ids.clone().inner(),
            labels:      self.labels.clone().inner(),
            seq_lengths: self.seq_lengths.clone().inner(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GlueBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> GlueBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<GlueSample, GlueBatch<B>> for GlueBatcher<B> {
    fn batch(&self, items: Vec<GlueSample>) -> GlueBatch<B> {
        let batch_size = items.len();
        let seq_len    = items[0].input_ids.len();

        let flatten = |field: fn(&GlueSample) -> &Vec<u32>| -> Tensor<B, 2, Int> {
            let flat: Vec<i32> = items
                .iter()
                .flat_map(|s| field(s).iter().map(|&x| x as i32))
                .collect();
            Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &self.device)
                .reshape([batch_size, seq_len])
        };

        let input_ids   = flatten(|s| &s.input_ids);
        let input_mask  = flatten(|s| &s.input_mask);
        let segment_ids = flatten(|s| &s.segment_ids);

        let labels: Vec<f32> = items.iter().map(|s| s.label).collect();
        let lengths: Vec<i32> = items.iter().map(|s| s.seq_length as i32).collect();

        GlueBatch {
            input_ids,
            input_mask,
            segment_ids,
            labels:      Tensor::<B, 1>::from_floats(labels.as_slice(), &self.device),
            seq_lengths: Tensor::<B, 1, Int>::from_ints(lengths.as_slice(), &self.device),
        }
    }
}

/// Anything the trainer can walk once per epoch. Restartable: every
/// call to `batches` starts a fresh pass.
pub trait BatchSource<B: Backend> {
    fn batches(&self) -> Box<dyn Iterator<Item = GlueBatch<B>> + '_>;
}

impl<B: Backend> BatchSource<B> for Arc<dyn DataLoader<GlueBatch<B>>> {
    fn batches(&self) -> Box<dyn Iterator<Item = GlueBatch<B>> + '_> {
        Box::new(self.iter())
    }
}

impl<B: Backend> BatchSource<B> for Vec<GlueBatch<B>> {
    fn batches(&self) -> Box<dyn Iterator<Item = GlueBatch<B>> + '_> {
        Box::new(self.iter().cloned())
    }
}
