// ============================================================
// Layer 5 — Representation-to-Attention Converter
// ============================================================
// Turns per-layer hidden states into self-attention maps:
//
//   score  = Q · Kᵀ / √dim          (Q = K = the layer output)
//   bias   = (1 - mask) · -10000    broadcast over query rows
//   attn   = softmax(score + bias)  along the key axis
//
// Padded query rows still get a valid distribution; only
// padded key columns are suppressed.
//
// The same stack type also carries raw representations to the
// layer matcher when attention conversion is switched off.

use burn::{prelude::*, tensor::activation::softmax};

use crate::ml::network::LayerStack;

const MASK_BIAS: f32 = -10_000.0;

/// Per-layer tensors handed to the layer matcher.
///
///   Merged   one [batch, seq, seq] map (or [batch, seq, hidden] state) per layer
///   PerHead  one [batch, heads, seq, seq] map (or [batch, heads, seq, head_dim]) per layer
#[derive(Debug, Clone)]
pub enum AttentionStack<B: Backend> {
    Merged(Vec<Tensor<B, 3>>),
    PerHead(Vec<Tensor<B, 4>>),
}

impl<B: Backend> AttentionStack<B> {
    pub fn len(&self) -> usize {
        match self {
            Self::Merged(maps)  => maps.len(),
            Self::PerHead(maps) => maps.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: Backend> LayerStack<B> {
    /// Raw representations in matcher form, without attention conversion.
    pub fn into_stacked(self) -> AttentionStack<B> {
        match self {
            Self::Merged(layers)  => AttentionStack::Merged(layers),
            Self::PerHead(layers) => AttentionStack::PerHead(
                layers.into_iter().map(|heads| Tensor::stack(heads, 1)).collect(),
            ),
        }
    }
}

/// Convert every layer of `stack` into an attention map.
///
/// `mask` is [batch, seq] with 1.0 on real tokens and 0.0 on padding.
pub fn to_attention<B: Backend>(stack: LayerStack<B>, mask: Tensor<B, 2>) -> AttentionStack<B> {
    match stack.into_stacked() {
        AttentionStack::Merged(layers) => {
            let bias = key_bias(mask);
            AttentionStack::Merged(
                layers.into_iter().map(|h| merged_attention(h, bias.clone())).collect(),
            )
        }
        AttentionStack::PerHead(layers) => {
            let bias = key_bias(mask);
            AttentionStack::PerHead(
                layers
                    .into_iter()
                    .map(|h| per_head_attention(h, bias.clone().unsqueeze_dim(1)))
                    .collect(),
            )
        }
    }
}

/// [batch, seq] → [batch, 1, seq] additive bias, -10000 on padded keys.
fn key_bias<B: Backend>(mask: Tensor<B, 2>) -> Tensor<B, 3> {
    mask.neg().add_scalar(1.0).mul_scalar(MASK_BIAS).unsqueeze_dim(1)
}

fn merged_attention<B: Backend>(h: Tensor<B, 3>, bias: Tensor<B, 3>) -> Tensor<B, 3> {
    let [batch, seq, dim] = h.dims();
    let scores = h.clone().matmul(h.swap_dims(1, 2)).div_scalar((dim as f64).sqrt());
    softmax(scores + bias.expand([batch, seq, seq]), 2)
}

fn per_head_attention<B: Backend>(h: Tensor<B, 4>, bias: Tensor<B, 4>) -> Tensor<B, 4> {
    let [batch, heads, seq, dim] = h.dims();
    let scores = h.clone().matmul(h.swap_dims(2, 3)).div_scalar((dim as f64).sqrt());
    softmax(scores + bias.expand([batch, heads, seq, seq]), 3)
}
