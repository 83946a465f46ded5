// ============================================================
// Layer 5 — Network Contracts
// ============================================================
// What the trainer needs from the student and the teacher,
// independent of their architecture:
//
//   ClassifierNetwork  — forward a batch into logits plus an
//                        optional stack of per-layer outputs,
//                        and declare the head's output mode
//   StudentNetwork     — a trainable ClassifierNetwork that also
//                        accepts a drop-path probability
//   FrozenTeacher      — a ClassifierNetwork on the inner
//                        (non-autodiff) backend. Its outputs are
//                        lifted into the training graph as
//                        constants, so it can never receive a
//                        gradient.
//
// Layer outputs come in two shapes, told apart by variant:
//
//   LayerStack::Merged   one [batch, seq, hidden] per layer
//   LayerStack::PerHead  one Vec of [batch, seq, head_dim] per layer

use std::{fmt, str::FromStr};

use burn::{
    module::AutodiffModule,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::GlueBatch;
use crate::domain::error::{DistillError, DistillResult};
use crate::domain::task::OutputMode;

// ─── Outputs ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub enum LayerStack<B: Backend> {
    Merged(Vec<Tensor<B, 3>>),
    PerHead(Vec<Vec<Tensor<B, 3>>>),
}

impl<B: Backend> LayerStack<B> {
    pub fn len(&self) -> usize {
        match self {
            Self::Merged(layers)  => layers.len(),
            Self::PerHead(layers) => layers.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lift<A: AutodiffBackend<InnerBackend = B>>(self) -> LayerStack<A> {
        match self {
            Self::Merged(layers) => {
                LayerStack::Merged(layers.into_iter().map(Tensor::from_inner).collect())
            }
            Self::PerHead(layers) => LayerStack::PerHead(
                layers
                    .into_iter()
                    .map(|heads| heads.into_iter().map(Tensor::from_inner).collect())
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetworkOutput<B: Backend> {
    /// [batch, num_labels]
    pub logits: Tensor<B, 2>,
    pub layers: Option<LayerStack<B>>,
}

impl<B: Backend> NetworkOutput<B> {
    /// Move an inner-backend output into an autodiff graph as a constant.
    pub fn lift<A: AutodiffBackend<InnerBackend = B>>(self) -> NetworkOutput<A> {
        NetworkOutput {
            logits: Tensor::from_inner(self.logits),
            layers: self.layers.map(LayerStack::lift),
        }
    }
}

// ─── Traits ───────────────────────────────────────────────────────────────────
pub trait ClassifierNetwork<B: Backend> {
    fn forward_batch(&self, batch: &GlueBatch<B>) -> NetworkOutput<B>;

    fn output_mode(&self) -> OutputMode;
}

pub trait StudentNetwork<B: AutodiffBackend>: ClassifierNetwork<B> + AutodiffModule<B> {
    fn set_drop_path_prob(&mut self, prob: f64);
}

// ─── Teacher ──────────────────────────────────────────────────────────────────
/// Architecture family of the teacher. Only BERT-style teachers were
/// trained with token-type embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeacherFamily {
    Bert,
    Roberta,
    Gpt2,
}

impl TeacherFamily {
    pub fn uses_segment_ids(&self) -> bool {
        matches!(self, Self::Bert)
    }
}

impl FromStr for TeacherFamily {
    type Err = DistillError;

    fn from_str(s: &str) -> DistillResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bert"    => Ok(Self::Bert),
            "roberta" => Ok(Self::Roberta),
            "gpt2"    => Ok(Self::Gpt2),
            other => Err(DistillError::config(format!("unknown teacher type '{other}'"))),
        }
    }
}

impl fmt::Display for TeacherFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bert    => "bert",
            Self::Roberta => "roberta",
            Self::Gpt2    => "gpt2",
        };
        f.write_str(name)
    }
}

pub struct FrozenTeacher<B: Backend> {
    network: Box<dyn ClassifierNetwork<B>>,
    family:  TeacherFamily,
}

impl<B: Backend> FrozenTeacher<B> {
    pub fn new(network: Box<dyn ClassifierNetwork<B>>, family: TeacherFamily) -> Self {
        Self { network, family }
    }

    pub fn family(&self) -> TeacherFamily {
        self.family
    }

    pub fn output_mode(&self) -> OutputMode {
        self.network.output_mode()
    }

    /// Run the teacher on the inner copy of a training batch.
    pub fn forward<A>(&self, batch: &GlueBatch<A>) -> NetworkOutput<A>
    where
        A: AutodiffBackend<InnerBackend = B>,
    {
        let inner = batch.inner();
        let inner = if self.family.uses_segment_ids() { inner } else { inner.without_segments() };
        self.network.forward_batch(&inner).lift()
    }
}
