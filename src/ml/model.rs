// ============================================================
// Layer 5 — Encoder Classifier
// ============================================================
// BERT-style encoder used for both sides of distillation:
// token + position + segment embeddings, N post-norm encoder
// blocks with stochastic depth on each residual branch, and a
// pooled [CLS] head producing class logits or a single score.
//
// Per-layer hidden states are exposed on request, either as one
// tensor per layer or split into per-head slices.

use burn::{
    module::Param,
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::{backend::AutodiffBackend, Distribution},
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::GlueBatch;
use crate::domain::task::OutputMode;
use crate::ml::network::{ClassifierNetwork, LayerStack, NetworkOutput, StudentNetwork};

/// Which per-layer outputs the encoder returns next to its logits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerOutput {
    None,
    Merged,
    PerHead,
}

// #[derive(Config)] brings Clone + Serialize/Deserialize along with the
// builder methods, so this is also what lands in encoder_config.json.
#[derive(Config, Debug)]
pub struct EncoderConfig {
    pub vocab_size:  usize,
    pub max_seq_len: usize,
    pub d_model:     usize,
    pub num_heads:   usize,
    pub num_layers:  usize,
    pub d_ff:        usize,
    pub num_labels:  usize,
    pub output_mode: OutputMode,
    #[config(default = 2)]
    pub type_vocab_size: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
    #[config(default = "LayerOutput::None")]
    pub layer_output: LayerOutput,
}

impl EncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EncoderClassifier<B> {
        let token_embedding    = EmbeddingConfig::new(self.vocab_size, self.d_model).init(device);
        let position_embedding = EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device);
        let segment_embedding  = EmbeddingConfig::new(self.type_vocab_size, self.d_model).init(device);
        let layers: Vec<EncoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_encoder_block(device))
            .collect();
        EncoderClassifier {
            token_embedding, position_embedding, segment_embedding,
            embed_norm:     LayerNormConfig::new(self.d_model).init(device),
            layers,
            pooler:         LinearConfig::new(self.d_model, self.d_model).init(device),
            classifier:     LinearConfig::new(self.d_model, self.num_labels).init(device),
            dropout:        DropoutConfig::new(self.dropout).init(),
            num_heads:      self.num_heads,
            regression:     self.output_mode == OutputMode::Regression,
            expose_layers:  self.layer_output != LayerOutput::None,
            per_head:       self.layer_output == LayerOutput::PerHead,
            drop_path_prob: 0.0,
        }
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    /// `mask_pad` is true on padding positions.
    pub fn forward(&self, x: Tensor<B, 3>, mask_pad: Tensor<B, 2, Bool>, drop_path_prob: f64) -> Tensor<B, 3> {
        let attn_input  = MhaInput::self_attn(x.clone()).mask_pad(mask_pad);
        let attn_output = self.self_attn.forward(attn_input).context;
        let attn_output = drop_path(self.dropout.forward(attn_output), drop_path_prob);
        let x = self.norm1.forward(x + attn_output);

        let ffn_out = self.ffn_linear2.forward(
            burn::tensor::activation::gelu(self.ffn_linear1.forward(x.clone()))
        );
        let ffn_out = drop_path(self.dropout.forward(ffn_out), drop_path_prob);
        self.norm2.forward(x + ffn_out)
    }
}

/// Stochastic depth on a residual branch: zero the whole branch for a
/// random subset of samples and rescale the rest. Identity outside training.
fn drop_path<B: Backend>(branch: Tensor<B, 3>, prob: f64) -> Tensor<B, 3> {
    if prob <= 0.0 || !B::ad_enabled() {
        return branch;
    }
    let dims = branch.dims();
    let keep = 1.0 - prob;
    let mask = Tensor::<B, 3>::random([dims[0], 1, 1], Distribution::Bernoulli(keep), &branch.device())
        .div_scalar(keep)
        .expand(dims);
    branch * mask
}

/// Transformer encoder with a pooled [CLS] classification (or regression) head.
/// Serves both as the compact student and, loaded from disk, as the teacher.
#[derive(Module, Debug)]
pub struct EncoderClassifier<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub segment_embedding:  Embedding<B>,
    pub embed_norm:         LayerNorm<B>,
    pub layers:             Vec<EncoderBlock<B>>,
    pub pooler:             Linear<B>,
    pub classifier:         Linear<B>,
    pub dropout:            Dropout,
    pub num_heads:          usize,
    pub regression:         bool,
    pub expose_layers:      bool,
    pub per_head:           bool,
    pub drop_path_prob:     f64,
}

impl<B: Backend> EncoderClassifier<B> {
    /// input_ids, segment_ids, input_mask: [batch, seq_len]
    pub fn forward(
        &self,
        input_ids:   Tensor<B, 2, Int>,
        segment_ids: Tensor<B, 2, Int>,
        input_mask:  Tensor<B, 2, Int>,
    ) -> NetworkOutput<B> {
        let [batch_size, seq_len] = input_ids.dims();
        let device = input_ids.device();

        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let embedded = self.token_embedding.forward(input_ids)
            + self.position_embedding.forward(positions)
            + self.segment_embedding.forward(segment_ids);
        let mut x = self.dropout.forward(self.embed_norm.forward(embedded));

        let mask_pad = input_mask.equal_elem(0);
        let mut merged   = Vec::new();
        let mut per_head = Vec::new();
        for layer in &self.layers {
            x = layer.forward(x, mask_pad.clone(), self.drop_path_prob);
            if self.per_head {
                per_head.push(split_heads(x.clone(), self.num_heads));
            } else if self.expose_layers {
                merged.push(x.clone());
            }
        }

        let [_, _, d_model] = x.dims();
        let cls = x.slice([0..batch_size, 0..1, 0..d_model]).reshape([batch_size, d_model]);
        let pooled = self.pooler.forward(cls).tanh();
        let logits = self.classifier.forward(self.dropout.forward(pooled));

        let layers = match (self.expose_layers, self.per_head) {
            (false, _)    => None,
            (true, true)  => Some(LayerStack::PerHead(per_head)),
            (true, false) => Some(LayerStack::Merged(merged)),
        };
        NetworkOutput { logits, layers }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn token_embedding_dims(&self) -> [usize; 2] {
        self.token_embedding.weight.val().dims()
    }
}

/// [batch, seq, d_model] → num_heads × [batch, seq, d_model / num_heads]
fn split_heads<B: Backend>(x: Tensor<B, 3>, num_heads: usize) -> Vec<Tensor<B, 3>> {
    let [batch_size, seq_len, d_model] = x.dims();
    let head_dim = d_model / num_heads;
    x.reshape([batch_size, seq_len, num_heads, head_dim])
        .swap_dims(1, 2)
        .chunk(num_heads, 1)
        .into_iter()
        .map(|h| h.reshape([batch_size, seq_len, head_dim]))
        .collect()
}

impl<B: AutodiffBackend> EncoderClassifier<B> {
    /// Copy the teacher's token embedding table into the student when the
    /// two tables have the same shape. Returns whether the copy happened.
    pub fn init_token_embedding_from(
        &mut self,
        teacher: &EncoderClassifier<B::InnerBackend>,
    ) -> bool {
        let theirs = teacher.token_embedding_dims();
        if theirs != self.token_embedding_dims() {
            tracing::warn!(
                "Teacher embedding {:?} does not fit student {:?}; keeping random init",
                theirs,
                self.token_embedding_dims()
            );
            return false;
        }
        let weight = Tensor::from_inner(teacher.token_embedding.weight.val());
        self.token_embedding.weight = Param::from_tensor(weight);
        true
    }
}

impl<B: Backend> ClassifierNetwork<B> for EncoderClassifier<B> {
    fn forward_batch(&self, batch: &GlueBatch<B>) -> NetworkOutput<B> {
        self.forward(
            batch.input_ids.clone(),
            batch.segment_ids.clone(),
            batch.input_mask.clone(),
        )
    }

    fn output_mode(&self) -> OutputMode {
        if self.regression { OutputMode::Regression } else { OutputMode::Classification }
    }
}

impl<B: AutodiffBackend> StudentNetwork<B> for EncoderClassifier<B> {
    fn set_drop_path_prob(&mut self, prob: f64) {
        self.drop_path_prob = prob;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use crate::data::batcher::GlueBatcher;
    use crate::data::dataset::GlueSample;
    use burn::data::dataloader::batcher::Batcher;

    pub type TestBackend = NdArray;
    pub type TestAutodiff = Autodiff<NdArray>;

    pub fn tiny_config(num_layers: usize, layer_output: LayerOutput) -> EncoderConfig {
        EncoderConfig::new(16, 6, 8, 2, num_layers, 16, 2, OutputMode::Classification)
            .with_dropout(0.0)
            .with_layer_output(layer_output)
    }

    pub fn tiny_batch<B: Backend>(labels: &[f32]) -> GlueBatch<B> {
        let samples = labels
            .iter()
            .enumerate()
            .map(|(i, &label)| {
                let len = 3 + i % 3;
                let input_ids: Vec<u32> = (0..6).map(|p| if p < len { (p + i) as u32 % 16 } else { 0 }).collect();
                GlueSample {
                    input_mask:  input_ids.iter().enumerate().map(|(p, _)| u32::from(p < len)).collect(),
                    segment_ids: vec![0; 6],
                    input_ids,
                    label,
                    seq_length:  len,
                }
            })
            .collect();
        GlueBatcher::<B>::new(Default::default()).batch(samples)
    }

    #[test]
    fn test_forward_shapes() {
        let model: EncoderClassifier<TestBackend> =
            tiny_config(3, LayerOutput::Merged).init(&Default::default());
        let out = model.forward_batch(&tiny_batch(&[0.0, 1.0]));

        assert_eq!(out.logits.dims(), [2, 2]);
        match out.layers {
            Some(LayerStack::Merged(layers)) => {
                assert_eq!(layers.len(), 3);
                assert_eq!(layers[0].dims(), [2, 6, 8]);
            }
            other => panic!("expected merged layers, got {other:?}"),
        }
    }

    #[test]
    fn test_per_head_outputs() {
        let model: EncoderClassifier<TestBackend> =
            tiny_config(2, LayerOutput::PerHead).init(&Default::default());
        let out = model.forward_batch(&tiny_batch(&[1.0]));
        let Some(LayerStack::PerHead(layers)) = out.layers else {
            panic!("expected per-head layers");
        };
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[1].len(), 2);
        assert_eq!(layers[1][0].dims(), [1, 6, 4]);
    }

    #[test]
    fn test_no_layers_when_not_requested() {
        let model: EncoderClassifier<TestBackend> =
            tiny_config(1, LayerOutput::None).init(&Default::default());
        assert!(model.forward_batch(&tiny_batch(&[1.0])).layers.is_none());
    }

    #[test]
    fn test_embedding_copy_from_teacher() {
        let device  = Default::default();
        let teacher: EncoderClassifier<TestBackend> = tiny_config(2, LayerOutput::None).init(&device);
        let mut student: EncoderClassifier<TestAutodiff> = tiny_config(1, LayerOutput::None).init(&device);

        assert!(student.init_token_embedding_from(&teacher));
        let ours: Vec<f32>   = student.token_embedding.weight.val().inner().into_data().to_vec().unwrap();
        let theirs: Vec<f32> = teacher.token_embedding.weight.val().into_data().to_vec().unwrap();
        assert_eq!(ours, theirs);
    }
}
