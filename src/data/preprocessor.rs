// ============================================================
// Layer 4 — Text Preprocessor
// ============================================================
// Turns GlueExamples into fixed-length GlueSamples:
//
//   1. clean       — normalise odd whitespace and control chars
//   2. tokenise    — [CLS] a [SEP] (b [SEP]) via the teacher's
//                    tokenizer, truncated longest-first
//   3. pad         — right-pad ids / mask / type ids to max_seq_len
//   4. label       — map the label string to its numeric target
//
// The tokenizer's own post-processor decides the special
// tokens, so BERT and RoBERTa vocabularies both work.

use anyhow::Result;
use tokenizers::{
    PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams,
    TruncationStrategy,
};

use crate::data::dataset::GlueSample;
use crate::data::loader::label_value;
use crate::domain::example::GlueExample;
use crate::domain::task::GlueTask;
use crate::infra::tokenizer_store::pad_id;

pub struct Preprocessor {
    tokenizer:   Tokenizer,
    task:        GlueTask,
    max_seq_len: usize,
}

impl Preprocessor {
    pub fn new(mut tokenizer: Tokenizer, task: GlueTask, max_seq_len: usize) -> Result<Self> {
        let pad = pad_id(&tokenizer);
        let pad_token = tokenizer
            .id_to_token(pad)
            .unwrap_or_else(|| "[PAD]".to_string());

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_seq_len,
                strategy:   TruncationStrategy::LongestFirst,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Cannot configure truncation: {e}"))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy:  PaddingStrategy::Fixed(max_seq_len),
            direction: PaddingDirection::Right,
            pad_id:    pad,
            pad_token,
            ..Default::default()
        }));

        Ok(Self { tokenizer, task, max_seq_len })
    }

    /// Normalise whitespace and strip control characters.
    pub fn clean(text: &str) -> String {
        text.chars()
            .map(|c| match c {
                '\u{00A0}' | '\u{200B}' | '\u{FEFF}' => ' ',
                c if c.is_control() => ' ',
                c => c,
            })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn encode(&self, example: &GlueExample) -> Result<GlueSample> {
        let text_a = Self::clean(&example.text_a);
        let encoding = match &example.text_b {
            Some(b) => self.tokenizer.encode((text_a, Self::clean(b)), true),
            None    => self.tokenizer.encode(text_a, true),
        }
        .map_err(|e| anyhow::anyhow!("Tokenisation error in {}: {e}", example.guid))?;

        let input_ids  = encoding.get_ids().to_vec();
        let input_mask = encoding.get_attention_mask().to_vec();
        let segment_ids = encoding.get_type_ids().to_vec();
        let seq_length = input_mask.iter().filter(|&&m| m == 1).count();

        debug_assert_eq!(input_ids.len(), self.max_seq_len);

        Ok(GlueSample {
            input_ids,
            input_mask,
            segment_ids,
            label: label_value(self.task, &example.label)?,
            seq_length,
        })
    }

    pub fn encode_all(&self, examples: &[GlueExample]) -> Result<Vec<GlueSample>> {
        examples.iter().map(|e| self.encode(e)).collect()
    }
}
