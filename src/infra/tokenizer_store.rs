// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the teacher's HuggingFace `tokenizer.json`. The student
// must see exactly the ids the teacher was trained on, so the
// tokenizer is never rebuilt here, only loaded and checked.
//
// Lookup order for the file:
//   1. an explicit --tokenizer path
//   2. <teacher_dir>/tokenizer.json

use anyhow::Result;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

pub struct TokenizerStore {
    path: PathBuf,
}

impl TokenizerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Explicit path if given, otherwise the file next to the teacher weights.
    pub fn resolve(explicit: Option<&str>, teacher_dir: Option<&str>) -> Result<Self> {
        match (explicit, teacher_dir) {
            (Some(p), _)    => Ok(Self::new(p)),
            (None, Some(d)) => Ok(Self::new(Path::new(d).join("tokenizer.json"))),
            (None, None)    => anyhow::bail!(
                "No tokenizer: pass --tokenizer or --teacher-model <dir containing tokenizer.json>"
            ),
        }
    }

    pub fn load(&self) -> Result<Tokenizer> {
        let tokenizer = Tokenizer::from_file(&self.path).map_err(|e| {
            anyhow::anyhow!("Cannot load tokenizer from '{}': {}", self.path.display(), e)
        })?;
        tracing::info!(
            "Loaded tokenizer from '{}' (vocab size {})",
            self.path.display(),
            tokenizer.get_vocab_size(true)
        );
        Ok(tokenizer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Id of the padding token, `[PAD]` for BERT vocabularies, `<pad>` for RoBERTa.
pub fn pad_id(tokenizer: &Tokenizer) -> u32 {
    ["[PAD]", "<pad>"]
        .iter()
        .find_map(|t| tokenizer.token_to_id(t))
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! A word-level BERT-style tokenizer small enough to write inline.

    use tokenizers::Tokenizer;

    pub const WORDS: [&str; 8] = ["good", "bad", "film", "the", "a", "plot", "is", "fine"];

    pub fn tiny_tokenizer_json() -> serde_json::Value {
        let mut vocab = serde_json::json!({
            "[PAD]": 0, "[UNK]": 1, "[CLS]": 2, "[SEP]": 3,
        });
        for (i, w) in WORDS.iter().enumerate() {
            vocab[*w] = serde_json::json!(4 + i);
        }
        let special = |id: u32, content: &str| serde_json::json!({
            "id": id, "content": content, "single_word": false, "lstrip": false,
            "rstrip": false, "normalized": false, "special": true
        });
        serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                special(0, "[PAD]"), special(1, "[UNK]"), special(2, "[CLS]"), special(3, "[SEP]")
            ],
            "normalizer": null,
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": {
                "type": "BertProcessing",
                "sep": ["[SEP]", 3],
                "cls": ["[CLS]", 2]
            },
            "decoder": null,
            "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]" }
        })
    }

    pub fn tiny_tokenizer() -> Tokenizer {
        tiny_tokenizer_json().to_string().parse().expect("fixture tokenizer parses")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_teacher_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tokenizer.json"),
            fixtures::tiny_tokenizer_json().to_string(),
        ).unwrap();

        let store = TokenizerStore::resolve(None, dir.path().to_str()).unwrap();
        let tok   = store.load().unwrap();
        assert_eq!(pad_id(&tok), 0);
        assert_eq!(tok.token_to_id("film"), Some(6));
    }

    #[test]
    fn test_no_source_is_an_error() {
        assert!(TokenizerStore::resolve(None, None).is_err());
    }
}
