//! Instruction vocabulary: `{token: id}` maps exported alongside a policy
//! checkpoint and the encoder that turns instruction text into id sequences.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::debug;

use crate::error::{EditError, Result};

pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";

#[derive(Debug, Clone)]
pub struct Vocabulary {
    token_to_id: HashMap<String, i64>,
    pad_id: i64,
    unk_id: i64,
}

/// `<vocab_dir>/<dataset>/session_<session>.json`
pub fn vocab_path(vocab_dir: &Path, dataset: &str, session: u32) -> PathBuf {
    vocab_dir
        .join(dataset)
        .join(format!("session_{session}.json"))
}

impl Vocabulary {
    pub fn from_map(token_to_id: HashMap<String, i64>) -> Result<Self> {
        let unk_id = *token_to_id
            .get(UNK_TOKEN)
            .ok_or_else(|| EditError::config(format!("vocabulary has no {UNK_TOKEN} entry")))?;
        let pad_id = token_to_id.get(PAD_TOKEN).copied().unwrap_or(0);
        Ok(Self {
            token_to_id,
            pad_id,
            unk_id,
        })
    }

    pub fn load(vocab_dir: &Path, dataset: &str, session: u32) -> Result<Self> {
        let path = vocab_path(vocab_dir, dataset, session);
        let raw = fs::read_to_string(&path).map_err(|err| {
            EditError::config(format!("failed to read vocabulary {}: {err}", path.display()))
        })?;
        let token_to_id: HashMap<String, i64> = serde_json::from_str(&raw).map_err(|err| {
            EditError::config(format!("malformed vocabulary {}: {err}", path.display()))
        })?;

        let vocab = Self::from_map(token_to_id)?;
        debug!(path = %path.display(), tokens = vocab.len(), "Loaded vocabulary");
        Ok(vocab)
    }

    pub fn len(&self) -> usize {
        self.token_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_to_id.is_empty()
    }

    pub fn pad_id(&self) -> i64 {
        self.pad_id
    }

    /// Encode `text` into exactly `max_len` ids: lowercase, split on anything
    /// that is not alphanumeric, truncate, then right-pad.
    pub fn encode(&self, text: &str, max_len: usize) -> Vec<i64> {
        let mut ids: Vec<i64> = text
            .to_lowercase()
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(|token| self.token_to_id.get(token).copied().unwrap_or(self.unk_id))
            .take(max_len)
            .collect();
        ids.resize(max_len, self.pad_id);
        ids
    }

    /// Encode a batch of instructions into a `[batch, max_len]` id matrix.
    pub fn encode_batch<S: AsRef<str>>(&self, texts: &[S], max_len: usize) -> Array2<i64> {
        let mut ids = Array2::from_elem((texts.len(), max_len), self.pad_id);
        for (mut row, text) in ids.rows_mut().into_iter().zip(texts) {
            for (slot, id) in row.iter_mut().zip(self.encode(text.as_ref(), max_len)) {
                *slot = id;
            }
        }
        ids
    }
}
