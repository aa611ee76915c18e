//! HuggingFace `tokenizer.json` support (GPT-2 byte-level BPE).

use std::path::Path;

use tokenizers::Tokenizer;

use super::TextCodec;
use crate::error::{GptError, Result};

/// GPT-2's end-of-text marker.
pub const END_OF_TEXT: &str = "<|endoftext|>";

/// Tokenizer backed by the `tokenizers` crate.
#[derive(Clone)]
pub struct HfTokenizer {
    inner: Tokenizer,
    eos_id: Option<u32>,
}

impl HfTokenizer {
    /// Load a tokenizer from a tokenizer.json file.
    ///
    /// # Errors
    /// Returns [`GptError::Tokenizer`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = Tokenizer::from_file(path).map_err(|e| {
            GptError::Tokenizer(format!("failed to load {}: {e}", path.display()))
        })?;
        Ok(Self::from_tokenizer(inner))
    }

    #[must_use]
    pub fn from_tokenizer(inner: Tokenizer) -> Self {
        let eos_id = inner.token_to_id(END_OF_TEXT);
        Self { inner, eos_id }
    }

    /// Number of entries in the vocabulary, including added tokens.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl TextCodec for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| GptError::Tokenizer(format!("failed to encode text: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| GptError::Tokenizer(format!("failed to decode ids: {e}")))
    }

    fn eos_id(&self) -> Option<u32> {
        self.eos_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_tokenizer_error() {
        let err = HfTokenizer::from_file(Path::new("/nonexistent/tokenizer.json"))
            .err()
            .expect("missing tokenizer.json should error");
        assert!(matches!(err, GptError::Tokenizer(_)));
    }
}
