use serde::{Deserialize, Serialize};

use crate::error::{GptError, Result};

/// Model hyperparameters for a GPT-2 style decoder.
///
/// Unknown or missing fields are rejected when deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GptConfig {
    /// Number of token ids in the vocabulary
    pub vocab_size: usize,
    /// Maximum sequence length (size of the positional embedding table)
    pub context_length: usize,
    /// Embedding dimension
    pub emb_dim: usize,
    /// Number of attention heads
    pub n_heads: usize,
    /// Number of transformer blocks
    pub n_layers: usize,
    /// Dropout probability, only applied in training mode
    pub drop_rate: f32,
    /// Whether the query/key/value projections carry a bias
    pub qkv_bias: bool,
}

impl GptConfig {
    /// Dimension per attention head.
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.emb_dim / self.n_heads
    }

    /// Hidden width of the feed-forward sub-layer.
    #[must_use]
    pub fn hidden_dim(&self) -> usize {
        4 * self.emb_dim
    }

    /// Validate that configuration is consistent.
    ///
    /// # Errors
    /// Returns [`GptError::Config`] if any size is zero, `emb_dim` is not divisible by
    /// `n_heads`, or `drop_rate` is outside `[0, 1)`.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("vocab_size", self.vocab_size),
            ("context_length", self.context_length),
            ("emb_dim", self.emb_dim),
            ("n_heads", self.n_heads),
            ("n_layers", self.n_layers),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(GptError::Config(format!("{name} must be positive")));
            }
        }
        if !self.emb_dim.is_multiple_of(self.n_heads) {
            return Err(GptError::Config(format!(
                "emb_dim ({}) must be divisible by n_heads ({})",
                self.emb_dim, self.n_heads
            )));
        }
        if !(0.0..1.0).contains(&self.drop_rate) {
            return Err(GptError::Config(format!(
                "drop_rate must be in [0, 1), got {}",
                self.drop_rate
            )));
        }
        Ok(())
    }

    /// GPT-2 small (124M parameters).
    #[must_use]
    pub fn gpt2_small() -> Self {
        Self::gpt2(768, 12, 12)
    }

    /// GPT-2 medium (355M parameters).
    #[must_use]
    pub fn gpt2_medium() -> Self {
        Self::gpt2(1024, 24, 16)
    }

    /// GPT-2 large (774M parameters).
    #[must_use]
    pub fn gpt2_large() -> Self {
        Self::gpt2(1280, 36, 20)
    }

    /// GPT-2 XL (1558M parameters).
    #[must_use]
    pub fn gpt2_xl() -> Self {
        Self::gpt2(1600, 48, 25)
    }

    fn gpt2(emb_dim: usize, n_layers: usize, n_heads: usize) -> Self {
        Self {
            vocab_size: 50257,
            context_length: 1024,
            emb_dim,
            n_heads,
            n_layers,
            drop_rate: 0.1,
            qkv_bias: true,
        }
    }
}

impl Default for GptConfig {
    fn default() -> Self {
        Self::gpt2_small()
    }
}

/// HuggingFace GPT-2 `config.json`.
///
/// Only the fields that shape the network are read; everything else in the file is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Gpt2HfConfig {
    pub vocab_size: usize,
    pub n_positions: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[serde(default)]
    pub resid_pdrop: f32,
}

impl From<Gpt2HfConfig> for GptConfig {
    fn from(hf: Gpt2HfConfig) -> Self {
        Self {
            vocab_size: hf.vocab_size,
            context_length: hf.n_positions,
            emb_dim: hf.n_embd,
            n_heads: hf.n_head,
            n_layers: hf.n_layer,
            drop_rate: hf.resid_pdrop,
            qkv_bias: true,
        }
    }
}
