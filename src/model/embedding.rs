//! Embedding layers for the transformer.
//!
//! Learned token embeddings and learned absolute position embeddings.

use candle_core::{Device, Result, Tensor};
use candle_nn::{Embedding, Module};
use rand::Rng;

use super::config::GptConfig;
use super::init;

/// Token embedding layer (vocab_size x emb_dim).
pub struct TokenEmbedding {
    pub(crate) embedding: Embedding,
}

impl TokenEmbedding {
    /// Create a randomly initialized token embedding table.
    ///
    /// # Errors
    /// Returns an error if tensor creation fails.
    pub fn new<R: Rng + ?Sized>(config: &GptConfig, rng: &mut R, device: &Device) -> Result<Self> {
        let embedding = init::embedding(config.vocab_size, config.emb_dim, rng, device)?;
        Ok(Self { embedding })
    }

    /// Look up token ids of shape (batch, seq_len).
    ///
    /// # Returns
    /// Embeddings of shape (batch, seq_len, emb_dim)
    ///
    /// # Errors
    /// Returns an error if an id is out of range.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        self.embedding.forward(token_ids)
    }

    /// The embedding table, also used as the tied output head.
    #[must_use]
    pub fn weights(&self) -> &Tensor {
        self.embedding.embeddings()
    }
}

/// Learned absolute position embedding (context_length x emb_dim).
pub struct PositionEmbedding {
    pub(crate) embedding: Embedding,
}

impl PositionEmbedding {
    /// Create a randomly initialized position embedding table.
    ///
    /// # Errors
    /// Returns an error if tensor creation fails.
    pub fn new<R: Rng + ?Sized>(config: &GptConfig, rng: &mut R, device: &Device) -> Result<Self> {
        let embedding = init::embedding(config.context_length, config.emb_dim, rng, device)?;
        Ok(Self { embedding })
    }

    /// Embeddings for positions `0..seq_len`, shape (seq_len, emb_dim).
    ///
    /// # Errors
    /// Returns an error if `seq_len` exceeds the table size.
    pub fn forward(&self, seq_len: usize) -> Result<Tensor> {
        let device = self.embedding.embeddings().device();
        #[allow(clippy::cast_possible_truncation)]
        let positions = Tensor::arange(0u32, seq_len as u32, device)?;
        self.embedding.forward(&positions)
    }

    #[must_use]
    pub fn weights(&self) -> &Tensor {
        self.embedding.embeddings()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn tiny_config() -> GptConfig {
        GptConfig {
            vocab_size: 50,
            context_length: 16,
            emb_dim: 8,
            n_heads: 2,
            n_layers: 1,
            drop_rate: 0.0,
            qkv_bias: false,
        }
    }

    #[test]
    fn test_token_lookup_shape() {
        let device = Device::Cpu;
        let emb = TokenEmbedding::new(&tiny_config(), &mut StdRng::seed_from_u64(0), &device).unwrap();
        let ids = Tensor::new(&[[3u32, 7, 1], [0, 49, 2]], &device).unwrap();
        assert_eq!(emb.forward(&ids).unwrap().dims(), &[2, 3, 8]);
        assert_eq!(emb.weights().dims(), &[50, 8]);
    }

    #[test]
    fn test_position_rows_match_table() {
        let device = Device::Cpu;
        let pos = PositionEmbedding::new(&tiny_config(), &mut StdRng::seed_from_u64(0), &device).unwrap();
        let out: Vec<Vec<f32>> = pos.forward(3).unwrap().to_vec2().unwrap();
        let table: Vec<Vec<f32>> = pos.weights().to_vec2().unwrap();
        assert_eq!(out, table[..3].to_vec());
    }
}
