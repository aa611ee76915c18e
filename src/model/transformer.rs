//! GPT-2 style decoder-only transformer.
//!
//! token embedding + position embedding -> N x TransformerBlock -> final LayerNorm ->
//! bias-free projection to vocabulary logits.

use candle_core::{Device, Result as CandleResult, Tensor};
use candle_nn::{Dropout, Linear, Module};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::attention::create_causal_mask;
use super::config::GptConfig;
use super::embedding::{PositionEmbedding, TokenEmbedding};
use super::init;
use super::layers::TransformerBlock;
use super::norm::LayerNorm;
use crate::error::Result;
use crate::weights::Checkpoint;

/// Decoder-only transformer.
///
/// Parameters are read-only during a forward pass; the model is `Send + Sync` and may serve
/// concurrent forward calls. The forward computation keeps no state between calls.
pub struct GptModel {
    /// Token embedding
    pub(crate) tok_emb: TokenEmbedding,
    /// Absolute position embedding
    pub(crate) pos_emb: PositionEmbedding,
    /// Dropout on the summed embeddings (training only)
    drop_emb: Dropout,
    /// Transformer blocks
    pub(crate) blocks: Vec<TransformerBlock>,
    /// Final layer norm
    pub(crate) final_norm: LayerNorm,
    /// Language model head (emb_dim -> vocab_size, no bias)
    pub(crate) out_head: Linear,
    /// Model configuration
    config: GptConfig,
    /// Device for tensor operations
    device: Device,
}

impl GptModel {
    /// Create a model with parameters drawn from OS entropy.
    ///
    /// # Errors
    /// Returns [`crate::GptError::Config`] if the configuration is invalid.
    pub fn new(config: GptConfig, device: &Device) -> Result<Self> {
        let mut rng = StdRng::from_entropy();
        Self::with_rng(config, &mut rng, device)
    }

    /// Create a model whose parameters are drawn from a fixed seed.
    ///
    /// # Errors
    /// Returns [`crate::GptError::Config`] if the configuration is invalid.
    pub fn seeded(config: GptConfig, seed: u64, device: &Device) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::with_rng(config, &mut rng, device)
    }

    /// Create a model, drawing every parameter from `rng`.
    ///
    /// # Errors
    /// Returns [`crate::GptError::Config`] if the configuration is invalid.
    pub fn with_rng<R: Rng + ?Sized>(config: GptConfig, rng: &mut R, device: &Device) -> Result<Self> {
        config.validate()?;

        let tok_emb = TokenEmbedding::new(&config, rng, device)?;
        let pos_emb = PositionEmbedding::new(&config, rng, device)?;

        let mut blocks = Vec::with_capacity(config.n_layers);
        for _ in 0..config.n_layers {
            blocks.push(TransformerBlock::new(&config, rng, device)?);
        }

        let final_norm = LayerNorm::new(config.emb_dim, device)?;
        let out_head = init::linear(config.emb_dim, config.vocab_size, false, rng, device)?;

        Ok(Self {
            tok_emb,
            pos_emb,
            drop_emb: Dropout::new(config.drop_rate),
            blocks,
            final_norm,
            out_head,
            config,
            device: device.clone(),
        })
    }

    /// Inference-mode forward pass.
    ///
    /// # Arguments
    /// * `input_ids` - Token IDs of shape (batch, seq_len), u32
    ///
    /// # Returns
    /// Logits of shape (batch, seq_len, vocab_size)
    ///
    /// # Errors
    /// Returns an error if `seq_len` is zero or exceeds `context_length`, or an id is out of range.
    pub fn forward(&self, input_ids: &Tensor) -> CandleResult<Tensor> {
        self.forward_t(input_ids, false)
    }

    /// Forward pass; `train` enables dropout.
    ///
    /// # Errors
    /// Returns an error if `seq_len` is zero or exceeds `context_length`, or an id is out of range.
    pub fn forward_t(&self, input_ids: &Tensor, train: bool) -> CandleResult<Tensor> {
        let (_, t) = input_ids.dims2()?;

        if t == 0 || t > self.config.context_length {
            return Err(candle_core::Error::Msg(format!(
                "Sequence length {} must be in 1..={}",
                t, self.config.context_length
            )));
        }

        let tok_emb = self.tok_emb.forward(input_ids)?;
        let pos_emb = self.pos_emb.forward(t)?;
        let x = tok_emb.broadcast_add(&pos_emb)?;
        let mut x = self.drop_emb.forward(&x, train)?;

        let mask = create_causal_mask(t, &self.device)?;
        for block in &self.blocks {
            x = block.forward_t(&x, &mask, train)?;
        }

        let x = self.final_norm.forward(&x)?;
        self.out_head.forward(&x)
    }

    /// Get logits for the last token only (for generation).
    ///
    /// # Returns
    /// Logits for last position of shape (batch, vocab_size)
    ///
    /// # Errors
    /// Returns an error if the forward pass fails.
    pub fn forward_last(&self, input_ids: &Tensor) -> CandleResult<Tensor> {
        let logits = self.forward(input_ids)?;
        let (_, t, _) = logits.dims3()?;
        logits.narrow(1, t - 1, 1)?.squeeze(1)
    }

    /// Get the model configuration.
    #[must_use]
    pub fn config(&self) -> &GptConfig {
        &self.config
    }

    /// Get the device.
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Every parameter as `(name, tensor)`, in a fixed order.
    ///
    /// Names follow `tok_emb.weight`, `blocks.{i}.attn.query.weight`, `final_norm.scale`, ...
    #[must_use]
    pub fn named_parameters(&self) -> Vec<(String, Tensor)> {
        Checkpoint::from_model(self).named_tensors()
    }

    /// Total number of scalar parameters.
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.named_parameters()
            .iter()
            .map(|(_, t)| t.elem_count())
            .sum()
    }
}
