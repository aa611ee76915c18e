//! Common neural network layers.
//!
//! FeedForward and TransformerBlock.

use candle_core::{Device, Result, Tensor};
use candle_nn::{Dropout, Linear, Module};
use rand::Rng;

use super::attention::CausalSelfAttention;
use super::config::GptConfig;
use super::init;
use super::norm::LayerNorm;

/// Position-wise feed-forward network with GELU activation.
///
/// fc (emb_dim -> 4 * emb_dim) -> GELU (tanh approximation) -> proj (4 * emb_dim -> emb_dim)
pub struct FeedForward {
    /// Up projection
    pub(crate) fc: Linear,
    /// Down projection
    pub(crate) proj: Linear,
}

impl FeedForward {
    /// Create a randomly initialized feed-forward layer with biases.
    ///
    /// # Errors
    /// Returns an error if tensor creation fails.
    pub fn new<R: Rng + ?Sized>(config: &GptConfig, rng: &mut R, device: &Device) -> Result<Self> {
        let emb_dim = config.emb_dim;
        let hidden_dim = config.hidden_dim();

        Ok(Self {
            fc: init::linear(emb_dim, hidden_dim, true, rng, device)?,
            proj: init::linear(hidden_dim, emb_dim, true, rng, device)?,
        })
    }
}

impl Module for FeedForward {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        // candle's gelu is 0.5x(1 + tanh(sqrt(2/pi)(x + 0.044715x^3)))
        let h = self.fc.forward(x)?.gelu()?;
        self.proj.forward(&h)
    }
}

/// Transformer block with pre-norm architecture.
///
/// Structure: LayerNorm -> Attention -> Dropout -> Residual -> LayerNorm -> FeedForward ->
/// Dropout -> Residual
pub struct TransformerBlock {
    /// First layer norm (before attention)
    pub(crate) norm1: LayerNorm,
    /// Causal self-attention
    pub(crate) attn: CausalSelfAttention,
    /// Second layer norm (before feed-forward)
    pub(crate) norm2: LayerNorm,
    /// Feed-forward network
    pub(crate) ff: FeedForward,
    /// Dropout on both sub-layer outputs before the residual add
    drop_shortcut: Dropout,
}

impl TransformerBlock {
    /// Create a randomly initialized transformer block.
    ///
    /// # Errors
    /// Returns an error if tensor creation fails.
    pub fn new<R: Rng + ?Sized>(config: &GptConfig, rng: &mut R, device: &Device) -> Result<Self> {
        Ok(Self {
            norm1: LayerNorm::new(config.emb_dim, device)?,
            attn: CausalSelfAttention::new(config, rng, device)?,
            norm2: LayerNorm::new(config.emb_dim, device)?,
            ff: FeedForward::new(config, rng, device)?,
            drop_shortcut: Dropout::new(config.drop_rate),
        })
    }

    /// Forward pass through the transformer block.
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape (batch, seq_len, emb_dim)
    /// * `mask` - Causal attention mask
    /// * `train` - Apply dropout
    ///
    /// # Returns
    /// Output tensor of shape (batch, seq_len, emb_dim)
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward_t(&self, x: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let h = self.norm1.forward(x)?;
        let h = self.attn.forward_t(&h, mask, train)?;
        let h = self.drop_shortcut.forward(&h, train)?;
        let x = (x + h)?;

        let h = self.norm2.forward(&x)?;
        let h = self.ff.forward(&h)?;
        let h = self.drop_shortcut.forward(&h, train)?;
        x + h
    }
}
