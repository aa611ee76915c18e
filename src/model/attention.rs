//! Causal self-attention implementation.
//!
//! Multi-head scaled dot-product attention where each position attends only to itself and
//! earlier positions.

use candle_core::{D, Device, Result, Tensor};
use candle_nn::{Dropout, Linear, Module};
use rand::Rng;

use super::config::GptConfig;
use super::init;

/// Multi-head causal self-attention.
///
/// Uses separate query, key and value projections so each can be loaded independently.
pub struct CausalSelfAttention {
    /// Query projection (emb_dim -> emb_dim)
    pub(crate) query: Linear,
    /// Key projection (emb_dim -> emb_dim)
    pub(crate) key: Linear,
    /// Value projection (emb_dim -> emb_dim)
    pub(crate) value: Linear,
    /// Output projection (emb_dim -> emb_dim)
    pub(crate) out_proj: Linear,
    /// Dropout on the attention weights (training only)
    attn_dropout: Dropout,
    /// Number of attention heads
    n_heads: usize,
    /// Embedding dimension
    emb_dim: usize,
    /// Dimension per head
    head_dim: usize,
}

impl CausalSelfAttention {
    /// Create a randomly initialized attention layer.
    ///
    /// Query/key/value biases follow `config.qkv_bias`; the output projection always has one.
    ///
    /// # Errors
    /// Returns an error if tensor creation fails.
    pub fn new<R: Rng + ?Sized>(config: &GptConfig, rng: &mut R, device: &Device) -> Result<Self> {
        let emb_dim = config.emb_dim;
        let bias = config.qkv_bias;

        Ok(Self {
            query: init::linear(emb_dim, emb_dim, bias, rng, device)?,
            key: init::linear(emb_dim, emb_dim, bias, rng, device)?,
            value: init::linear(emb_dim, emb_dim, bias, rng, device)?,
            out_proj: init::linear(emb_dim, emb_dim, true, rng, device)?,
            attn_dropout: Dropout::new(config.drop_rate),
            n_heads: config.n_heads,
            emb_dim,
            head_dim: config.head_dim(),
        })
    }

    /// Inference-mode forward pass.
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    pub fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        self.forward_t(x, mask, false)
    }

    /// Forward pass for causal self-attention.
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape (batch, seq_len, emb_dim)
    /// * `mask` - Additive causal mask from [`create_causal_mask`]
    /// * `train` - Apply dropout to the attention weights
    ///
    /// # Returns
    /// Output tensor of shape (batch, seq_len, emb_dim)
    ///
    /// # Errors
    /// Returns an error if tensor operations fail.
    #[allow(clippy::many_single_char_names)]
    pub fn forward_t(&self, x: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let (b, t, _c) = x.dims3()?;

        // (B, T, C) -> (B, n_heads, T, head_dim)
        let q = self.split_heads(&self.query.forward(x)?, b, t)?;
        let k = self.split_heads(&self.key.forward(x)?, b, t)?;
        let v = self.split_heads(&self.value.forward(x)?, b, t)?;

        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let k_t = k.transpose(D::Minus2, D::Minus1)?.contiguous()?;
        let att = (q.matmul(&k_t)? * scale)?;

        // Future positions become -inf and get zero weight after the softmax.
        let att = att.broadcast_add(mask)?;

        // Subtracts the row max before exponentiating.
        let att = candle_nn::ops::softmax_last_dim(&att)?;
        let att = self.attn_dropout.forward(&att, train)?;

        // (B, n_heads, T, T) @ (B, n_heads, T, head_dim)
        let y = att.matmul(&v)?;

        // (B, n_heads, T, head_dim) -> (B, T, C)
        let y = y
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, t, self.emb_dim))?;

        self.out_proj.forward(&y)
    }

    fn split_heads(&self, x: &Tensor, b: usize, t: usize) -> Result<Tensor> {
        x.reshape((b, t, self.n_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }
}

/// Create a causal attention mask.
///
/// Returns a `(1, 1, seq_len, seq_len)` mask where position (i, j) is -inf if j > i, else 0.
///
/// # Errors
/// Returns an error if tensor creation fails.
pub fn create_causal_mask(seq_len: usize, device: &Device) -> Result<Tensor> {
    let mask_data: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j <= i { 0.0 } else { f32::NEG_INFINITY }))
        .collect();

    let mask = Tensor::from_vec(mask_data, (seq_len, seq_len), device)?;
    mask.unsqueeze(0)?.unsqueeze(0)
}
