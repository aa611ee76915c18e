//! Layer normalization with learned scale and shift.

use candle_core::{D, DType, Device, Result, Tensor};
use candle_nn::Module;

/// Added to the variance before the square root.
pub const LAYER_NORM_EPS: f64 = 1e-5;

/// Per-token layer normalization over the last dimension.
///
/// Uses the biased variance, as GPT-2 does.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    /// Elementwise scale (emb_dim)
    scale: Tensor,
    /// Elementwise shift (emb_dim)
    shift: Tensor,
}

impl LayerNorm {
    /// Identity-initialized normalizer: scale one, shift zero.
    ///
    /// # Errors
    /// Returns an error if tensor creation fails.
    pub fn new(dim: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            scale: Tensor::ones(dim, DType::F32, device)?,
            shift: Tensor::zeros(dim, DType::F32, device)?,
        })
    }

    #[must_use]
    pub fn from_weights(scale: Tensor, shift: Tensor) -> Self {
        Self { scale, shift }
    }

    #[must_use]
    pub fn scale(&self) -> &Tensor {
        &self.scale
    }

    #[must_use]
    pub fn shift(&self) -> &Tensor {
        &self.shift
    }
}

/// `(x - mean) / sqrt(var + eps)` over the last dimension, before scale and shift.
///
/// # Errors
/// Returns an error if tensor operations fail.
pub fn normalize(x: &Tensor) -> Result<Tensor> {
    let mean = x.mean_keepdim(D::Minus1)?;
    let centered = x.broadcast_sub(&mean)?;
    let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
    let denom = (var + LAYER_NORM_EPS)?.sqrt()?;
    centered.broadcast_div(&denom)
}

impl Module for LayerNorm {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        normalize(x)?
            .broadcast_mul(&self.scale)?
            .broadcast_add(&self.shift)
    }
}
