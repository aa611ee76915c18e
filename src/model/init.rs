//! Parameter initialization.
//!
//! GPT-2 scheme: weights ~ N(0, 0.02), biases zero, normalizer scale one and shift zero.
//! All randomness comes from the caller's RNG so a seeded RNG yields identical models.

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{Embedding, Linear};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Standard deviation for weight and embedding initialization.
pub const INIT_STD: f32 = 0.02;

/// Sample a `(rows, cols)` matrix from N(0, [`INIT_STD`]).
///
/// # Errors
/// Returns an error if tensor creation fails.
pub fn normal<R: Rng + ?Sized>(
    rows: usize,
    cols: usize,
    rng: &mut R,
    device: &Device,
) -> Result<Tensor> {
    let normal =
        Normal::new(0.0, INIT_STD).map_err(|e| candle_core::Error::Msg(e.to_string()))?;
    let data: Vec<f32> = (0..rows * cols).map(|_| normal.sample(&mut *rng)).collect();
    Tensor::from_vec(data, (rows, cols), device)
}

/// Linear layer mapping `in_dim -> out_dim` (weight stored as `(out_dim, in_dim)`).
///
/// # Errors
/// Returns an error if tensor creation fails.
pub fn linear<R: Rng + ?Sized>(
    in_dim: usize,
    out_dim: usize,
    bias: bool,
    rng: &mut R,
    device: &Device,
) -> Result<Linear> {
    let weight = normal(out_dim, in_dim, rng, device)?;
    let bias = if bias {
        Some(Tensor::zeros(out_dim, DType::F32, device)?)
    } else {
        None
    };
    Ok(Linear::new(weight, bias))
}

/// Embedding table with `rows` entries of width `dim`.
///
/// # Errors
/// Returns an error if tensor creation fails.
pub fn embedding<R: Rng + ?Sized>(
    rows: usize,
    dim: usize,
    rng: &mut R,
    device: &Device,
) -> Result<Embedding> {
    Ok(Embedding::new(normal(rows, dim, rng, device)?, dim))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_same_seed_same_weights() {
        let device = Device::Cpu;
        let a = normal(4, 3, &mut StdRng::seed_from_u64(7), &device).unwrap();
        let b = normal(4, 3, &mut StdRng::seed_from_u64(7), &device).unwrap();
        assert_eq!(
            a.to_vec2::<f32>().unwrap(),
            b.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_linear_shapes() {
        let device = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(0);
        let layer = linear(8, 32, true, &mut rng, &device).unwrap();
        assert_eq!(layer.weight().dims(), &[32, 8]);
        assert_eq!(layer.bias().unwrap().dims(), &[32]);

        let no_bias = linear(8, 8, false, &mut rng, &device).unwrap();
        assert!(no_bias.bias().is_none());
    }
}
