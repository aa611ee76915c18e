//! Autoregressive generation loop.
//!
//! Each step runs the model on the last `context_size` ids, samples one id from the final
//! position's logits and appends it. Steps are strictly sequential.

use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{GptError, Result};
use crate::inference::sampling::{sample_from_logits, validate_sampling};
use crate::model::GptModel;

/// Generation settings.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Number of ids to append (fewer if `eos_id` is produced)
    pub max_new_tokens: usize,
    /// Sliding window fed to the model; `None` uses the model's context length
    pub context_size: Option<usize>,
    /// Keep only the k highest logits; `None` disables filtering
    pub top_k: Option<usize>,
    /// 0 selects the arg-max, larger values flatten the distribution
    pub temperature: f32,
    /// Stop after this id is produced
    pub eos_id: Option<u32>,
    /// Seed for [`generate`]; `None` draws from OS entropy
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 50,
            context_size: None,
            top_k: Some(50),
            temperature: 0.8,
            eos_id: None,
            seed: None,
        }
    }
}

impl GenerationConfig {
    /// Greedy decoding of `max_new_tokens` ids.
    #[must_use]
    pub fn greedy(max_new_tokens: usize) -> Self {
        Self {
            max_new_tokens,
            top_k: None,
            temperature: 0.0,
            ..Self::default()
        }
    }

    /// Validate against `model` and return the effective context size.
    ///
    /// # Errors
    /// Returns [`GptError::Sampling`] for a zero top-k, a negative or non-finite temperature, or
    /// a context size of zero or larger than the model's context length.
    pub fn validate(&self, model: &GptModel) -> Result<usize> {
        validate_sampling(self.top_k, self.temperature)?;

        let context_length = model.config().context_length;
        let context_size = self.context_size.unwrap_or(context_length);
        if context_size == 0 || context_size > context_length {
            return Err(GptError::Sampling(format!(
                "context_size must be in 1..={context_length}, got {context_size}"
            )));
        }
        Ok(context_size)
    }
}

/// Generate with an RNG seeded from `cfg.seed` (or OS entropy).
///
/// Returns the full token stream (prompt + generated).
///
/// # Errors
/// See [`generate_with_rng`].
pub fn generate(model: &GptModel, prompt_tokens: &[u32], cfg: &GenerationConfig) -> Result<Vec<u32>> {
    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    generate_with_rng(model, prompt_tokens, cfg, &mut rng)
}

/// Generate up to `cfg.max_new_tokens` ids after `prompt_tokens`.
///
/// Prompts longer than the context size are truncated from the left for every forward pass;
/// the returned sequence still starts with the whole prompt.
///
/// # Errors
/// - [`GptError::Sampling`] for invalid sampling parameters.
/// - [`GptError::InvalidInput`] for an empty prompt or ids outside the vocabulary.
///
/// Both are reported before any forward pass runs.
pub fn generate_with_rng<R: Rng + ?Sized>(
    model: &GptModel,
    prompt_tokens: &[u32],
    cfg: &GenerationConfig,
    rng: &mut R,
) -> Result<Vec<u32>> {
    let context_size = cfg.validate(model)?;
    validate_prompt(model, prompt_tokens)?;

    let mut tokens = prompt_tokens.to_vec();
    tokens.reserve(cfg.max_new_tokens);

    for _ in 0..cfg.max_new_tokens {
        let start = tokens.len().saturating_sub(context_size);
        let ctx = &tokens[start..];

        // Model expects (batch, seq_len).
        let input = Tensor::new(ctx, model.device())?.unsqueeze(0)?;
        let logits = model.forward_last(&input)?.squeeze(0)?.to_vec1::<f32>()?;

        let next = sample_from_logits(&logits, cfg.temperature, cfg.top_k, rng);
        tokens.push(next);

        if cfg.eos_id == Some(next) {
            break;
        }
    }

    Ok(tokens)
}

fn validate_prompt(model: &GptModel, prompt_tokens: &[u32]) -> Result<()> {
    if prompt_tokens.is_empty() {
        return Err(GptError::InvalidInput("prompt must contain at least one token".to_string()));
    }
    let vocab_size = model.config().vocab_size;
    if let Some(&bad) = prompt_tokens.iter().find(|&&t| t as usize >= vocab_size) {
        return Err(GptError::InvalidInput(format!(
            "token id {bad} is outside the vocabulary of {vocab_size}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;
    use crate::inference::sampling::argmax;
    use crate::model::GptConfig;

    fn tiny_model(seed: u64) -> GptModel {
        let config = GptConfig {
            vocab_size: 50,
            context_length: 16,
            emb_dim: 8,
            n_heads: 2,
            n_layers: 2,
            drop_rate: 0.1,
            qkv_bias: true,
        };
        GptModel::seeded(config, seed, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_appends_requested_number_of_tokens() {
        let model = tiny_model(0);
        let out = generate(&model, &[3, 7, 1], &GenerationConfig::greedy(5)).unwrap();
        assert_eq!(out.len(), 8);
        assert_eq!(&out[..3], &[3, 7, 1]);
        assert!(out.iter().all(|&t| t < 50));
    }

    #[test]
    fn test_greedy_matches_manual_argmax() {
        let model = tiny_model(1);
        let out = generate(&model, &[3, 7, 1], &GenerationConfig::greedy(3)).unwrap();

        let mut tokens = vec![3u32, 7, 1];
        for _ in 0..3 {
            let input = Tensor::new(tokens.as_slice(), model.device())
                .unwrap()
                .unsqueeze(0)
                .unwrap();
            let logits: Vec<f32> = model
                .forward_last(&input)
                .unwrap()
                .squeeze(0)
                .unwrap()
                .to_vec1()
                .unwrap();
            tokens.push(argmax(&logits));
        }
        assert_eq!(out, tokens);
    }

    #[test]
    fn test_long_prompt_is_truncated_not_rejected() {
        let model = tiny_model(2);
        let prompt: Vec<u32> = (0..40).map(|i| i % 50).collect();
        let cfg = GenerationConfig::greedy(3);

        let out = generate(&model, &prompt, &cfg).unwrap();
        let tail = generate(&model, &prompt[prompt.len() - 16..], &cfg).unwrap();
        assert_eq!(out.len(), 43);
        assert_eq!(&out[40..], &tail[16..]);
    }

    #[test]
    fn test_stops_at_eos() {
        let model = tiny_model(3);
        let greedy = generate(&model, &[3, 7, 1], &GenerationConfig::greedy(1)).unwrap();
        let first = greedy[3];

        let cfg = GenerationConfig {
            eos_id: Some(first),
            ..GenerationConfig::greedy(10)
        };
        let out = generate(&model, &[3, 7, 1], &cfg).unwrap();
        assert_eq!(out, vec![3, 7, 1, first]);
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let model = tiny_model(0);

        let zero_k = GenerationConfig {
            top_k: Some(0),
            ..GenerationConfig::default()
        };
        assert!(matches!(generate(&model, &[1], &zero_k), Err(GptError::Sampling(_))));

        let negative = GenerationConfig {
            temperature: -1.0,
            ..GenerationConfig::default()
        };
        assert!(matches!(generate(&model, &[1], &negative), Err(GptError::Sampling(_))));

        let wide = GenerationConfig {
            context_size: Some(17),
            ..GenerationConfig::default()
        };
        assert!(matches!(generate(&model, &[1], &wide), Err(GptError::Sampling(_))));
    }

    #[test]
    fn test_rejects_bad_prompts() {
        let model = tiny_model(0);
        let cfg = GenerationConfig::greedy(1);
        assert!(matches!(generate(&model, &[], &cfg), Err(GptError::InvalidInput(_))));
        assert!(matches!(generate(&model, &[1, 50], &cfg), Err(GptError::InvalidInput(_))));
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let model = tiny_model(4);
        let cfg = GenerationConfig {
            max_new_tokens: 6,
            top_k: Some(10),
            temperature: 1.5,
            seed: Some(99),
            ..GenerationConfig::default()
        };
        let a = generate(&model, &[3, 7, 1], &cfg).unwrap();
        let b = generate(&model, &[3, 7, 1], &cfg).unwrap();
        assert_eq!(a, b);
    }
}
