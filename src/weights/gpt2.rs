//! HuggingFace GPT-2 tensor layout.
//!
//! GPT-2 stores linear maps as Conv1D weights `(in_dim, out_dim)` and fuses the query, key
//! and value projections into one `c_attn` tensor of shape `(emb_dim, 3 * emb_dim)`.
//! Converting splits `c_attn` into three projections and transposes every Conv1D weight into
//! the `(out_dim, in_dim)` layout the model uses.

use std::collections::HashMap;

use candle_core::{DType, Tensor};

use super::checkpoint::{
    AttentionWeights, BlockWeights, Checkpoint, EmbeddingTables, FeedForwardWeights,
    LinearWeights, NormWeights,
};
use crate::error::{GptError, Result};
use crate::model::GptModel;

/// Prefix used by `GPT2LMHeadModel` exports.
const TRANSFORMER_PREFIX: &str = "transformer.";

/// Whether a tensor name is a non-parameter buffer (the causal mask in older exports).
#[must_use]
pub fn is_buffer(name: &str) -> bool {
    name.ends_with(".attn.bias") || name.ends_with(".attn.masked_bias")
}

fn take(tensors: &HashMap<String, Tensor>, name: &str) -> Result<Tensor> {
    let tensor = tensors
        .get(name)
        .ok_or_else(|| GptError::MissingParameter(name.to_string()))?;
    Ok(tensor.to_dtype(DType::F32)?)
}

fn take_optional(tensors: &HashMap<String, Tensor>, name: &str) -> Result<Option<Tensor>> {
    tensors
        .get(name)
        .map(|t| t.to_dtype(DType::F32).map_err(GptError::from))
        .transpose()
}

fn layer_norm(tensors: &HashMap<String, Tensor>, prefix: &str) -> Result<NormWeights> {
    Ok(NormWeights {
        scale: take(tensors, &format!("{prefix}.weight"))?,
        shift: take(tensors, &format!("{prefix}.bias"))?,
    })
}

fn conv1d(tensors: &HashMap<String, Tensor>, prefix: &str) -> Result<LinearWeights> {
    let weight = take(tensors, &format!("{prefix}.weight"))?;
    Ok(LinearWeights {
        weight: weight.t()?.contiguous()?,
        bias: take_optional(tensors, &format!("{prefix}.bias"))?,
    })
}

fn fused_qkv(tensors: &HashMap<String, Tensor>, prefix: &str, emb_dim: usize) -> Result<[LinearWeights; 3]> {
    let weight_name = format!("{prefix}.weight");
    let weight = take(tensors, &weight_name)?;
    let expected = [emb_dim, 3 * emb_dim];
    if weight.dims() != expected {
        return Err(GptError::shape_mismatch(weight_name, &expected, weight.dims()));
    }

    let bias_name = format!("{prefix}.bias");
    let bias = take_optional(tensors, &bias_name)?;
    if let Some(bias) = &bias {
        if bias.dims() != [3 * emb_dim] {
            return Err(GptError::shape_mismatch(bias_name, &[3 * emb_dim], bias.dims()));
        }
    }

    let split = |i: usize| -> Result<LinearWeights> {
        let weight = weight.narrow(1, i * emb_dim, emb_dim)?.t()?.contiguous()?;
        let bias = bias
            .as_ref()
            .map(|b| b.narrow(0, i * emb_dim, emb_dim)?.contiguous())
            .transpose()?;
        Ok(LinearWeights { weight, bias })
    };
    Ok([split(0)?, split(1)?, split(2)?])
}

impl Checkpoint {
    /// Build a checkpoint from tensors named in the HuggingFace GPT-2 layout.
    ///
    /// The number of blocks is the number of consecutive `h.{i}` groups present. Names may
    /// carry a `transformer.` prefix. `lm_head.weight`, when present, becomes an untied
    /// output head.
    ///
    /// # Errors
    /// Returns [`GptError::MissingParameter`] for an absent tensor and
    /// [`GptError::ShapeMismatch`] when a fused `c_attn` tensor has the wrong shape.
    pub fn from_gpt2_tensors(tensors: HashMap<String, Tensor>) -> Result<Self> {
        let tensors: HashMap<String, Tensor> = tensors
            .into_iter()
            .filter(|(name, _)| !is_buffer(name))
            .map(|(name, t)| match name.strip_prefix(TRANSFORMER_PREFIX) {
                Some(stripped) => (stripped.to_string(), t),
                None => (name, t),
            })
            .collect();

        let token = take(&tensors, "wte.weight")?;
        let (_, emb_dim) = token.dims2()?;
        let position = take(&tensors, "wpe.weight")?;

        let n_layers = (0..)
            .take_while(|i| tensors.contains_key(&format!("h.{i}.ln_1.weight")))
            .count();

        let mut blocks = Vec::with_capacity(n_layers);
        for i in 0..n_layers {
            let p = format!("h.{i}");
            let [query, key, value] = fused_qkv(&tensors, &format!("{p}.attn.c_attn"), emb_dim)?;
            blocks.push(BlockWeights {
                norm1: layer_norm(&tensors, &format!("{p}.ln_1"))?,
                attention: AttentionWeights {
                    query,
                    key,
                    value,
                    out_proj: conv1d(&tensors, &format!("{p}.attn.c_proj"))?,
                },
                norm2: layer_norm(&tensors, &format!("{p}.ln_2"))?,
                feed_forward: FeedForwardWeights {
                    fc: conv1d(&tensors, &format!("{p}.mlp.c_fc"))?,
                    proj: conv1d(&tensors, &format!("{p}.mlp.c_proj"))?,
                },
            });
        }

        Ok(Self {
            embeddings: EmbeddingTables { token, position },
            blocks,
            final_norm: layer_norm(&tensors, "ln_f")?,
            out_head: take_optional(&tensors, "lm_head.weight")?,
        })
    }
}

fn push_conv1d(out: &mut HashMap<String, Tensor>, prefix: &str, weights: &LinearWeights) -> Result<()> {
    out.insert(format!("{prefix}.weight"), weights.weight.t()?.contiguous()?);
    if let Some(bias) = &weights.bias {
        out.insert(format!("{prefix}.bias"), bias.clone());
    }
    Ok(())
}

fn push_layer_norm(out: &mut HashMap<String, Tensor>, prefix: &str, weights: &NormWeights) {
    out.insert(format!("{prefix}.weight"), weights.scale.clone());
    out.insert(format!("{prefix}.bias"), weights.shift.clone());
}

/// Export `model` in the HuggingFace GPT-2 layout, the inverse of
/// [`Checkpoint::from_gpt2_tensors`].
///
/// # Errors
/// Returns an error if tensor operations fail.
pub fn gpt2_tensors_from_model(model: &GptModel) -> Result<HashMap<String, Tensor>> {
    let ckpt = Checkpoint::from_model(model);
    let mut out = HashMap::new();

    out.insert("wte.weight".to_string(), ckpt.embeddings.token.clone());
    out.insert("wpe.weight".to_string(), ckpt.embeddings.position.clone());

    for (i, block) in ckpt.blocks.iter().enumerate() {
        let p = format!("h.{i}");
        let attn = &block.attention;
        let qkv = [&attn.query, &attn.key, &attn.value];

        let weights = qkv
            .iter()
            .map(|w| w.weight.t())
            .collect::<candle_core::Result<Vec<_>>>()?;
        out.insert(format!("{p}.attn.c_attn.weight"), Tensor::cat(&weights, 1)?.contiguous()?);

        let biases: Option<Vec<&Tensor>> = qkv.iter().map(|w| w.bias.as_ref()).collect();
        if let Some(biases) = biases {
            out.insert(format!("{p}.attn.c_attn.bias"), Tensor::cat(&biases, 0)?);
        }

        push_conv1d(&mut out, &format!("{p}.attn.c_proj"), &attn.out_proj)?;
        push_layer_norm(&mut out, &format!("{p}.ln_1"), &block.norm1);
        push_layer_norm(&mut out, &format!("{p}.ln_2"), &block.norm2);
        push_conv1d(&mut out, &format!("{p}.mlp.c_fc"), &block.feed_forward.fc)?;
        push_conv1d(&mut out, &format!("{p}.mlp.c_proj"), &block.feed_forward.proj)?;
    }

    push_layer_norm(&mut out, "ln_f", &ckpt.final_norm);
    out.insert("lm_head.weight".to_string(), ckpt.out_head_weight().clone());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;
    use crate::model::GptConfig;
    use crate::weights::load_checkpoint;

    fn tiny_config() -> GptConfig {
        GptConfig {
            vocab_size: 50,
            context_length: 16,
            emb_dim: 8,
            n_heads: 2,
            n_layers: 2,
            drop_rate: 0.0,
            qkv_bias: true,
        }
    }

    #[test]
    fn test_export_layout_shapes() {
        let device = Device::Cpu;
        let model = GptModel::seeded(tiny_config(), 0, &device).unwrap();
        let tensors = gpt2_tensors_from_model(&model).unwrap();

        assert_eq!(tensors["wte.weight"].dims(), &[50, 8]);
        assert_eq!(tensors["h.0.attn.c_attn.weight"].dims(), &[8, 24]);
        assert_eq!(tensors["h.0.attn.c_attn.bias"].dims(), &[24]);
        assert_eq!(tensors["h.1.mlp.c_fc.weight"].dims(), &[8, 32]);
        assert_eq!(tensors["h.1.mlp.c_proj.weight"].dims(), &[32, 8]);
    }

    #[test]
    fn test_split_recovers_projections() {
        let device = Device::Cpu;
        let model = GptModel::seeded(tiny_config(), 3, &device).unwrap();
        let ckpt = Checkpoint::from_gpt2_tensors(gpt2_tensors_from_model(&model).unwrap()).unwrap();

        assert_eq!(ckpt.n_layers(), 2);
        let original: Vec<Vec<f32>> = model.blocks[1].attn.value.weight().to_vec2().unwrap();
        let converted: Vec<Vec<f32>> = ckpt.blocks[1].attention.value.weight.to_vec2().unwrap();
        assert_eq!(original, converted);
    }

    #[test]
    fn test_prefix_and_buffers_are_handled() {
        let device = Device::Cpu;
        let model = GptModel::seeded(tiny_config(), 5, &device).unwrap();
        let mut tensors: HashMap<String, Tensor> = gpt2_tensors_from_model(&model)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (format!("transformer.{k}"), v))
            .collect();
        tensors.insert(
            "transformer.h.0.attn.bias".to_string(),
            Tensor::ones((1, 1, 16, 16), DType::F32, &device).unwrap(),
        );

        let ckpt = Checkpoint::from_gpt2_tensors(tensors).unwrap();
        let mut target = GptModel::seeded(tiny_config(), 6, &device).unwrap();
        load_checkpoint(&mut target, &ckpt).unwrap();
    }

    #[test]
    fn test_transposed_fused_attention_is_rejected() {
        let device = Device::Cpu;
        let model = GptModel::seeded(tiny_config(), 0, &device).unwrap();
        let mut tensors = gpt2_tensors_from_model(&model).unwrap();
        let fused = tensors["h.0.attn.c_attn.weight"].t().unwrap().contiguous().unwrap();
        tensors.insert("h.0.attn.c_attn.weight".to_string(), fused);

        match Checkpoint::from_gpt2_tensors(tensors).unwrap_err() {
            GptError::ShapeMismatch { name, expected, actual } => {
                assert_eq!(name, "h.0.attn.c_attn.weight");
                assert_eq!(expected, vec![8, 24]);
                assert_eq!(actual, vec![24, 8]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_tensor_is_named() {
        let device = Device::Cpu;
        let model = GptModel::seeded(tiny_config(), 0, &device).unwrap();
        let mut tensors = gpt2_tensors_from_model(&model).unwrap();
        tensors.remove("ln_f.bias");

        let err = Checkpoint::from_gpt2_tensors(tensors).unwrap_err();
        assert!(matches!(err, GptError::MissingParameter(ref n) if n == "ln_f.bias"));
    }
}
