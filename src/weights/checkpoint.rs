//! In-memory checkpoint and loading into a constructed model.
//!
//! A [`Checkpoint`] groups parameters per transformer block rather than per model component.
//! [`load_checkpoint`] checks the layer count and every tensor shape before it touches the
//! model, so a failed load leaves the model unchanged. Tensors are cast to f32 on the model's
//! device first.

use std::collections::HashMap;

use candle_core::{DType, Device, Tensor};
use candle_nn::{Embedding, Linear};

use crate::error::{GptError, Result};
use crate::model::{CausalSelfAttention, FeedForward, GptModel, LayerNorm, TransformerBlock};

/// Weight and optional bias of a linear map, weight stored as `(out_dim, in_dim)`.
#[derive(Debug, Clone)]
pub struct LinearWeights {
    pub weight: Tensor,
    pub bias: Option<Tensor>,
}

/// Normalizer scale and shift.
#[derive(Debug, Clone)]
pub struct NormWeights {
    pub scale: Tensor,
    pub shift: Tensor,
}

#[derive(Debug, Clone)]
pub struct AttentionWeights {
    pub query: LinearWeights,
    pub key: LinearWeights,
    pub value: LinearWeights,
    pub out_proj: LinearWeights,
}

#[derive(Debug, Clone)]
pub struct FeedForwardWeights {
    pub fc: LinearWeights,
    pub proj: LinearWeights,
}

/// Parameters of one transformer block.
#[derive(Debug, Clone)]
pub struct BlockWeights {
    pub norm1: NormWeights,
    pub attention: AttentionWeights,
    pub norm2: NormWeights,
    pub feed_forward: FeedForwardWeights,
}

#[derive(Debug, Clone)]
pub struct EmbeddingTables {
    /// (vocab_size, emb_dim)
    pub token: Tensor,
    /// (context_length, emb_dim)
    pub position: Tensor,
}

/// Full parameter snapshot of a decoder model.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub embeddings: EmbeddingTables,
    pub blocks: Vec<BlockWeights>,
    pub final_norm: NormWeights,
    /// Output head `(vocab_size, emb_dim)`; `None` ties it to the token embedding table.
    pub out_head: Option<Tensor>,
}

fn cast(tensor: &Tensor, device: &Device) -> Result<Tensor> {
    Ok(tensor.to_dtype(DType::F32)?.to_device(device)?)
}

impl LinearWeights {
    fn cast(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            weight: cast(&self.weight, device)?,
            bias: self.bias.as_ref().map(|b| cast(b, device)).transpose()?,
        })
    }

    fn of(linear: &Linear) -> Self {
        Self {
            weight: linear.weight().clone(),
            bias: linear.bias().cloned(),
        }
    }

    fn to_linear(&self) -> Linear {
        Linear::new(self.weight.clone(), self.bias.clone())
    }

    fn push_named(&self, prefix: &str, out: &mut Vec<(String, Tensor)>) {
        out.push((format!("{prefix}.weight"), self.weight.clone()));
        if let Some(bias) = &self.bias {
            out.push((format!("{prefix}.bias"), bias.clone()));
        }
    }
}

impl NormWeights {
    fn cast(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            scale: cast(&self.scale, device)?,
            shift: cast(&self.shift, device)?,
        })
    }

    fn of(norm: &LayerNorm) -> Self {
        Self {
            scale: norm.scale().clone(),
            shift: norm.shift().clone(),
        }
    }

    fn to_norm(&self) -> LayerNorm {
        LayerNorm::from_weights(self.scale.clone(), self.shift.clone())
    }

    fn push_named(&self, prefix: &str, out: &mut Vec<(String, Tensor)>) {
        out.push((format!("{prefix}.scale"), self.scale.clone()));
        out.push((format!("{prefix}.shift"), self.shift.clone()));
    }
}

impl BlockWeights {
    fn cast(&self, device: &Device) -> Result<Self> {
        let attn = &self.attention;
        Ok(Self {
            norm1: self.norm1.cast(device)?,
            attention: AttentionWeights {
                query: attn.query.cast(device)?,
                key: attn.key.cast(device)?,
                value: attn.value.cast(device)?,
                out_proj: attn.out_proj.cast(device)?,
            },
            norm2: self.norm2.cast(device)?,
            feed_forward: FeedForwardWeights {
                fc: self.feed_forward.fc.cast(device)?,
                proj: self.feed_forward.proj.cast(device)?,
            },
        })
    }

    fn of(block: &TransformerBlock) -> Self {
        Self {
            norm1: NormWeights::of(&block.norm1),
            attention: AttentionWeights {
                query: LinearWeights::of(&block.attn.query),
                key: LinearWeights::of(&block.attn.key),
                value: LinearWeights::of(&block.attn.value),
                out_proj: LinearWeights::of(&block.attn.out_proj),
            },
            norm2: NormWeights::of(&block.norm2),
            feed_forward: FeedForwardWeights {
                fc: LinearWeights::of(&block.ff.fc),
                proj: LinearWeights::of(&block.ff.proj),
            },
        }
    }

    fn assign_to(&self, block: &mut TransformerBlock) {
        block.norm1 = self.norm1.to_norm();
        assign_attention(&self.attention, &mut block.attn);
        block.norm2 = self.norm2.to_norm();
        assign_feed_forward(&self.feed_forward, &mut block.ff);
    }

    fn push_named(&self, prefix: &str, out: &mut Vec<(String, Tensor)>) {
        self.norm1.push_named(&format!("{prefix}.norm1"), out);
        let attn = &self.attention;
        attn.query.push_named(&format!("{prefix}.attn.query"), out);
        attn.key.push_named(&format!("{prefix}.attn.key"), out);
        attn.value.push_named(&format!("{prefix}.attn.value"), out);
        attn.out_proj.push_named(&format!("{prefix}.attn.out_proj"), out);
        self.norm2.push_named(&format!("{prefix}.norm2"), out);
        self.feed_forward.fc.push_named(&format!("{prefix}.ff.fc"), out);
        self.feed_forward.proj.push_named(&format!("{prefix}.ff.proj"), out);
    }
}

fn assign_attention(weights: &AttentionWeights, attn: &mut CausalSelfAttention) {
    attn.query = weights.query.to_linear();
    attn.key = weights.key.to_linear();
    attn.value = weights.value.to_linear();
    attn.out_proj = weights.out_proj.to_linear();
}

fn assign_feed_forward(weights: &FeedForwardWeights, ff: &mut FeedForward) {
    ff.fc = weights.fc.to_linear();
    ff.proj = weights.proj.to_linear();
}

impl Checkpoint {
    /// Snapshot every parameter of `model`.
    ///
    /// Tensors share storage with the model; nothing is copied.
    #[must_use]
    pub fn from_model(model: &GptModel) -> Self {
        Self {
            embeddings: EmbeddingTables {
                token: model.tok_emb.weights().clone(),
                position: model.pos_emb.weights().clone(),
            },
            blocks: model.blocks.iter().map(BlockWeights::of).collect(),
            final_norm: NormWeights::of(&model.final_norm),
            out_head: Some(model.out_head.weight().clone()),
        }
    }

    /// Copy with every tensor converted to f32 on `device`.
    ///
    /// # Errors
    /// Returns an error if a conversion fails.
    pub fn to_f32_on(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            embeddings: EmbeddingTables {
                token: cast(&self.embeddings.token, device)?,
                position: cast(&self.embeddings.position, device)?,
            },
            blocks: self
                .blocks
                .iter()
                .map(|b| b.cast(device))
                .collect::<Result<_>>()?,
            final_norm: self.final_norm.cast(device)?,
            out_head: self.out_head.as_ref().map(|t| cast(t, device)).transpose()?,
        })
    }

    /// Number of transformer blocks in the checkpoint.
    #[must_use]
    pub fn n_layers(&self) -> usize {
        self.blocks.len()
    }

    /// The output head, falling back to the token embedding table when tied.
    #[must_use]
    pub fn out_head_weight(&self) -> &Tensor {
        self.out_head.as_ref().unwrap_or(&self.embeddings.token)
    }

    /// Every tensor as `(name, tensor)`, in the same order and naming as
    /// [`GptModel::named_parameters`].
    #[must_use]
    pub fn named_tensors(&self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        out.push(("tok_emb.weight".to_string(), self.embeddings.token.clone()));
        out.push(("pos_emb.weight".to_string(), self.embeddings.position.clone()));
        for (i, block) in self.blocks.iter().enumerate() {
            block.push_named(&format!("blocks.{i}"), &mut out);
        }
        self.final_norm.push_named("final_norm", &mut out);
        out.push(("out_head.weight".to_string(), self.out_head_weight().clone()));
        out
    }
}

/// Overwrite every parameter of `model` with the checkpoint's tensors, cast to f32 on the
/// model's device.
///
/// # Errors
/// - [`GptError::LayerCountMismatch`] if the block counts differ.
/// - [`GptError::ShapeMismatch`] naming the first parameter whose shape differs.
/// - [`GptError::MissingParameter`] / [`GptError::UnexpectedParameter`] if bias presence
///   disagrees with the model.
///
/// On error the model is left untouched.
pub fn load_checkpoint(model: &mut GptModel, checkpoint: &Checkpoint) -> Result<()> {
    let checkpoint = &checkpoint.to_f32_on(model.device())?;
    validate_checkpoint(model, checkpoint)?;

    model.tok_emb.embedding =
        Embedding::new(checkpoint.embeddings.token.clone(), model.config().emb_dim);
    model.pos_emb.embedding =
        Embedding::new(checkpoint.embeddings.position.clone(), model.config().emb_dim);
    for (weights, block) in checkpoint.blocks.iter().zip(model.blocks.iter_mut()) {
        weights.assign_to(block);
    }
    model.final_norm = checkpoint.final_norm.to_norm();
    model.out_head = Linear::new(checkpoint.out_head_weight().clone(), None);
    Ok(())
}

/// Check that `checkpoint` fits `model` exactly, without modifying anything.
///
/// # Errors
/// Same as [`load_checkpoint`].
pub fn validate_checkpoint(model: &GptModel, checkpoint: &Checkpoint) -> Result<()> {
    let expected_layers = model.config().n_layers;
    if checkpoint.n_layers() != expected_layers {
        return Err(GptError::LayerCountMismatch {
            expected: expected_layers,
            actual: checkpoint.n_layers(),
        });
    }

    let mut provided: HashMap<String, Tensor> = checkpoint.named_tensors().into_iter().collect();
    for (name, param) in model.named_parameters() {
        let Some(tensor) = provided.remove(&name) else {
            return Err(GptError::MissingParameter(name));
        };
        if tensor.dims() != param.dims() {
            return Err(GptError::shape_mismatch(name, param.dims(), tensor.dims()));
        }
    }

    let mut extra: Vec<String> = provided.into_keys().collect();
    extra.sort();
    match extra.into_iter().next() {
        Some(name) => Err(GptError::UnexpectedParameter(name)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device};

    use super::*;
    use crate::model::GptConfig;

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
    fn test_names_match_model_order() {
        let device = Device::Cpu;
        let model = GptModel::seeded(tiny_config(), 0, &device).unwrap();
        let names: Vec<String> = model.named_parameters().into_iter().map(|(n, _)| n).collect();

        assert_eq!(names[0], "tok_emb.weight");
        assert_eq!(names[1], "pos_emb.weight");
        assert!(names.contains(&"blocks.1.attn.query.bias".to_string()));
        assert!(names.contains(&"blocks.0.ff.proj.weight".to_string()));
        assert_eq!(names.last().unwrap(), "out_head.weight");
    }

    #[test]
    fn test_tied_head_uses_token_table() {
        let device = Device::Cpu;
        let model = GptModel::seeded(tiny_config(), 0, &device).unwrap();
        let mut ckpt = Checkpoint::from_model(&model);
        ckpt.out_head = None;

        let mut target = GptModel::seeded(tiny_config(), 1, &device).unwrap();
        load_checkpoint(&mut target, &ckpt).unwrap();

        let head: Vec<Vec<f32>> = target.out_head.weight().to_vec2().unwrap();
        let table: Vec<Vec<f32>> = model.tok_emb.weights().to_vec2().unwrap();
        assert_eq!(head, table);
    }

    #[test]
    fn test_failed_load_leaves_model_untouched() {
        let device = Device::Cpu;
        let source = GptModel::seeded(tiny_config(), 0, &device).unwrap();
        let mut ckpt = Checkpoint::from_model(&source);
        ckpt.blocks[1].feed_forward.proj.weight = Tensor::zeros((32, 8), DType::F32, &device).unwrap();

        let mut target = GptModel::seeded(tiny_config(), 1, &device).unwrap();
        let before: Vec<Vec<f32>> = target.tok_emb.weights().to_vec2().unwrap();

        let err = load_checkpoint(&mut target, &ckpt).unwrap_err();
        match err {
            GptError::ShapeMismatch { name, expected, actual } => {
                assert_eq!(name, "blocks.1.ff.proj.weight");
                assert_eq!(expected, vec![8, 32]);
                assert_eq!(actual, vec![32, 8]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let after: Vec<Vec<f32>> = target.tok_emb.weights().to_vec2().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_half_precision_checkpoint_is_cast_on_load() {
        let device = Device::Cpu;
        let source = GptModel::seeded(tiny_config(), 0, &device).unwrap();
        let half = Checkpoint::from_model(&source).to_f32_on(&device).unwrap();
        let half = Checkpoint {
            embeddings: EmbeddingTables {
                token: half.embeddings.token.to_dtype(DType::F16).unwrap(),
                position: half.embeddings.position.to_dtype(DType::BF16).unwrap(),
            },
            blocks: half.blocks,
            final_norm: NormWeights {
                scale: half.final_norm.scale.to_dtype(DType::F16).unwrap(),
                shift: half.final_norm.shift,
            },
            out_head: None,
        };

        let mut target = GptModel::seeded(tiny_config(), 1, &device).unwrap();
        load_checkpoint(&mut target, &half).unwrap();

        assert!(
            target
                .named_parameters()
                .iter()
                .all(|(_, t)| t.dtype() == DType::F32)
        );
        let ids = Tensor::new(&[[3u32, 7, 1]], &device).unwrap();
        let logits = target.forward(&ids).unwrap();
        assert_eq!(logits.dims(), &[1, 3, 50]);
        assert_eq!(logits.dtype(), DType::F32);
    }

    #[test]
    fn test_layer_count_mismatch() {
        let device = Device::Cpu;
        let source = GptModel::seeded(tiny_config(), 0, &device).unwrap();
        let mut ckpt = Checkpoint::from_model(&source);
        ckpt.blocks.pop();

        let mut target = GptModel::seeded(tiny_config(), 1, &device).unwrap();
        let err = load_checkpoint(&mut target, &ckpt).unwrap_err();
        assert!(matches!(
            err,
            GptError::LayerCountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_bias_presence_must_agree() {
        let device = Device::Cpu;
        let with_bias = GptModel::seeded(tiny_config(), 0, &device).unwrap();
        let no_bias_config = GptConfig {
            qkv_bias: false,
            ..tiny_config()
        };
        let mut no_bias = GptModel::seeded(no_bias_config, 0, &device).unwrap();

        let err = load_checkpoint(&mut no_bias, &Checkpoint::from_model(&with_bias)).unwrap_err();
        assert!(matches!(err, GptError::UnexpectedParameter(ref n) if n == "blocks.0.attn.key.bias"));

        let mut with_bias = with_bias;
        let err = load_checkpoint(&mut with_bias, &Checkpoint::from_model(&no_bias)).unwrap_err();
        assert!(matches!(err, GptError::MissingParameter(ref n) if n == "blocks.0.attn.query.bias"));
    }
}
