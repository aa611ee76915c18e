//! Checkpoint records, the GPT-2 tensor layout, and file loading.

pub mod checkpoint;
pub mod gpt2;
pub mod loader;

pub use checkpoint::{
    AttentionWeights, BlockWeights, Checkpoint, EmbeddingTables, FeedForwardWeights,
    LinearWeights, NormWeights, load_checkpoint, validate_checkpoint,
};
pub use gpt2::gpt2_tensors_from_model;
pub use loader::{load_config, load_config_for_weights, load_pretrained, read_checkpoint, save_pretrained};
