pub mod attention;
pub mod config;
pub mod embedding;
pub mod init;
pub mod layers;
pub mod norm;
pub mod transformer;

// Re-exports for convenience
pub use attention::{CausalSelfAttention, create_causal_mask};
pub use config::{Gpt2HfConfig, GptConfig};
pub use embedding::{PositionEmbedding, TokenEmbedding};
pub use layers::{FeedForward, TransformerBlock};
pub use norm::{LAYER_NORM_EPS, LayerNorm, normalize};
pub use transformer::GptModel;
