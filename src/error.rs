//! Error types for the model, checkpoint loading and generation.

use thiserror::Error;

/// Result type alias for gpt-gen operations.
pub type Result<T> = std::result::Result<T, GptError>;

/// Errors that can occur while building, loading or running a model.
#[derive(Error, Debug)]
pub enum GptError {
    /// Invalid model configuration.
    #[error("invalid config: {0}")]
    Config(String),

    /// A checkpoint tensor does not have the shape of the model parameter.
    #[error("shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Checkpoint and model disagree on the number of transformer blocks.
    #[error("layer count mismatch: model has {expected} blocks, checkpoint has {actual}")]
    LayerCountMismatch { expected: usize, actual: usize },

    /// The model expects a parameter the checkpoint does not provide.
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    /// The checkpoint provides a parameter the model has no slot for.
    #[error("unexpected parameter: {0}")]
    UnexpectedParameter(String),

    /// Invalid top-k, temperature or context size passed to generation.
    #[error("invalid sampling parameter: {0}")]
    Sampling(String),

    /// Empty prompt or token ids outside the vocabulary.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Tokenizer failure.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Safetensors parse error.
    #[error("safetensors error: {0}")]
    SafeTensor(#[from] safetensors::SafeTensorError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GptError {
    pub(crate) fn shape_mismatch(name: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            name: name.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
