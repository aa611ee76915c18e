#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod inference;
pub mod model;
pub mod service;
pub mod tokenizer;
pub mod weights;

pub use error::{GptError, Result};
pub use inference::{GenerationConfig, generate};
pub use model::{GptConfig, GptModel};
pub use service::{ChatError, ChatReply, ChatRequest, ChatService, ChatSettings};
pub use tokenizer::{HfTokenizer, TextCodec};
pub use weights::{Checkpoint, load_checkpoint};
