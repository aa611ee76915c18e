//! Chat request handling.
//!
//! [`ChatService`] is the context a transport layer holds: one model, one codec and the
//! sampling settings, built once at startup and shared read-only between requests.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;
use crate::inference::{GenerationConfig, generate_with_rng};
use crate::model::GptModel;
use crate::tokenizer::TextCodec;

/// Incoming chat message, `{"message": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Successful reply, `{"reply": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

/// Error payload, `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Request failures as seen by the caller.
///
/// Internal failures never expose the underlying error text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Failed to generate response")]
    Internal,
}

impl ChatError {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Internal => 500,
        }
    }

    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
        }
    }
}

/// Sampling settings applied to every request.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub max_new_tokens: usize,
    pub top_k: Option<usize>,
    pub temperature: f32,
    /// `None` uses the model's context length
    pub context_size: Option<usize>,
    /// Seed every request's RNG with this value; `None` draws from OS entropy per request
    pub seed: Option<u64>,
    /// Stop generating at the codec's end-of-sequence id
    pub stop_at_eos: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_new_tokens: 50,
            top_k: Some(50),
            temperature: 0.8,
            context_size: None,
            seed: None,
            stop_at_eos: false,
        }
    }
}

/// Model, codec and settings shared by all requests.
pub struct ChatService<C> {
    model: GptModel,
    codec: C,
    settings: ChatSettings,
}

impl<C: TextCodec> ChatService<C> {
    #[must_use]
    pub fn new(model: GptModel, codec: C, settings: ChatSettings) -> Self {
        Self {
            model,
            codec,
            settings,
        }
    }

    #[must_use]
    pub fn model(&self) -> &GptModel {
        &self.model
    }

    #[must_use]
    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Answer one chat message.
    ///
    /// # Errors
    /// [`ChatError::BadRequest`] for an empty message, [`ChatError::Internal`] for anything that
    /// fails after validation.
    pub fn handle(&self, request: &ChatRequest) -> std::result::Result<ChatReply, ChatError> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(ChatError::BadRequest("Empty message".to_string()));
        }

        self.reply_to(message).map_err(|err| {
            tracing::error!(error = %err, "error generating response");
            ChatError::Internal
        })
    }

    /// Parse a JSON request body and answer it.
    ///
    /// Returns the status code and the JSON response body.
    #[must_use]
    pub fn handle_json(&self, body: &str) -> (u16, String) {
        let result = match serde_json::from_str::<ChatRequest>(body) {
            Ok(request) => self.handle(&request),
            Err(_) => Err(ChatError::BadRequest("No message provided".to_string())),
        };

        let encoded = match &result {
            Ok(reply) => serde_json::to_string(reply),
            Err(err) => serde_json::to_string(&err.body()),
        };
        let status = result.as_ref().map_or_else(ChatError::status, |_| 200);
        match encoded {
            Ok(json) => (status, json),
            Err(err) => {
                tracing::error!(error = %err, "failed to encode response");
                let fallback = ChatError::Internal;
                (fallback.status(), format!(r#"{{"error":"{fallback}"}}"#))
            }
        }
    }

    fn reply_to(&self, message: &str) -> Result<ChatReply> {
        let prompt = self.codec.encode(message)?;
        tracing::debug!(prompt_tokens = prompt.len(), "generating reply");

        let cfg = GenerationConfig {
            max_new_tokens: self.settings.max_new_tokens,
            context_size: self.settings.context_size,
            top_k: self.settings.top_k,
            temperature: self.settings.temperature,
            eos_id: if self.settings.stop_at_eos {
                self.codec.eos_id()
            } else {
                None
            },
            seed: self.settings.seed,
        };
        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let tokens = generate_with_rng(&self.model, &prompt, &cfg, &mut rng)?;
        let reply = self.codec.decode(&tokens[prompt.len()..])?;
        Ok(ChatReply {
            reply: reply.trim().to_string(),
        })
    }
}
