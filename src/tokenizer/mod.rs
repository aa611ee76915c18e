//! Text <-> token id conversion.
//!
//! The model only sees ids; anything that can encode and decode implements [`TextCodec`].

pub mod hf;

pub use hf::HfTokenizer;

use crate::error::Result;

/// Opaque encode/decode service used by the chat layer.
pub trait TextCodec {
    /// Encode text to token ids.
    ///
    /// # Errors
    /// Returns an error if the text cannot be tokenized.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token ids back to text.
    ///
    /// # Errors
    /// Returns an error if an id is unknown to the codec.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// End-of-sequence id, if the vocabulary has one.
    fn eos_id(&self) -> Option<u32> {
        None
    }
}
