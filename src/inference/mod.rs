pub mod generate;
pub mod sampling;

pub use generate::{GenerationConfig, generate, generate_with_rng};
pub use sampling::{argmax, sample_from_logits, top_k_filter_in_place, validate_sampling};
