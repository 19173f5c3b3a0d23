//! Embedding producer
//!
//! Architecture:
//! - Encoder trait for the tokenizer + model forward pass
//! - FastEmbedEncoder for local inference (multilingual-e5-base, 768-dim)
//! - Explicit mean pooling and L2 normalization over encoder output
//! - NewsEmbedder serializing every load and forward pass

mod embedder;
pub mod pooling;
mod provider;

pub use embedder::NewsEmbedder;
pub use provider::{
    resolve_model, EmbeddingError, Encoder, EncoderOutput, FastEmbedEncoder, FastEmbedLoader,
    ModelLoader,
};
