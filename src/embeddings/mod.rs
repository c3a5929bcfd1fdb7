// Embedding capability, its Ollama implementation and the on-disk cache

use async_trait::async_trait;

use crate::Result;

pub mod cache;
pub mod ollama;

pub use cache::{EmbeddingBatch, EmbeddingCache, decode_embedding, embed_texts, encode_embedding};
pub use ollama::{DEFAULT_EMBEDDING_DIMENSION, OllamaClient};

/// Turns texts into vectors. Output order matches input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier stored alongside each computed vector
    fn model_name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
