//! Embedding seam for the vector half of the resolver cascade.
//!
//! An implementation is deliberately not shipped: the gateway neither trains
//! nor hosts embedding models. `DisabledEmbeddings` keeps the cascade purely
//! lexical until a real provider is wired in behind this trait.

use async_trait::async_trait;

use super::SearchError;

/// Produces a query embedding, or `None` when no model is available.
#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, SearchError>;

    /// Dimensionality of the vectors this index produces.
    fn dimension(&self) -> usize {
        768
    }
}

/// The default no-model implementation.
pub struct DisabledEmbeddings;

#[async_trait]
impl EmbeddingIndex for DisabledEmbeddings {
    async fn embed(&self, _text: &str) -> Result<Option<Vec<f32>>, SearchError> {
        Ok(None)
    }
}

/// Cosine similarity between two vectors. Returns 0.0 on dimension mismatch
/// or zero magnitude.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
