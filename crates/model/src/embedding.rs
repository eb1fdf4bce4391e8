use crate::provider::ModelProviderError;

/// A type that turns texts into embedding vectors.
///
/// Like [`crate::ModelProvider`], an embedding provider should behave like
/// a stateless object once created.
pub trait EmbeddingProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// Embeds every text in `texts`.
    ///
    /// On success the returned vector has exactly one embedding per input
    /// text, in the same order.
    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, Self::Error>> + Send + 'static;
}

/// Computes the cosine similarity of two vectors.
///
/// Returns `0.0` when either vector has zero length or the dimensions
/// differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
