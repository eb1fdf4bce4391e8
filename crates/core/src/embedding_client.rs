use std::pin::Pin;
use std::sync::Arc;

use tavern_model::{EmbeddingProvider, ModelProviderError};
use tracing::Instrument;

type EmbedResult = Result<Vec<Vec<f32>>, Box<dyn ModelProviderError>>;
type BoxedEmbedFuture = Pin<Box<dyn Future<Output = EmbedResult> + Send>>;
type HandlerFn = Arc<dyn Fn(Vec<String>) -> BoxedEmbedFuture + Send + Sync>;

/// A type-erased wrapper around an embedding provider.
#[derive(Clone)]
pub struct EmbeddingClient {
    handler_fn: HandlerFn,
}

impl EmbeddingClient {
    /// Wraps `provider`.
    #[inline]
    pub fn new<P: EmbeddingProvider + 'static>(provider: P) -> Self {
        let handler_fn: HandlerFn = Arc::new(move |texts| {
            let fut = provider.embed(&texts);
            Box::pin(
                async move {
                    trace!("embedding {} texts", texts.len());
                    let vectors = fut.await.map_err(|err| {
                        error!("embedding failed: {err:?}");
                        Box::new(err) as Box<dyn ModelProviderError>
                    })?;
                    Ok(vectors)
                }
                .instrument(trace_span!("embedding client req")),
            )
        });
        Self { handler_fn }
    }

    /// Embeds `texts`, returning one vector per text in order.
    #[inline]
    pub async fn embed(&self, texts: Vec<String>) -> EmbedResult {
        (self.handler_fn)(texts).await
    }
}
