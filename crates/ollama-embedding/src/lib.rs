//! An embedding provider backed by an Ollama server.

#[macro_use]
extern crate tracing;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tavern_model::{EmbeddingProvider, ErrorKind, ModelProviderError};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "nomic-embed-text";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for [`OllamaEmbeddingProvider`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OllamaEmbeddingConfig {
    model: String,
    base_url: String,
    timeout: Duration,
}

impl Default for OllamaEmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_owned(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl OllamaEmbeddingConfig {
    /// Sets the embedding model.
    #[inline]
    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the server URL, e.g. `http://10.0.0.2:11434`.
    #[inline]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Sets the request timeout.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the embedding model.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Error type for [`OllamaEmbeddingProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embeds texts with Ollama's `/api/embed` endpoint.
#[derive(Clone, Debug)]
pub struct OllamaEmbeddingProvider {
    client: Client,
    config: Arc<OllamaEmbeddingConfig>,
}

impl OllamaEmbeddingProvider {
    /// Creates a provider with the given configuration.
    #[inline]
    pub fn new(config: OllamaEmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }
}

impl EmbeddingProvider for OllamaEmbeddingProvider {
    type Error = Error;

    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, Self::Error>> + Send + 'static
    {
        let expected = texts.len();
        let resp_fut = self
            .client
            .post(format!("{}/api/embed", self.config.base_url))
            .timeout(self.config.timeout)
            .json(&EmbedRequest {
                model: &self.config.model,
                input: texts,
            })
            .send();

        async move {
            if expected == 0 {
                return Ok(vec![]);
            }
            let resp = resp_fut.await.map_err(|err| {
                let kind = if err.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Other
                };
                Error::new(format!("{err}"), kind)
            })?;
            let status = resp.status();
            if !status.is_success() {
                let kind = if status == StatusCode::TOO_MANY_REQUESTS {
                    ErrorKind::RateLimitExceeded
                } else {
                    ErrorKind::Other
                };
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::new(format!("HTTP {status}: {body}"), kind));
            }
            let body: EmbedResponse = resp
                .json()
                .await
                .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
            check_count(body.embeddings, expected)
        }
    }
}

fn check_count(
    embeddings: Vec<Vec<f32>>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, Error> {
    if embeddings.len() != expected {
        return Err(Error::new(
            format!(
                "expected {expected} embeddings, got {}",
                embeddings.len()
            ),
            ErrorKind::Other,
        ));
    }
    trace!("embedded {expected} texts");
    Ok(embeddings)
}
