use std::fmt::{self, Debug};
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const OLLAMA_DEFAULT_MODEL: &str = "llama3.1";
const OLLAMA_API_KEY: &str = "ollama";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Builder for [`OpenAIConfig`].
#[derive(Clone, PartialEq)]
pub struct OpenAIConfigBuilder {
    api_key: String,
    model: Option<String>,
    base_url: Option<String>,
    default_model: &'static str,
    default_base_url: &'static str,
    temperature: Option<f32>,
    seed: Option<u64>,
    stop: Vec<String>,
    timeout: Option<Duration>,
}

impl OpenAIConfigBuilder {
    /// Creates a builder for the hosted OpenAI API with the given key.
    #[inline]
    pub fn with_api_key<S: Into<String>>(api_key: S) -> Self {
        Self::new(api_key.into(), OPENAI_DEFAULT_MODEL, OPENAI_BASE_URL)
    }

    /// Creates a builder for the OpenAI-compatible endpoint of a local
    /// Ollama server.
    #[inline]
    pub fn ollama() -> Self {
        Self::new(
            OLLAMA_API_KEY.to_owned(),
            OLLAMA_DEFAULT_MODEL,
            OLLAMA_BASE_URL,
        )
    }

    fn new(
        api_key: String,
        default_model: &'static str,
        default_base_url: &'static str,
    ) -> Self {
        Self {
            api_key,
            model: None,
            base_url: None,
            default_model,
            default_base_url,
            temperature: None,
            seed: None,
            stop: vec![],
            timeout: None,
        }
    }

    /// Sets the model to use.
    #[inline]
    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets a custom base URL.
    #[inline]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the sampling temperature.
    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the sampling seed.
    #[inline]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Adds a stop sequence.
    #[inline]
    pub fn with_stop<S: Into<String>>(mut self, stop: S) -> Self {
        self.stop.push(stop.into());
        self
    }

    /// Sets the timeout of a whole request, streaming included.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> OpenAIConfig {
        let base_url = self
            .base_url
            .unwrap_or_else(|| self.default_base_url.to_owned());
        OpenAIConfig {
            api_key: self.api_key,
            model: self
                .model
                .unwrap_or_else(|| self.default_model.to_owned()),
            base_url: base_url.trim_end_matches('/').to_owned(),
            temperature: self.temperature,
            seed: self.seed,
            stop: self.stop,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
        }
    }
}

impl Debug for OpenAIConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAIConfigBuilder")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Configuration for the OpenAI-compatible provider.
#[derive(Clone, PartialEq)]
pub struct OpenAIConfig {
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) base_url: String,
    pub(crate) temperature: Option<f32>,
    pub(crate) seed: Option<u64>,
    pub(crate) stop: Vec<String>,
    pub(crate) timeout: Duration,
}

impl OpenAIConfig {
    /// Returns the model name.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the base URL, without a trailing slash.
    #[inline]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Debug for OpenAIConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAIConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("seed", &self.seed)
            .field("stop", &self.stop)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let openai = OpenAIConfigBuilder::with_api_key("sk-test").build();
        assert_eq!(openai.model(), "gpt-4o-mini");
        assert_eq!(openai.base_url(), "https://api.openai.com/v1");
        assert_eq!(openai.timeout, DEFAULT_TIMEOUT);

        let ollama = OpenAIConfigBuilder::ollama().build();
        assert_eq!(ollama.model(), "llama3.1");
        assert_eq!(ollama.base_url(), "http://localhost:11434/v1");
        assert_eq!(ollama.api_key, "ollama");
    }

    #[test]
    fn test_overrides_and_redaction() {
        let config = OpenAIConfigBuilder::with_api_key("sk-secret")
            .with_model("custom")
            .with_base_url("http://10.0.0.2:11434/v1/")
            .with_temperature(0.3)
            .with_seed(7)
            .with_stop("Observation:")
            .build();
        assert_eq!(config.model(), "custom");
        assert_eq!(config.base_url(), "http://10.0.0.2:11434/v1");
        assert_eq!(config.stop, vec!["Observation:".to_owned()]);
        assert!(!format!("{config:?}").contains("sk-secret"));
    }
}
