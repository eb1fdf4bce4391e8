//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use tavern_ollama_embedding::OllamaEmbeddingConfig;
use tavern_openai_model::{OpenAIConfig, OpenAIConfigBuilder};

/// The default session key shared by both front-ends.
pub const DEFAULT_SESSION_KEY: &str = "chat_history";

/// Chat model settings.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    /// OpenAI API key. Without one, a local Ollama server is used.
    pub api_key: Option<String>,
    /// Overrides the default model name.
    pub model: Option<String>,
    /// Overrides the default base URL.
    pub base_url: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Sampling seed.
    pub seed: Option<u64>,
    /// Stop sequences.
    pub stop: Vec<String>,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: None,
            base_url: None,
            temperature: 0.1,
            seed: None,
            stop: vec![],
            timeout: Duration::from_secs(120),
        }
    }
}

impl ModelConfig {
    /// Builds the provider configuration, picking OpenAI when an API key is
    /// present and Ollama otherwise.
    pub fn openai_config(&self) -> OpenAIConfig {
        let mut builder = match &self.api_key {
            Some(api_key) => OpenAIConfigBuilder::with_api_key(api_key),
            None => OpenAIConfigBuilder::ollama(),
        };
        if let Some(model) = &self.model {
            builder = builder.with_model(model);
        }
        if let Some(base_url) = &self.base_url {
            builder = builder.with_base_url(base_url);
        }
        if let Some(seed) = self.seed {
            builder = builder.with_seed(seed);
        }
        for stop in &self.stop {
            builder = builder.with_stop(stop);
        }
        builder
            .with_temperature(self.temperature)
            .with_timeout(self.timeout)
            .build()
    }
}

/// Everything needed to build a session factory.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Chat model settings.
    pub model: ModelConfig,
    /// Embedding model name.
    pub embed_model: String,
    /// Ollama server URL for embeddings.
    pub ollama_url: String,
    /// Path to the system prompt template.
    pub prompt_path: PathBuf,
    /// Tool-calling rounds allowed per turn.
    pub allowance: usize,
    /// Path to the chat store file.
    pub chat_store_path: PathBuf,
    /// Whether the chat store is loaded from and flushed to disk.
    pub persist: bool,
    /// The memory key of the conversation.
    pub session_key: String,
    /// Tokens of history sent with every request.
    pub memory_tokens: usize,
    /// A game module document the agent can consult.
    pub module_path: Option<PathBuf>,
    /// Enables web search.
    pub tavily_api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            embed_model: "nomic-embed-text".to_owned(),
            ollama_url: "http://localhost:11434".to_owned(),
            prompt_path: PathBuf::from("prompts/system_prompt.md"),
            allowance: 5,
            chat_store_path: PathBuf::from("chat_store.json"),
            persist: true,
            session_key: DEFAULT_SESSION_KEY.to_owned(),
            memory_tokens: 3000,
            module_path: None,
            tavily_api_key: None,
        }
    }
}

impl AppConfig {
    /// Builds the embedding provider configuration.
    pub fn embedding_config(&self) -> OllamaEmbeddingConfig {
        OllamaEmbeddingConfig::default()
            .with_model(&self.embed_model)
            .with_base_url(&self.ollama_url)
            .with_timeout(self.model.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_selection() {
        let mut config = ModelConfig::default();
        let ollama = config.openai_config();
        assert_eq!(ollama.model(), "llama3.1");
        assert_eq!(ollama.base_url(), "http://localhost:11434/v1");

        config.api_key = Some("sk-test".to_owned());
        let openai = config.openai_config();
        assert_eq!(openai.model(), "gpt-4o-mini");
        assert_eq!(openai.base_url(), "https://api.openai.com/v1");

        config.model = Some("gpt-4o".to_owned());
        config.base_url = Some("http://proxy.local/v1/".to_owned());
        let custom = config.openai_config();
        assert_eq!(custom.model(), "gpt-4o");
        assert_eq!(custom.base_url(), "http://proxy.local/v1");
    }

    #[test]
    fn test_embedding_config() {
        let config = AppConfig::default();
        assert_eq!(config.embedding_config().model(), "nomic-embed-text");
    }
}
