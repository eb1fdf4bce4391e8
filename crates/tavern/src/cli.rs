use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tavern::config::{AppConfig, ModelConfig};
use tavern::web::Credentials;

/// A tabletop game-master agent.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(flatten)]
    pub options: Options,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Play in the terminal.
    Repl,
    /// Serve the web chat.
    Web {
        /// Address to listen on.
        #[arg(long, env = "TAVERN_ADDR", default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
        /// Username required by the web chat.
        #[arg(long, env = "TAVERN_WEB_USER", requires = "password")]
        username: Option<String>,
        /// Password required by the web chat.
        #[arg(long, env = "TAVERN_WEB_PASSWORD", requires = "username")]
        password: Option<String>,
    },
}

impl Command {
    pub fn credentials(&self) -> Option<Credentials> {
        match self {
            Command::Web {
                username: Some(username),
                password: Some(password),
                ..
            } => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Args)]
pub struct Options {
    /// OpenAI API key. Without one, a local Ollama server is used.
    #[arg(long, env = "OPENAI_API_KEY", global = true, hide_env_values = true)]
    pub openai_api_key: Option<String>,
    /// Chat model name.
    #[arg(long, env = "TAVERN_MODEL", global = true)]
    pub model: Option<String>,
    /// Base URL of the chat-completion API.
    #[arg(long, env = "OPENAI_BASE_URL", global = true)]
    pub base_url: Option<String>,
    /// Sampling temperature.
    #[arg(long, env = "TAVERN_TEMPERATURE", global = true, default_value_t = 0.1)]
    pub temperature: f32,
    /// Sampling seed.
    #[arg(long, env = "TAVERN_SEED", global = true)]
    pub seed: Option<u64>,
    /// Stop sequence, can be repeated.
    #[arg(long, global = true)]
    pub stop: Vec<String>,
    /// Model request timeout in seconds.
    #[arg(long, env = "TAVERN_TIMEOUT_SECS", global = true, default_value_t = 120)]
    pub timeout_secs: u64,
    /// Embedding model name.
    #[arg(long, env = "TAVERN_EMBED_MODEL", global = true, default_value = "nomic-embed-text")]
    pub embed_model: String,
    /// Ollama server URL, used for embeddings.
    #[arg(long, env = "OLLAMA_BASE_URL", global = true, default_value = "http://localhost:11434")]
    pub ollama_url: String,
    /// System prompt template.
    #[arg(long, env = "TAVERN_PROMPT", global = true, default_value = "prompts/system_prompt.md")]
    pub prompt: PathBuf,
    /// Tool-calling rounds allowed per turn.
    #[arg(long, env = "TAVERN_ALLOWANCE", global = true, default_value_t = 5)]
    pub allowance: usize,
    /// Chat store file.
    #[arg(long, env = "TAVERN_CHAT_STORE", global = true, default_value = "chat_store.json")]
    pub chat_store: PathBuf,
    /// Keep the conversation in memory only.
    #[arg(long, global = true)]
    pub ephemeral: bool,
    /// Memory key of the conversation.
    #[arg(long, env = "TAVERN_SESSION_KEY", global = true, default_value = "chat_history")]
    pub session_key: String,
    /// Tokens of history sent with every request.
    #[arg(long, env = "TAVERN_MEMORY_TOKENS", global = true, default_value_t = 3000)]
    pub memory_tokens: usize,
    /// A game module document the agent can consult.
    #[arg(long, env = "TAVERN_MODULE", global = true)]
    pub module: Option<PathBuf>,
    /// Tavily API key, enables web search.
    #[arg(long, env = "TAVILY_API_KEY", global = true, hide_env_values = true)]
    pub tavily_api_key: Option<String>,
}

impl From<Options> for AppConfig {
    fn from(options: Options) -> Self {
        AppConfig {
            model: ModelConfig {
                api_key: options.openai_api_key,
                model: options.model,
                base_url: options.base_url,
                temperature: options.temperature,
                seed: options.seed,
                stop: options.stop,
                timeout: Duration::from_secs(options.timeout_secs),
            },
            embed_model: options.embed_model,
            ollama_url: options.ollama_url,
            prompt_path: options.prompt,
            allowance: options.allowance,
            chat_store_path: options.chat_store,
            persist: !options.ephemeral,
            session_key: options.session_key,
            memory_tokens: options.memory_tokens,
            module_path: options.module,
            tavily_api_key: options.tavily_api_key,
        }
    }
}
