use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tavern_core::memory::{ChatMemory, ChatStore, ChatTurn, SharedChatStore};
use tavern_core::tool::{AnyTool, RegistryError, Tool, ToolObject, ToolRegistry};
use tavern_core::{
    Agent, AgentBuilder, AgentError, AgentEvent, AgentResponse, EmbeddingClient,
    ModelClient,
};
use tavern_model::{EmbeddingProvider, ModelProvider};
use tavern_ollama_embedding::OllamaEmbeddingProvider;
use tavern_openai_model::OpenAIProvider;
use thiserror::Error;

use crate::config::{AppConfig, DEFAULT_SESSION_KEY};
use crate::prompt::{PromptError, load_system_prompt};
use crate::tools::*;

/// Errors from building or using sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session has ended.
    #[error("the session has ended")]
    Terminated,
    /// The agent failed to answer.
    #[error(transparent)]
    Agent(#[from] AgentError),
    /// The system prompt couldn't be loaded.
    #[error(transparent)]
    Prompt(#[from] PromptError),
    /// The tool set is invalid.
    #[error("invalid tool set: {0}")]
    Registry(#[from] RegistryError),
    /// The game module couldn't be read.
    #[error("failed to read the game module at {}: {source}", path.display())]
    Module {
        /// The module path.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
}

/// A session factory builder.
///
/// See [`SessionFactory`].
pub struct SessionFactoryBuilder {
    model_client: ModelClient,
    system_prompt: String,
    tools: Vec<Box<dyn ToolObject>>,
    store: SharedChatStore,
    persist_path: Option<PathBuf>,
    session_key: String,
    memory_tokens: usize,
    allowance: usize,
}

impl SessionFactoryBuilder {
    /// Creates a builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(provider: M) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            system_prompt: String::new(),
            tools: vec![],
            store: SharedChatStore::default(),
            persist_path: None,
            session_key: DEFAULT_SESSION_KEY.to_owned(),
            memory_tokens: tavern_core::memory::DEFAULT_TOKEN_LIMIT,
            allowance: 5,
        }
    }

    /// Sets the system prompt, already rendered.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Adds a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.tools.push(AnyTool::boxed(tool));
        self
    }

    /// Adds the dice, skill check, character creation and choice tools.
    pub fn with_game_tools(self, roller: DiceRoller) -> Self {
        self.with_tool(RollDiceTool::new(roller.clone()))
            .with_tool(RollSkillTool::new(roller.clone()))
            .with_tool(CreateCharacterTool::new(roller))
            .with_tool(SuggestChoicesTool::new())
    }

    /// Uses `store` as the chat store.
    ///
    /// When `persist_path` is set, sessions flush the store there when they
    /// end.
    #[inline]
    pub fn with_chat_store(
        mut self,
        store: ChatStore,
        persist_path: Option<PathBuf>,
    ) -> Self {
        self.store = Arc::new(Mutex::new(store));
        self.persist_path = persist_path;
        self
    }

    /// Sets the memory key shared by every session.
    #[inline]
    pub fn with_session_key<S: Into<String>>(mut self, key: S) -> Self {
        self.session_key = key.into();
        self
    }

    /// Sets how many tokens of history are sent to the model.
    #[inline]
    pub fn with_memory_tokens(mut self, tokens: usize) -> Self {
        self.memory_tokens = tokens;
        self
    }

    /// Sets the tool-calling rounds allowed per turn.
    #[inline]
    pub fn with_allowance(mut self, allowance: usize) -> Self {
        self.allowance = allowance;
        self
    }

    /// Validates the tools and builds the factory.
    pub fn build(self) -> Result<SessionFactory, RegistryError> {
        let tools = Arc::new(ToolRegistry::new(self.tools)?);
        info!(tools = ?tools.names().collect::<Vec<_>>(), "tools registered");
        Ok(SessionFactory {
            model_client: self.model_client,
            system_prompt: self.system_prompt,
            tools,
            store: self.store,
            persist_path: self.persist_path,
            session_key: self.session_key,
            memory_tokens: self.memory_tokens,
            allowance: self.allowance,
        })
    }
}

/// Creates sessions that share one model, tool set and chat store.
pub struct SessionFactory {
    model_client: ModelClient,
    system_prompt: String,
    tools: Arc<ToolRegistry>,
    store: SharedChatStore,
    persist_path: Option<PathBuf>,
    session_key: String,
    memory_tokens: usize,
    allowance: usize,
}

impl SessionFactory {
    /// Builds a factory from the application configuration: the OpenAI or
    /// Ollama chat model, the Ollama embedding model, the prompt file, the
    /// chat store file and the optional tools.
    pub fn from_config(config: &AppConfig) -> Result<Self, SessionError> {
        let openai_config = config.model.openai_config();
        info!(
            model = openai_config.model(),
            base_url = openai_config.base_url(),
            "using chat model"
        );
        let system_prompt =
            load_system_prompt(&config.prompt_path, config.allowance)?;
        let (store, persist_path) = if config.persist {
            let store = ChatStore::load_or_default(&config.chat_store_path);
            (store, Some(config.chat_store_path.clone()))
        } else {
            (ChatStore::default(), None)
        };

        let mut builder =
            SessionFactoryBuilder::with_model_provider(OpenAIProvider::new(openai_config))
                .with_system_prompt(system_prompt)
                .with_game_tools(DiceRoller::default())
                .with_chat_store(store, persist_path)
                .with_session_key(&config.session_key)
                .with_memory_tokens(config.memory_tokens)
                .with_allowance(config.allowance);
        if let Some(path) = &config.module_path {
            let embedding = OllamaEmbeddingProvider::new(config.embedding_config());
            builder = builder.with_module(path, embedding)?;
        }
        if let Some(api_key) = &config.tavily_api_key {
            info!("web search enabled");
            builder = builder.with_tool(SearchTool::new(api_key));
        }
        Ok(builder.build()?)
    }

    /// Starts a session with a fresh agent.
    pub fn start(&self) -> Session {
        let memory = ChatMemory::new(Arc::clone(&self.store), &self.session_key)
            .with_token_limit(self.memory_tokens);
        let agent = AgentBuilder::with_model_client(self.model_client.clone())
            .with_system_prompt(&self.system_prompt)
            .with_tools(Arc::clone(&self.tools))
            .with_memory(memory)
            .with_max_iterations(self.allowance)
            .build();
        debug!("session started");
        Session {
            agent,
            state: SessionState::Active,
            persist_path: self.persist_path.clone(),
        }
    }

    /// Returns the shared chat store.
    #[inline]
    pub fn store(&self) -> &SharedChatStore {
        &self.store
    }
}

impl SessionFactoryBuilder {
    /// Adds the game module lookup tool over the document at `path`.
    pub fn with_module<P, E>(self, path: P, embedding: E) -> Result<Self, SessionError>
    where
        P: Into<PathBuf>,
        E: EmbeddingProvider + 'static,
    {
        let path = path.into();
        let tool = ConsultModuleTool::from_file(&path, EmbeddingClient::new(embedding))
            .map_err(|source| SessionError::Module { path, source })?;
        Ok(self.with_tool(tool))
    }
}

/// The lifecycle state of a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting messages.
    Active,
    /// Ended, the store has been flushed.
    Terminated,
}

/// A chat session, like a window that displays messages and has an input
/// box.
///
/// The session holds a fully configured agent and is basically a wrapper
/// around [`Agent`] with an explicit end.
pub struct Session {
    agent: Agent,
    state: SessionState,
    persist_path: Option<PathBuf>,
}

impl Session {
    /// Sends a message and waits for the answer.
    #[inline]
    pub async fn on_message(&mut self, message: &str) -> Result<AgentResponse, SessionError> {
        self.on_message_streaming(message, |_| {}).await
    }

    /// Sends a message, reporting deltas and tool activity to `on_event`.
    pub async fn on_message_streaming<F>(
        &mut self,
        message: &str,
        on_event: F,
    ) -> Result<AgentResponse, SessionError>
    where
        F: Fn(AgentEvent) + Send + Sync + 'static,
    {
        if self.state == SessionState::Terminated {
            return Err(SessionError::Terminated);
        }
        Ok(self.agent.stream_chat(message, on_event).await?)
    }

    /// Ends the session, flushing the chat store when persistence is
    /// enabled. Ending twice does nothing.
    ///
    /// The file is written on the blocking thread pool.
    pub async fn end(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        self.state = SessionState::Terminated;
        let Some(path) = self.persist_path.clone() else {
            debug!("session ended without persistence");
            return;
        };
        let store = Arc::clone(self.agent.memory().store());
        let flushed = tokio::task::spawn_blocking(move || {
            // Held across the write: a flush never replaces a newer file
            // with an older snapshot.
            let store = store.lock().unwrap_or_else(PoisonError::into_inner);
            store.persist(&path).map(|()| path)
        })
        .await;
        match flushed {
            Ok(Ok(path)) => info!("chat store flushed to {}", path.display()),
            Ok(Err(err)) => error!("failed to flush the chat store: {err}"),
            Err(err) => error!("the chat store flush task failed: {err}"),
        }
    }

    /// Returns the lifecycle state.
    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns every turn of the conversation.
    #[inline]
    pub fn history(&self) -> Vec<ChatTurn> {
        self.agent.memory().all()
    }
}
