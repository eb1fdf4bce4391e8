use std::sync::Arc;

use tavern_model::ModelProvider;

use super::Agent;
use crate::memory::ChatMemory;
use crate::model_client::ModelClient;
use crate::tool::ToolRegistry;

/// The default number of tool-calling rounds in one turn.
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// [`Agent`] builder.
pub struct AgentBuilder {
    model_client: ModelClient,
    system_prompt: String,
    tools: Arc<ToolRegistry>,
    memory: Option<ChatMemory>,
    max_iterations: usize,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self::with_model_client(ModelClient::new(provider))
    }

    /// Creates a new builder with an existing model client.
    #[inline]
    pub fn with_model_client(model_client: ModelClient) -> Self {
        Self {
            model_client,
            system_prompt: String::new(),
            tools: Arc::default(),
            memory: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Sets the system prompt.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets the tools.
    #[inline]
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    /// Sets the memory buffer. Defaults to an in-memory buffer.
    #[inline]
    pub fn with_memory(mut self, memory: ChatMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Sets how many tool-calling rounds a turn may use before the model
    /// is asked for an answer without tools.
    #[inline]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Builds the agent.
    pub fn build(self) -> Agent {
        let memory = self
            .memory
            .unwrap_or_else(|| ChatMemory::in_memory("chat_history"));
        debug!(
            tools = self.tools.len(),
            max_iterations = self.max_iterations,
            "agent built"
        );
        Agent {
            model_client: self.model_client,
            system_prompt: self.system_prompt,
            tools: self.tools,
            memory,
            max_iterations: self.max_iterations,
        }
    }
}
