mod builder;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tavern_model::{
    ErrorKind, ModelMessage, ModelProviderError, ModelRequest, ToolCallResult,
};
use thiserror::Error;
use tracing::Instrument;

use crate::memory::{ChatMemory, ChatRole, ChatTurn};
use crate::model_client::ModelClient;
use crate::tool::ToolRegistry;
pub use builder::AgentBuilder;

/// Something that happened while the agent was working on a turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentEvent {
    /// A piece of text generated by the model.
    MessageDelta(String),
    /// The model asked for a tool.
    ToolCall {
        /// Name of the tool.
        name: String,
        /// Raw arguments, `null` if the model sent malformed JSON.
        arguments: Value,
    },
    /// A tool finished.
    ToolResult {
        /// Name of the tool.
        name: String,
        /// The output, or the error text sent back to the model.
        output: String,
        /// Whether the tool failed.
        is_error: bool,
    },
}

/// The outcome of one agent turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentResponse {
    /// The final answer.
    pub content: String,
    /// How many tool calls were made during the turn.
    pub tool_calls: usize,
    /// Whether the answer is the verbatim output of a return-direct tool.
    pub return_direct: bool,
}

/// Errors that abort an agent turn.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model request failed. Nothing was recorded to memory.
    #[error("model request failed: {0}")]
    Model(Box<dyn ModelProviderError>),
}

impl AgentError {
    /// Returns the kind of the underlying model error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Model(err) => err.kind(),
        }
    }
}

type EventHandler = Arc<dyn Fn(AgentEvent) + Send + Sync>;

/// A game-master agent: a model, a fixed tool set and a memory buffer.
///
/// Each call to [`Agent::chat`] runs one bounded tool-calling loop. Tool
/// exchanges only live for the duration of the turn, while the user
/// message and the final answer are appended to memory.
pub struct Agent {
    model_client: ModelClient,
    system_prompt: String,
    tools: Arc<ToolRegistry>,
    memory: ChatMemory,
    max_iterations: usize,
}

impl Agent {
    /// Runs one turn and returns the final answer.
    #[inline]
    pub async fn chat(&self, input: &str) -> Result<AgentResponse, AgentError> {
        self.stream_chat(input, |_| {}).await
    }

    /// Runs one turn, reporting progress to `on_event` as it happens.
    ///
    /// # Cancel safety
    ///
    /// Dropping the future before it resolves leaves the memory untouched.
    pub async fn stream_chat<F>(
        &self,
        input: &str,
        on_event: F,
    ) -> Result<AgentResponse, AgentError>
    where
        F: Fn(AgentEvent) + Send + Sync + 'static,
    {
        let span = info_span!("agent turn", memory = self.memory.key());
        self.run_turn(input, Arc::new(on_event))
            .instrument(span)
            .await
    }

    /// Returns the memory buffer of this agent.
    #[inline]
    pub fn memory(&self) -> &ChatMemory {
        &self.memory
    }

    /// Returns the tools of this agent.
    #[inline]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    async fn run_turn(
        &self,
        input: &str,
        on_event: EventHandler,
    ) -> Result<AgentResponse, AgentError> {
        let history = self.memory.get();
        let mut scratchpad = vec![];
        let mut rounds = 0;
        let mut tool_calls = 0;

        let (content, return_direct) = loop {
            let offer_tools = rounds < self.max_iterations;
            if !offer_tools {
                debug!("allowance used up, asking for a final answer");
            }
            let req = self.build_request(&history, input, &scratchpad, offer_tools);
            let resp = self
                .model_client
                .send_request(req, {
                    let on_event = Arc::clone(&on_event);
                    move |delta| on_event(AgentEvent::MessageDelta(delta))
                })
                .await
                .map_err(AgentError::Model)?;

            if resp.tool_calls.is_empty() {
                break (resp.transcript, false);
            }
            if !offer_tools {
                warn!("ignoring tool calls in the final answer");
                break (resp.transcript, false);
            }
            rounds += 1;

            scratchpad.push(match resp.opaque_msg {
                Some(msg) => ModelMessage::Opaque(msg),
                None => ModelMessage::Assistant(resp.transcript),
            });
            for call in &resp.tool_calls {
                on_event(AgentEvent::ToolCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });
            }

            let results =
                join_all(resp.tool_calls.iter().map(|c| self.tools.execute(c)))
                    .await;
            let mut direct_output = None;
            for (call, result) in resp.tool_calls.into_iter().zip(results) {
                tool_calls += 1;
                let (output, is_error) = match result {
                    Ok(output) => (output, false),
                    Err(err) => {
                        debug!("tool `{}` failed: {err}", call.name);
                        (format!("Error: {}", err.reason()), true)
                    }
                };
                if !is_error
                    && direct_output.is_none()
                    && self.tools.is_return_direct(&call.name)
                {
                    direct_output = Some(output.clone());
                }
                on_event(AgentEvent::ToolResult {
                    name: call.name,
                    output: output.clone(),
                    is_error,
                });
                scratchpad.push(ModelMessage::Tool(ToolCallResult {
                    id: call.id,
                    content: output,
                }));
            }

            if let Some(output) = direct_output {
                on_event(AgentEvent::MessageDelta(output.clone()));
                break (output, true);
            }
        };

        self.memory
            .put_exchange(ChatTurn::user(input), ChatTurn::assistant(content.clone()));
        info!(tool_calls, return_direct, "turn finished");

        Ok(AgentResponse {
            content,
            tool_calls,
            return_direct,
        })
    }

    fn build_request(
        &self,
        history: &[ChatTurn],
        input: &str,
        scratchpad: &[ModelMessage],
        offer_tools: bool,
    ) -> ModelRequest {
        let mut messages =
            Vec::with_capacity(history.len() + scratchpad.len() + 2);
        if !self.system_prompt.is_empty() {
            messages.push(ModelMessage::System(self.system_prompt.clone()));
        }
        messages.extend(history.iter().filter_map(|turn| {
            let content = turn.content.clone();
            match turn.role {
                ChatRole::System => Some(ModelMessage::System(content)),
                ChatRole::User => Some(ModelMessage::User(content)),
                ChatRole::Assistant => Some(ModelMessage::Assistant(content)),
                // A tool output can't be replayed without its call.
                ChatRole::Tool => None,
            }
        }));
        messages.push(ModelMessage::User(input.to_owned()));
        messages.extend_from_slice(scratchpad);

        ModelRequest {
            messages,
            tools: if offer_tools {
                self.tools.definitions()
            } else {
                vec![]
            },
        }
    }
}
