//! Core logic including the agent loop, tool execution and chat memory.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
mod embedding_client;
pub mod memory;
mod model_client;
pub mod tool;

pub use agent::{Agent, AgentBuilder, AgentError, AgentEvent, AgentResponse};
pub use embedding_client::EmbeddingClient;
pub use model_client::{ModelClient, ModelClientResponse};
