//! Provider-neutral types for talking to language and embedding models.
//!
//! The agent only ever sees the traits and plain data types defined here,
//! so a hosted OpenAI model, a local Ollama server and the scripted test
//! model are interchangeable without touching the agent loop.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod embedding;
mod error;
mod opaque;
mod provider;
mod request;
mod response;

pub use embedding::*;
pub use error::*;
pub use opaque::*;
pub use provider::*;
pub use request::*;
pub use response::*;
