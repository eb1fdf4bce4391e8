//! A tabletop game-master agent.
//!
//! The crate ships a CLI with a terminal front-end and a web front-end. It
//! can also be used as a library: build a [`SessionFactory`], start
//! sessions and feed them player messages.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod config;
pub mod prompt;
pub mod repl;
mod session;
pub mod tools;
pub mod web;

pub use session::*;

/// Re-exports of [`tavern_core`] crate.
pub mod core {
    pub use tavern_core::*;
}
