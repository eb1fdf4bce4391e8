//! System prompt assembly.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// The placeholder replaced by the tool-calling allowance.
pub const ALLOWANCE_PLACEHOLDER: &str = "{allowance}";

/// Errors from loading the system prompt.
#[derive(Debug, Error)]
pub enum PromptError {
    /// The template couldn't be read.
    #[error("failed to read the system prompt at {}: {source}", path.display())]
    Read {
        /// The template path.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
}

/// Substitutes every `{allowance}` in `template`.
pub fn render_system_prompt(template: &str, allowance: usize) -> String {
    if !template.contains(ALLOWANCE_PLACEHOLDER) {
        warn!("the system prompt has no {ALLOWANCE_PLACEHOLDER} placeholder");
    }
    template.replace(ALLOWANCE_PLACEHOLDER, &allowance.to_string())
}

/// Reads the template at `path` and renders it.
pub fn load_system_prompt<P: AsRef<Path>>(
    path: P,
    allowance: usize,
) -> Result<String, PromptError> {
    let path = path.as_ref();
    let template =
        std::fs::read_to_string(path).map_err(|source| PromptError::Read {
            path: path.to_owned(),
            source,
        })?;
    Ok(render_system_prompt(&template, allowance))
}
