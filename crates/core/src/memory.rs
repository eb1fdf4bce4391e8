//! Chat history storage and the token-bounded memory buffer.
//!
//! A [`ChatStore`] maps session keys to ordered [`ChatTurn`]s and is
//! persisted as one JSON document. [`ChatMemory`] is the agent's view of a
//! single key in a shared store.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

/// The default number of tokens [`ChatMemory::get`] returns.
pub const DEFAULT_TOKEN_LIMIT: usize = 3000;

const CHARS_PER_TOKEN: usize = 4;

/// The author of a chat turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instructions.
    System,
    /// The player.
    User,
    /// The game master.
    Assistant,
    /// A tool output.
    Tool,
}

/// One message in the chat history.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Who wrote the message.
    pub role: ChatRole,
    /// The message text.
    pub content: String,
}

impl ChatTurn {
    /// Creates a user turn.
    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Creates an assistant turn.
    #[inline]
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    fn estimated_tokens(&self) -> usize {
        self.content.chars().count().div_ceil(CHARS_PER_TOKEN).max(1)
    }
}

/// Errors from reading or writing a chat store file.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The file couldn't be read or written.
    #[error("chat store I/O failed: {0}")]
    Io(#[from] io::Error),
    /// The file isn't a valid chat store document.
    #[error("malformed chat store: {0}")]
    Format(#[from] serde_json::Error),
}

/// Chat histories for any number of session keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatStore {
    #[serde(default)]
    store: BTreeMap<String, Vec<ChatTurn>>,
}

impl ChatStore {
    /// Loads a store from `path`. A missing file is an empty store.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let data = match fs::read(path.as_ref()) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// Like [`ChatStore::load`], but falls back to an empty store when the
    /// file can't be used.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(store) => store,
            Err(err) => {
                warn!("starting with an empty chat store ({}): {err}", path.display());
                Self::default()
            }
        }
    }

    /// Writes the whole store to `path`.
    ///
    /// The data goes to a temporary file in the same directory first, which
    /// then replaces `path`, so readers never see a partial document.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let path = path.as_ref();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let data = serde_json::to_vec_pretty(self)?;
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&data)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|err| err.error)?;
        debug!("persisted chat store to {}", path.display());
        Ok(())
    }

    /// Returns the turns stored under `key`, oldest first.
    #[inline]
    pub fn messages(&self, key: &str) -> &[ChatTurn] {
        self.store.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Appends a turn under `key`.
    #[inline]
    pub fn add_message(&mut self, key: &str, turn: ChatTurn) {
        self.store.entry(key.to_owned()).or_default().push(turn);
    }

    /// Returns all session keys, sorted.
    #[inline]
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.store.keys().map(String::as_str)
    }
}

/// A chat store shared between sessions.
pub type SharedChatStore = Arc<Mutex<ChatStore>>;

/// The memory buffer of one session key.
#[derive(Clone, Debug)]
pub struct ChatMemory {
    store: SharedChatStore,
    key: String,
    token_limit: usize,
}

impl ChatMemory {
    /// Creates a memory buffer over `key` in `store`.
    #[inline]
    pub fn new<S: Into<String>>(store: SharedChatStore, key: S) -> Self {
        Self {
            store,
            key: key.into(),
            token_limit: DEFAULT_TOKEN_LIMIT,
        }
    }

    /// Creates a memory buffer backed by a fresh, empty store.
    #[inline]
    pub fn in_memory<S: Into<String>>(key: S) -> Self {
        Self::new(Arc::default(), key)
    }

    /// Sets how many (estimated) tokens [`ChatMemory::get`] may return.
    #[inline]
    pub fn with_token_limit(mut self, token_limit: usize) -> Self {
        self.token_limit = token_limit;
        self
    }

    /// Returns the session key.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the backing store.
    #[inline]
    pub fn store(&self) -> &SharedChatStore {
        &self.store
    }

    /// Returns the most recent turns that fit the token limit.
    ///
    /// The window never starts with a non-user turn, so the model always
    /// sees a complete exchange first.
    pub fn get(&self) -> Vec<ChatTurn> {
        let store = self.lock();
        let turns = store.messages(&self.key);

        let mut budget = self.token_limit;
        let mut start = turns.len();
        for (idx, turn) in turns.iter().enumerate().rev() {
            let tokens = turn.estimated_tokens();
            if tokens > budget {
                break;
            }
            budget -= tokens;
            start = idx;
        }
        while start < turns.len() && turns[start].role != ChatRole::User {
            start += 1;
        }
        turns[start..].to_vec()
    }

    /// Returns every turn of this key.
    #[inline]
    pub fn all(&self) -> Vec<ChatTurn> {
        self.lock().messages(&self.key).to_vec()
    }

    /// Appends a turn.
    #[inline]
    pub fn put(&self, turn: ChatTurn) {
        self.lock().add_message(&self.key, turn);
    }

    /// Appends a user turn and the answer to it as one exchange, so that
    /// exchanges from concurrent sessions never interleave.
    pub fn put_exchange(&self, user: ChatTurn, assistant: ChatTurn) {
        let mut store = self.lock();
        store.add_message(&self.key, user);
        store.add_message(&self.key, assistant);
    }

    fn lock(&self) -> MutexGuard<'_, ChatStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
