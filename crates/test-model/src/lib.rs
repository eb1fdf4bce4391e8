//! Local fake models for tests.
//!
//! [`TestModelProvider`] replays a script of [`PresetResponse`]s in order
//! and records every request it receives, so tests can assert both on what
//! the agent produced and on what it sent. [`TestEmbeddingProvider`] is a
//! deterministic bag-of-words embedder.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tavern_model::{
    EmbeddingProvider, ErrorKind, ModelFinishReason, ModelMessage,
    ModelProvider, ModelProviderError, ModelRequest, ModelResponse,
    ModelResponseEvent, OpaqueMessage,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

const EMBEDDING_DIMENSIONS: usize = 256;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: VecDeque<ModelResponseEvent>,
    opaque_id: String,
    transcript: String,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.events.is_empty() {
            return Poll::Ready(Ok(None));
        }

        let timer = this
            .sleep
            .get_or_insert_with(|| Box::pin(sleep(this.delay)));
        ready!(timer.as_mut().poll(cx));
        this.sleep = None;

        Poll::Ready(Ok(this.events.pop_front()))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        Some(OpaqueMessage::new(
            self.opaque_id.clone(),
            self.transcript.clone(),
        ))
    }
}

#[derive(Default)]
struct Script {
    responses: VecDeque<PresetResponse>,
    failed_attempts: u64,
    requests: Vec<ModelRequest>,
}

/// A scripted fake model.
///
/// Each request consumes the next scripted response. When the script is
/// exhausted, requests fail with [`ErrorKind::Other`]. Clones share the
/// same script and request log.
///
/// # Note
///
/// Every request is cloned into the log. This type is only meant for
/// tests.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Arc<Mutex<Script>>,
    delay: Duration,
}

impl TestModelProvider {
    /// Appends a response to the script.
    #[inline]
    pub fn push_response(&self, preset: PresetResponse) {
        self.lock().responses.push_back(preset);
    }

    /// Delays every event by `duration`. Defaults to no delay.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = duration;
    }

    /// Returns all requests received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    /// Returns how many scripted responses have not been consumed yet.
    pub fn remaining(&self) -> usize {
        self.lock().responses.len()
    }

    /// Counts the tool results sent in the latest request.
    pub fn tool_results_in_last_request(&self) -> usize {
        self.lock()
            .requests
            .last()
            .map(|req| {
                req.messages
                    .iter()
                    .filter(|m| matches!(m, ModelMessage::Tool(_)))
                    .count()
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_response(
        &self,
        req: &ModelRequest,
    ) -> Result<TestModelResponse, Error> {
        let mut script = self.lock();
        script.requests.push(req.clone());
        let request_idx = script.requests.len();

        let Some(preset) = script.responses.front() else {
            return Err(Error {
                message: "the script has no more responses",
                kind: ErrorKind::Other,
            });
        };
        if let Some(failures) = preset.failures {
            if failures == 0 || script.failed_attempts < failures {
                script.failed_attempts += 1;
                return Err(Error {
                    message: "scripted failure",
                    kind: ErrorKind::RateLimitExceeded,
                });
            }
        }
        script.failed_attempts = 0;
        let Some(preset) = script.responses.pop_front() else {
            unreachable!("front was checked above");
        };

        let has_tool_call = preset.has_tool_call();
        let mut transcript = String::new();
        let mut events: VecDeque<_> = preset
            .events
            .into_iter()
            .map(|event| match event {
                PresetEvent::MessageDelta(delta) => {
                    transcript.push_str(&delta);
                    ModelResponseEvent::MessageDelta(delta)
                }
                PresetEvent::ToolCall(req) => ModelResponseEvent::ToolCall(req),
            })
            .collect();
        events.push_back(ModelResponseEvent::Completed(if has_tool_call {
            ModelFinishReason::ToolCalls
        } else {
            ModelFinishReason::Stop
        }));

        Ok(TestModelResponse {
            events,
            opaque_id: format!("test:{request_idx}"),
            transcript,
            delay: self.delay,
            sleep: None,
        })
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        std::future::ready(self.next_response(req))
    }
}

/// A deterministic embedder that hashes lowercase words into buckets.
///
/// Texts sharing words get similar vectors, which is enough to test
/// retrieval ranking without a real model.
#[derive(Clone, Copy, Debug, Default)]
pub struct TestEmbeddingProvider;

impl TestEmbeddingProvider {
    /// Embeds one text.
    pub fn embed_one(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; EMBEDDING_DIMENSIONS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let word = word.to_lowercase();
            // FNV-1a, so buckets are stable across runs and platforms.
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in word.bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x100000001b3);
            }
            vector[(hash % EMBEDDING_DIMENSIONS as u64) as usize] += 1.0;
        }
        vector
    }
}

impl EmbeddingProvider for TestEmbeddingProvider {
    type Error = crate::Error;

    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, Self::Error>> + Send + 'static
    {
        std::future::ready(Ok(texts.iter().map(|t| Self::embed_one(t)).collect()))
    }
}

impl Debug for TestModelProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestModelProvider")
            .field("remaining", &self.remaining())
            .field("delay", &self.delay)
            .finish()
    }
}
