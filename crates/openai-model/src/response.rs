use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use serde_json::Value;
use tavern_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    OpaqueMessage, ToolCallRequest,
};

use crate::Error;
use crate::io::{Sse, SseError};
use crate::proto::{ChatCompletionChunk, Message, ToolCall};

struct PartialState {
    sse: Sse,
    id: Option<String>,
    content: String,
    reasoning_content: Option<String>,
    tool_calls: Vec<ToolCall>,
    // Tool calls are only complete once the finish reason arrives, so they
    // are emitted in order after the stream reports it.
    emitted_tool_calls: usize,
    pending_finish_reason: Option<ModelFinishReason>,
    finished: bool,
}

impl PartialState {
    fn finish(self) -> Option<(String, Message)> {
        Some((
            self.id?,
            Message::Assistant {
                content: Some(self.content),
                tool_calls: if self.tool_calls.is_empty() {
                    None
                } else {
                    Some(self.tool_calls)
                },
                reasoning_content: self.reasoning_content,
            },
        ))
    }

    fn merge_tool_call(&mut self, tool_call: ToolCall) {
        let Some(partial) = self
            .tool_calls
            .iter_mut()
            .find(|t| t.index == tool_call.index)
        else {
            self.tool_calls.push(tool_call);
            return;
        };
        if let Some(id) = tool_call.id {
            partial.id.get_or_insert_default().push_str(&id);
        }
        if let Some(ty) = tool_call.r#type {
            // The type is sent whole, never in fragments.
            partial.r#type = Some(ty);
        }
        let Some(function) = tool_call.function else {
            return;
        };
        match &mut partial.function {
            Some(partial_func) => {
                if let Some(name) = function.name {
                    partial_func.name.get_or_insert_default().push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    partial_func
                        .arguments
                        .get_or_insert_default()
                        .push_str(&arguments);
                }
            }
            None => partial.function = Some(function),
        }
    }

    fn tool_call_request(&self, idx: usize) -> ToolCallRequest {
        let tool_call = &self.tool_calls[idx];
        let function = tool_call.function.as_ref();
        let arguments = function
            .and_then(|f| f.arguments.as_deref())
            .map(|args| {
                // Some servers send an empty string for parameterless calls.
                if args.trim().is_empty() {
                    return Value::Object(Default::default());
                }
                serde_json::from_str::<Value>(args).unwrap_or_else(|err| {
                    warn!("malformed tool call arguments ({err}): {args}");
                    Value::Null
                })
            })
            .unwrap_or_else(|| Value::Object(Default::default()));
        ToolCallRequest {
            id: tool_call.id.clone().unwrap_or_default(),
            name: function.and_then(|f| f.name.clone()).unwrap_or_default(),
            arguments,
        }
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    /// A streamed chat-completion response.
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
        full_msg: Option<(String, Message)>,
    }
}

impl OpenAIResponse {
    pub(crate) fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            content: String::new(),
            reasoning_content: None,
            tool_calls: vec![],
            emitted_tool_calls: 0,
            pending_finish_reason: None,
            finished: false,
        };
        Self {
            next_event_fut: Some(Box::pin(next_event(partial_state))),
            full_msg: None,
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, partial_state)) => {
                    *this.next_event_fut = None;
                    *this.full_msg = partial_state.finish();
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        *this.next_event_fut = Some(Box::pin(next_event(partial_state)));
        Poll::Ready(Ok(Some(event)))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        self.full_msg
            .as_ref()
            .map(|(id, msg)| OpaqueMessage::new(id, msg.clone()))
    }
}

fn parse_finish_reason(reason: &str) -> ModelFinishReason {
    match reason {
        "tool_calls" | "function_call" => ModelFinishReason::ToolCalls,
        "length" => ModelFinishReason::Length,
        _ => ModelFinishReason::Stop,
    }
}

async fn next_event(mut state: PartialState) -> NextEvent {
    while !state.finished {
        let sse_event = match state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                state.finished = true;
                break;
            }
            Err(SseError::Chunks(err)) if err.timed_out => {
                return Err(Error::new("response timed out", ErrorKind::Timeout));
            }
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            state.finished = true;
            break;
        }

        let mut chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        if state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        }
        if let Some(usage) = chunk.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "token usage"
            );
        }

        let Some(choice) = chunk.choices.pop() else {
            continue;
        };

        if let Some(reasoning_content) = &choice.delta.reasoning_content {
            state
                .reasoning_content
                .get_or_insert_default()
                .push_str(reasoning_content);
        }
        for tool_call in choice.delta.tool_calls.unwrap_or_default() {
            state.merge_tool_call(tool_call);
        }
        if let Some(finish_reason) = &choice.finish_reason {
            state.pending_finish_reason = Some(parse_finish_reason(finish_reason));
        }
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            state.content.push_str(&content);
            return Ok((Some(ModelResponseEvent::MessageDelta(content)), state));
        }
        if state.pending_finish_reason.is_some() {
            break;
        }
    }

    // Deltas are always emitted first, then the collected tool calls, and
    // finally the finish reason.
    if state.emitted_tool_calls < state.tool_calls.len() {
        let request = state.tool_call_request(state.emitted_tool_calls);
        state.emitted_tool_calls += 1;
        return Ok((Some(ModelResponseEvent::ToolCall(request)), state));
    }

    if let Some(finish_reason) = state.pending_finish_reason.take() {
        state.finished = true;
        return Ok((Some(ModelResponseEvent::Completed(finish_reason)), state));
    }

    Ok((None, state))
}
