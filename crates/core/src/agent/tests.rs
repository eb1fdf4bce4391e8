use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tavern_model::{ModelMessage, ToolCallRequest};
use tavern_test_model::{PresetEvent, PresetResponse, TestModelProvider};

use crate::memory::{ChatMemory, ChatRole, ChatTurn};
use crate::tool::{AnyTool, Error as ToolError, Tool, ToolRegistry, ToolResult};
use crate::{AgentBuilder, AgentError, AgentEvent};

#[derive(Deserialize)]
struct DiceInput {
    sides: u32,
    #[serde(default)]
    delay_ms: u64,
}

/// Always rolls the highest face, after an optional delay.
struct MaxDiceTool(Value);

impl MaxDiceTool {
    fn new() -> Self {
        Self(json!({
            "type": "object",
            "properties": { "sides": { "type": "integer" } },
            "required": ["sides"]
        }))
    }
}

impl Tool for MaxDiceTool {
    type Input = DiceInput;

    fn name(&self) -> &str {
        "roll_a_dice"
    }

    fn description(&self) -> &str {
        "Rolls a die."
    }

    fn parameter_schema(&self) -> &Value {
        &self.0
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        async move {
            if input.sides < 2 {
                return Err(ToolError::invalid_input()
                    .with_reason("a die needs at least 2 sides"));
            }
            tokio::time::sleep(Duration::from_millis(input.delay_ms)).await;
            Ok(format!("d{} = {}", input.sides, input.sides))
        }
    }
}

struct ChoicesTool(Value);

impl Tool for ChoicesTool {
    type Input = Value;

    fn name(&self) -> &str {
        "suggest_choices"
    }

    fn description(&self) -> &str {
        "Offers the player some choices."
    }

    fn parameter_schema(&self) -> &Value {
        &self.0
    }

    fn return_direct(&self) -> bool {
        true
    }

    fn execute(
        &self,
        _input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        std::future::ready(Ok("1. Fight\n2. Flee".to_owned()))
    }
}

fn registry() -> Arc<ToolRegistry> {
    Arc::new(
        ToolRegistry::new(vec![
            AnyTool::boxed(MaxDiceTool::new()),
            AnyTool::boxed(ChoicesTool(json!({ "type": "object" }))),
        ])
        .unwrap(),
    )
}

fn call(id: &str, name: &str, arguments: Value) -> PresetEvent {
    PresetEvent::ToolCall(ToolCallRequest {
        id: id.to_owned(),
        name: name.to_owned(),
        arguments,
    })
}

fn tool_outputs(messages: &[ModelMessage]) -> Vec<(String, String)> {
    messages
        .iter()
        .filter_map(|m| match m {
            ModelMessage::Tool(result) => {
                Some((result.id.clone(), result.content.clone()))
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_simple_message() {
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::with_events([
        PresetEvent::MessageDelta("Hi, ".to_owned()),
        PresetEvent::MessageDelta("what can I do for you?".to_owned()),
    ]));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_system_prompt("You are the game master.")
        .build();

    let events = Arc::new(Mutex::new(vec![]));
    let resp = agent
        .stream_chat("Hello", {
            let events = Arc::clone(&events);
            move |event| events.lock().unwrap().push(event)
        })
        .await
        .unwrap();

    assert_eq!(resp.content, "Hi, what can I do for you?");
    assert_eq!(resp.tool_calls, 0);
    assert!(!resp.return_direct);
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            AgentEvent::MessageDelta("Hi, ".to_owned()),
            AgentEvent::MessageDelta("what can I do for you?".to_owned()),
        ]
    );

    let requests = model_provider.requests();
    assert_eq!(
        requests[0].messages,
        vec![
            ModelMessage::System("You are the game master.".to_owned()),
            ModelMessage::User("Hello".to_owned()),
        ]
    );
    assert_eq!(
        agent.memory().all(),
        vec![
            ChatTurn::user("Hello"),
            ChatTurn::assistant("Hi, what can I do for you?"),
        ]
    );
}

#[tokio::test]
async fn test_tool_round_trip() {
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::with_events([
        PresetEvent::MessageDelta("Rolling.".to_owned()),
        call("call_1", "roll_a_dice", json!({ "sides": 6 })),
    ]));
    model_provider.push_response(PresetResponse::text("You rolled a 6!"));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tools(registry())
        .build();
    let events = Arc::new(Mutex::new(vec![]));
    let resp = agent
        .stream_chat("roll a d6", {
            let events = Arc::clone(&events);
            move |event| events.lock().unwrap().push(event)
        })
        .await
        .unwrap();

    assert_eq!(resp.content, "You rolled a 6!");
    assert_eq!(resp.tool_calls, 1);
    assert!(events.lock().unwrap().contains(&AgentEvent::ToolResult {
        name: "roll_a_dice".to_owned(),
        output: "d6 = 6".to_owned(),
        is_error: false,
    }));

    let requests = model_provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 2);
    let second = &requests[1].messages;
    assert!(matches!(second[1], ModelMessage::Opaque(_)));
    assert_eq!(
        tool_outputs(second),
        vec![("call_1".to_owned(), "d6 = 6".to_owned())]
    );

    // Tool exchanges are scratchpad only.
    let turns = agent.memory().all();
    assert_eq!(turns.len(), 2);
    assert!(turns.iter().all(|t| t.role != ChatRole::Tool));
}

#[tokio::test]
async fn test_return_direct() {
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::tool_call(
        "call_1",
        "suggest_choices",
        json!({}),
    ));
    model_provider.push_response(PresetResponse::text("never requested"));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tools(registry())
        .build();
    let resp = agent.chat("What now?").await.unwrap();

    assert_eq!(resp.content, "1. Fight\n2. Flee");
    assert!(resp.return_direct);
    assert_eq!(model_provider.requests().len(), 1);
    assert_eq!(model_provider.remaining(), 1);
    assert_eq!(
        agent.memory().all()[1],
        ChatTurn::assistant("1. Fight\n2. Flee")
    );
}

#[tokio::test]
async fn test_iteration_bound() {
    let model_provider = TestModelProvider::default();
    for idx in 0..2 {
        model_provider.push_response(PresetResponse::tool_call(
            format!("call_{idx}"),
            "roll_a_dice",
            json!({ "sides": 20 }),
        ));
    }
    model_provider.push_response(PresetResponse::text("Enough rolling."));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tools(registry())
        .with_max_iterations(2)
        .build();
    let resp = agent.chat("Roll until you crit").await.unwrap();

    assert_eq!(resp.content, "Enough rolling.");
    assert_eq!(resp.tool_calls, 2);
    let requests = model_provider.requests();
    assert_eq!(requests.len(), 3);
    assert!(!requests[1].tools.is_empty());
    assert!(requests[2].tools.is_empty());
    assert_eq!(tool_outputs(&requests[2].messages).len(), 2);
}

#[tokio::test]
async fn test_tool_errors_reported_to_model() {
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::with_events([
        call("call_1", "cast_fireball", json!({})),
        call("call_2", "roll_a_dice", json!({ "sides": "six" })),
        call("call_3", "roll_a_dice", json!({ "sides": 1 })),
    ]));
    model_provider.push_response(PresetResponse::text("The magic fizzles."));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tools(registry())
        .build();
    let resp = agent.chat("Fireball!").await.unwrap();

    assert_eq!(resp.content, "The magic fizzles.");
    assert_eq!(resp.tool_calls, 3);

    let requests = model_provider.requests();
    let outputs = tool_outputs(&requests[1].messages);
    let ids: Vec<_> = outputs.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, ["call_1", "call_2", "call_3"]);
    assert!(outputs.iter().all(|(_, out)| out.starts_with("Error: ")));
    assert!(outputs[0].1.contains("cast_fireball"));
    assert!(outputs[2].1.contains("at least 2 sides"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_tools_keep_order() {
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::with_events([
        call("slow", "roll_a_dice", json!({ "sides": 4, "delay_ms": 300 })),
        call("fast", "roll_a_dice", json!({ "sides": 8, "delay_ms": 10 })),
    ]));
    model_provider.push_response(PresetResponse::text("Done."));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tools(registry())
        .build();
    let started = tokio::time::Instant::now();
    agent.chat("Roll both").await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(310));

    let outputs = tool_outputs(&model_provider.requests()[1].messages);
    assert_eq!(
        outputs,
        vec![
            ("slow".to_owned(), "d4 = 4".to_owned()),
            ("fast".to_owned(), "d8 = 8".to_owned()),
        ]
    );
}

#[tokio::test]
async fn test_model_error_records_nothing() {
    let model_provider = TestModelProvider::default();
    let agent = AgentBuilder::with_model_provider(model_provider).build();
    let err = agent.chat("Hello?").await.unwrap_err();
    assert!(matches!(err, AgentError::Model(_)));
    assert!(agent.memory().all().is_empty());
}

#[tokio::test]
async fn test_history_in_request() {
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::text("The tavern is warm."));
    model_provider.push_response(PresetResponse::text("Bartholomew, of course."));

    let memory = ChatMemory::in_memory("chat_history");
    memory.put(ChatTurn::assistant("orphaned answer"));
    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_memory(memory)
        .build();
    agent.chat("Where am I?").await.unwrap();
    agent.chat("Who runs it?").await.unwrap();

    let requests = model_provider.requests();
    // The window never starts with an assistant turn.
    assert_eq!(
        requests[0].messages,
        vec![ModelMessage::User("Where am I?".to_owned())]
    );
    assert_eq!(
        requests[1].messages,
        vec![
            ModelMessage::User("Where am I?".to_owned()),
            ModelMessage::Assistant("The tavern is warm.".to_owned()),
            ModelMessage::User("Who runs it?".to_owned()),
        ]
    );
    assert_eq!(agent.memory().all().len(), 5);
}
