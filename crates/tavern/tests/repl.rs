use std::future::pending;

use serde_json::json;
use tavern::SessionFactoryBuilder;
use tavern::config::DEFAULT_SESSION_KEY;
use tavern::core::memory::{ChatRole, ChatStore};
use tavern::repl::run_repl;
use tavern::tools::DiceRoller;
use tavern_test_model::{PresetResponse, TestModelProvider};
use tempfile::tempdir;

#[tokio::test]
async fn test_roll_a_d6() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("chat_store.json");
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::tool_call(
        "call_1",
        "roll_a_dice",
        json!({ "sides": 6 }),
    ));
    model_provider.push_response(PresetResponse::text("The die shows your fate."));

    let factory = SessionFactoryBuilder::with_model_provider(model_provider.clone())
        .with_game_tools(DiceRoller::seeded(7))
        .with_chat_store(ChatStore::default(), Some(path.clone()))
        .build()
        .unwrap();

    let mut output = Vec::new();
    run_repl(factory.start(), &b"roll a d6\n"[..], &mut output, pending())
        .await
        .unwrap();
    let output = String::from_utf8(output).unwrap();

    assert_eq!(model_provider.requests().len(), 2);
    assert_eq!(model_provider.tool_results_in_last_request(), 1);
    assert_eq!(model_provider.remaining(), 0);
    assert!(output.contains("roll_a_dice"), "{output}");
    assert!(output.contains("Rolled 1d6: ["), "{output}");
    assert!(output.contains("The die shows your fate."), "{output}");

    let stored = ChatStore::load(&path).unwrap();
    let turns = stored.messages(DEFAULT_SESSION_KEY);
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, ChatRole::User);
    assert_eq!(turns[0].content, "roll a d6");
    assert_eq!(turns[1].role, ChatRole::Assistant);
    assert_eq!(turns[1].content, "The die shows your fate.");
}

#[tokio::test]
async fn test_exit_command() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("chat_store.json");
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::text("Hail, traveler."));
    model_provider.push_response(PresetResponse::text("Never reached."));

    let factory = SessionFactoryBuilder::with_model_provider(model_provider.clone())
        .with_chat_store(ChatStore::default(), Some(path.clone()))
        .build()
        .unwrap();

    let mut output = Vec::new();
    let input = &b"hello\n\n/exit\nare you there?\n"[..];
    run_repl(factory.start(), input, &mut output, pending())
        .await
        .unwrap();

    assert_eq!(model_provider.requests().len(), 1);
    assert_eq!(model_provider.remaining(), 1);
    let stored = ChatStore::load(&path).unwrap();
    assert_eq!(stored.messages(DEFAULT_SESSION_KEY).len(), 2);
}

#[tokio::test]
async fn test_shutdown_flushes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("chat_store.json");
    let factory = SessionFactoryBuilder::with_model_provider(TestModelProvider::default())
        .with_chat_store(ChatStore::default(), Some(path.clone()))
        .build()
        .unwrap();

    // The input never ends, so only the shutdown future stops the loop.
    let (_writer, reader) = tokio::io::duplex(64);
    let mut output = Vec::new();
    run_repl(
        factory.start(),
        tokio::io::BufReader::new(reader),
        &mut output,
        std::future::ready(()),
    )
    .await
    .unwrap();

    assert!(path.exists());
    assert!(ChatStore::load(&path).unwrap().keys().next().is_none());
}

#[tokio::test]
async fn test_model_error_is_reported() {
    let model_provider = TestModelProvider::default();
    let factory = SessionFactoryBuilder::with_model_provider(model_provider)
        .build()
        .unwrap();

    let mut output = Vec::new();
    run_repl(factory.start(), &b"anyone?\n"[..], &mut output, pending())
        .await
        .unwrap();
    let output = String::from_utf8(output).unwrap();
    assert!(output.contains("error:"), "{output}");
    assert!(output.contains("the script has no more responses"), "{output}");
}
