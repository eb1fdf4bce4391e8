use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use reqwest::{Client, StatusCode, header};
use serde_json::{Value, json};
use tavern::SessionFactoryBuilder;
use tavern::config::DEFAULT_SESSION_KEY;
use tavern::core::memory::ChatStore;
use tavern::tools::DiceRoller;
use tavern::web::{self, Credentials, WebApp};
use tavern_test_model::{PresetResponse, TestModelProvider};
use tempfile::{TempDir, tempdir};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    model_provider: TestModelProvider,
    store_path: PathBuf,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<std::io::Result<()>>,
    dir: TempDir,
}

impl TestServer {
    async fn start(credentials: Option<Credentials>) -> Self {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("chat_store.json");
        let model_provider = TestModelProvider::default();
        let factory = SessionFactoryBuilder::with_model_provider(model_provider.clone())
            .with_game_tools(DiceRoller::seeded(3))
            .with_chat_store(ChatStore::default(), Some(store_path.clone()))
            .build()
            .unwrap();
        let app = WebApp::new(Arc::new(factory), credentials);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(web::serve(app, listener, async move {
            shutdown_rx.await.ok();
        }));

        Self {
            addr,
            model_provider,
            store_path,
            shutdown_tx: Some(shutdown_tx),
            handle,
            dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn create_session(&self, client: &Client) -> String {
        let resp = client.post(self.url("/api/sessions")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        body["id"].as_str().unwrap().to_owned()
    }

    /// Stops the server, handing back the directory of the chat store.
    async fn shutdown(mut self) -> TempDir {
        if let Some(tx) = self.shutdown_tx.take() {
            tx.send(()).ok();
        }
        self.handle.await.unwrap().unwrap();
        self.dir
    }

    fn stored_turns(&self) -> usize {
        ChatStore::load(&self.store_path)
            .unwrap()
            .messages(DEFAULT_SESSION_KEY)
            .len()
    }
}

#[tokio::test]
async fn test_message_round_trip() {
    let server = TestServer::start(None).await;
    server.model_provider.push_response(PresetResponse::tool_call(
        "call_1",
        "roll_a_dice",
        json!({ "sides": 20 }),
    ));
    server
        .model_provider
        .push_response(PresetResponse::text("A solid roll."));

    let client = Client::new();
    let id = server.create_session(&client).await;
    let resp = client
        .post(server.url(&format!("/api/sessions/{id}/messages")))
        .json(&json!({ "content": "Roll a d20" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["content"], "A solid roll.");
    assert_eq!(body["tool_calls"], 1);
    assert_eq!(server.model_provider.tool_results_in_last_request(), 1);

    let resp = client
        .delete(server.url(&format!("/api/sessions/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(server.stored_turns(), 2);

    // The session is gone once ended.
    let resp = client
        .post(server.url(&format!("/api/sessions/{id}/messages")))
        .json(&json!({ "content": "Hello?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    server.shutdown().await;
}

#[tokio::test]
async fn test_bad_requests() {
    let server = TestServer::start(None).await;
    let client = Client::new();

    let resp = client
        .post(server.url("/api/sessions/not-a-uuid/messages"))
        .json(&json!({ "content": "Hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "no such session");

    let resp = client
        .delete(server.url("/api/sessions/6f1c2a4e-0d0a-4a52-9d59-2b8c5f0e7a11"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let id = server.create_session(&client).await;
    let resp = client
        .post(server.url(&format!("/api/sessions/{id}/messages")))
        .json(&json!({ "content": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Nothing is scripted, so the model fails.
    let resp = client
        .post(server.url(&format!("/api/sessions/{id}/messages")))
        .json(&json!({ "content": "Hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("model request failed"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_streaming() {
    let server = TestServer::start(None).await;
    server.model_provider.push_response(PresetResponse::tool_call(
        "call_1",
        "roll_a_skill",
        json!({ "skill": "Stealth", "difficulty_class": 12 }),
    ));
    server
        .model_provider
        .push_response(PresetResponse::text("You slip past the guards."));

    let client = Client::new();
    let id = server.create_session(&client).await;
    let resp = client
        .post(server.url(&format!("/api/sessions/{id}/stream")))
        .json(&json!({ "content": "I sneak past" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let body = resp.text().await.unwrap();
    let tool_call = body.find("event: tool_call").unwrap();
    let tool_result = body.find("event: tool_result").unwrap();
    let delta = body.find("event: delta").unwrap();
    let done = body.find("event: done").unwrap();
    assert!(tool_call < tool_result, "{body}");
    assert!(tool_result < delta, "{body}");
    assert!(delta < done, "{body}");
    assert!(body.contains("data: You slip past the guards."), "{body}");
    assert!(body.contains("Stealth check against DC 12"), "{body}");
    assert!(!body.contains("event: error"), "{body}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_streaming_carriage_returns() {
    let server = TestServer::start(None).await;
    server
        .model_provider
        .push_response(PresetResponse::text("The door opens.\r\nA draft blows in.\rYou shiver."));

    let client = Client::new();
    let id = server.create_session(&client).await;
    let body = client
        .post(server.url(&format!("/api/sessions/{id}/stream")))
        .json(&json!({ "content": "I open the door" }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("data: The door opens.\ndata: A draft blows in."), "{body}");
    assert!(body.contains("event: done"), "{body}");
    assert!(!body.contains('\r'), "{body:?}");

    // The turn was recorded with the original text.
    client
        .delete(server.url(&format!("/api/sessions/{id}")))
        .send()
        .await
        .unwrap();
    let stored = ChatStore::load(&server.store_path).unwrap();
    let turns = stored.messages(DEFAULT_SESSION_KEY);
    assert_eq!(turns.len(), 2);
    assert!(turns[1].content.contains("\r\n"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_character_starter() {
    let server = TestServer::start(None).await;
    server.model_provider.push_response(PresetResponse::tool_call(
        "call_1",
        "create_character",
        json!({ "name": "Don Joe", "race": "Dwarf", "class": "Fighter" }),
    ));
    server
        .model_provider
        .push_response(PresetResponse::text("Don Joe is a stout dwarf."));

    let starter = web::STARTERS
        .iter()
        .find(|s| s.label == "Create a character for me.")
        .unwrap();
    let client = Client::new();
    let id = server.create_session(&client).await;
    let body = client
        .post(server.url(&format!("/api/sessions/{id}/stream")))
        .json(&json!({ "content": starter.message }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("Don Joe, a level 1 Dwarf Fighter"), "{body}");
    assert!(body.contains("event: done"), "{body}");
    assert!(!body.contains("\"is_error\":true"), "{body}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_streaming_error() {
    let server = TestServer::start(None).await;
    let client = Client::new();
    let id = server.create_session(&client).await;
    let body = client
        .post(server.url(&format!("/api/sessions/{id}/stream")))
        .json(&json!({ "content": "Hello" }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("event: error"), "{body}");
    assert!(!body.contains("event: done"), "{body}");
    server.shutdown().await;
}

#[tokio::test]
async fn test_basic_auth() {
    let credentials = Credentials {
        username: "admin".to_owned(),
        password: "hunter2".to_owned(),
    };
    let server = TestServer::start(Some(credentials)).await;
    let client = Client::new();

    let resp = client.get(server.url("/api/starters")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        resp.headers()[header::WWW_AUTHENTICATE],
        r#"Basic realm="tavern""#
    );

    let resp = client
        .get(server.url("/api/starters"))
        .basic_auth("admin", Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = client
        .get(server.url("/api/starters"))
        .basic_auth("admin", Some("hunter2"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let starters: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(starters.len(), 4);
    assert!(starters.iter().all(|s| s["label"].is_string() && s["message"].is_string()));

    server.shutdown().await;
}

#[tokio::test]
async fn test_index_page() {
    let server = TestServer::start(None).await;
    let resp = reqwest::get(server.url("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.text().await.unwrap().contains("/api/sessions"));
    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_ends_sessions() {
    let server = TestServer::start(None).await;
    server
        .model_provider
        .push_response(PresetResponse::text("The tavern falls quiet."));

    {
        let client = Client::new();
        let id = server.create_session(&client).await;
        let resp = client
            .post(server.url(&format!("/api/sessions/{id}/messages")))
            .json(&json!({ "content": "Good night" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
    assert!(!server.store_path.exists());

    let store_path = server.store_path.clone();
    let _dir = server.shutdown().await;
    let stored = ChatStore::load(&store_path).unwrap();
    assert_eq!(stored.messages(DEFAULT_SESSION_KEY).len(), 2);
}
