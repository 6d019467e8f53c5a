//! End-to-end completion flow: `ChatManager` driving the real
//! `OpenAIProvider` against a mock HTTP endpoint.

use std::sync::Arc;
use std::time::Duration;

use courier_bot::catalog::{default_models, ModelCatalog};
use courier_bot::provider::OpenAIProvider;
use courier_bot::session::{ChatManager, ChatOptions, TokenCounter};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn options() -> ChatOptions {
    ChatOptions {
        default_model: "gpt-4.1-nano".into(),
        default_system_prompt: "You are a helpful assistant.".into(),
        max_completion_tokens: 5000,
        request_timeout: Duration::from_secs(5),
        usd_rate: 107.0,
    }
}

fn manager_for(server: &MockServer) -> ChatManager {
    let provider = Arc::new(OpenAIProvider::with_base_url("sk-test", server.uri()));
    ChatManager::new(
        provider,
        ModelCatalog::new(default_models()),
        TokenCounter::new().unwrap(),
        options(),
    )
    .unwrap()
}

fn completion_body(content: &str, completion_tokens: i64) -> serde_json::Value {
    serde_json::json!({
        "model": "gpt-4.1-nano",
        "choices": [{"message": {"content": content}, "finish_reason": "stop"}],
        "usage": {
            "prompt_tokens": 21,
            "completion_tokens": completion_tokens,
            "total_tokens": 21 + completion_tokens
        }
    })
}

#[tokio::test]
async fn successful_completion_reports_service_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("  Hello from the mock!  ", 9)),
        )
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    let exchange = manager.request_completion("chat-1", "Hello").await;

    // Reply is trimmed; completion tokens come from the usage block,
    // prompt tokens from local tokenization.
    assert_eq!(exchange.reply, "Hello from the mock!");
    assert_eq!(exchange.completion_tokens, 9);
    assert!(exchange.prompt_tokens > 0);

    let expected_output_usd = 9.0 / 1_000_000.0 * 0.40;
    assert!((exchange.output_cost_usd - expected_output_usd).abs() < 1e-12);
    assert!((exchange.output_cost_local - expected_output_usd * 107.0).abs() < 1e-12);
    assert!(exchange.total_cost_local > 0.0);
}

#[tokio::test]
async fn request_carries_system_history_and_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("reply", 3)))
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    manager.request_completion("chat-1", "first").await;
    manager.request_completion("chat-1", "second").await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);

    let body: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(body["model"], "gpt-4.1-nano");
    assert_eq!(body["max_tokens"], 5000);

    // system + user + assistant + user
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[0]["content"], "You are a helpful assistant.");
    assert_eq!(messages[1]["content"], "first");
    assert_eq!(messages[2]["role"], "assistant");
    assert_eq!(messages[3]["content"], "second");
}

#[tokio::test]
async fn api_error_degrades_to_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429).set_body_string(r#"{"error": "quota exceeded"}"#),
        )
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    let exchange = manager.request_completion("chat-1", "Hello").await;

    assert!(exchange.reply.contains("quota exceeded"));
    assert_eq!(exchange.prompt_tokens, 0);
    assert_eq!(exchange.completion_tokens, 0);
    assert!(exchange.total_cost_local.abs() < f64::EPSILON);

    // The failed exchange still keeps the user's turn: the next
    // request re-sends it ahead of the new message.
    server.reset().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok", 1)))
        .mount(&server)
        .await;

    manager.request_completion("chat-1", "Again").await;
    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let messages = body["messages"].as_array().unwrap();
    // system + failed user turn + new user turn, no phantom assistant
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1]["content"], "Hello");
    assert_eq!(messages[2]["content"], "Again");
}

#[tokio::test]
async fn malformed_response_degrades_to_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    let exchange = manager.request_completion("chat-1", "Hello").await;

    assert!(!exchange.reply.is_empty());
    assert_eq!(exchange.completion_tokens, 0);
}
