//! HTTP contract tests for the chat-completions client and the Telegram
//! notifier, run against a local mock server.

use std::sync::Arc;

use cadence_agent::{
    Agent, AgentError, ChatClient, ChatConfig, ChatMessage, Completion, PromptBuilder,
    TelegramNotifier, fallback_message,
};
use cadence_scheduler::{ConversationState, Notifier, Phase};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

fn client(server: &MockServer) -> ChatClient {
    ChatClient::new(ChatConfig::new("test-key").with_base_url(format!("{}/v1", server.uri())))
        .unwrap()
}

#[tokio::test]
async fn test_completion_request_format() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "max_tokens": 500,
            "messages": [
                {"role": "system", "content": "be gentle"},
                {"role": "user", "content": "Hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("  Hi there!  ")))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client(&server)
        .complete(&[ChatMessage::system("be gentle"), ChatMessage::user("Hello")])
        .await
        .unwrap();
    assert_eq!(reply, "Hi there!");
}

#[tokio::test]
async fn test_completion_error_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let err = client(&server)
        .complete(&[ChatMessage::user("Hello")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AgentError::Api { status: 429, ref body } if body == "rate limited"
    ));
}

#[tokio::test]
async fn test_completion_without_choices_is_empty() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = client(&server)
        .complete(&[ChatMessage::user("Hello")])
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::EmptyResponse));
}

#[tokio::test]
async fn test_phase_falls_back_when_service_is_down() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let agent = Agent::new(Arc::new(client(&server)), PromptBuilder::new("Alex"));
    let conversation = agent
        .run_phase(Phase::EveningCheckin, ConversationState::new("alex"))
        .await;

    let last = conversation.last_assistant_message().unwrap();
    assert_eq!(last.content, fallback_message(Phase::EveningCheckin));
    assert!(last.error);
}

#[tokio::test]
async fn test_telegram_send_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/bot123:abc/sendMessage"))
        .and(body_partial_json(json!({"chat_id": "42", "text": "Time to check in"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = TelegramNotifier::new("123:abc", "42")
        .unwrap()
        .with_api_base(server.uri());
    assert!(notifier.send("Time to check in").await);
}

#[tokio::test]
async fn test_telegram_failure_reports_false() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/bot123:abc/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": false,
            "description": "Bad Request: chat not found"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bot999:zzz/sendMessage"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let rejected = TelegramNotifier::new("123:abc", "42")
        .unwrap()
        .with_api_base(server.uri());
    assert!(!rejected.send("hello").await);

    let unauthorized = TelegramNotifier::new("999:zzz", "42")
        .unwrap()
        .with_api_base(server.uri());
    assert!(!unauthorized.send("hello").await);
}
