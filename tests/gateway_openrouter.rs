use std::time::Duration;

use generation_harness::gateway::{
    ChatGateway, ChatRequest, Message, OpenRouterAdapter, ProviderError,
};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn adapter(server: &MockServer) -> OpenRouterAdapter {
    OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5), None, None)
        .unwrap()
}

async fn sent_body(server: &MockServer) -> Value {
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    serde_json::from_slice(&received[0].body).unwrap()
}

#[tokio::test]
async fn openrouter_returns_raw_body_and_request_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-request-id", "req-42")
                .set_body_json(json!({
                    "choices": [{
                        "message": { "role": "assistant", "content": "4" },
                        "finish_reason": "stop"
                    }],
                    "usage": { "prompt_tokens": 10, "completion_tokens": 1 }
                })),
        )
        .mount(&server)
        .await;

    let req = ChatRequest::new("openai/gpt-4o-mini", vec![Message::user("What is 2+2?")]);
    let resp = adapter(&server).chat(&req).await.unwrap();

    assert_eq!(resp.raw["choices"][0]["message"]["content"], "4");
    assert_eq!(resp.request_id.as_deref(), Some("req-42"));
}

#[tokio::test]
async fn openrouter_omits_unset_sampling_parameters() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let req = ChatRequest::new("m", vec![Message::user("hi")]);
    adapter(&server).chat(&req).await.unwrap();

    let body = sent_body(&server).await;
    assert_eq!(body["model"], "m");
    assert_eq!(body["messages"], json!([{ "role": "user", "content": "hi" }]));
    let obj = body.as_object().unwrap();
    assert!(!obj.contains_key("temperature"));
    assert!(!obj.contains_key("top_p"));
    assert!(!obj.contains_key("max_tokens"));
}

#[tokio::test]
async fn openrouter_sends_system_message_and_sampling_when_set() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let req = ChatRequest::new(
        "m",
        vec![Message::system("Answer tersely."), Message::user("hi")],
    )
    .temperature(Some(0.5))
    .top_p(Some(0.9))
    .max_tokens(Some(32));
    adapter(&server).chat(&req).await.unwrap();

    let body = sent_body(&server).await;
    assert_eq!(body["messages"][0], json!({ "role": "system", "content": "Answer tersely." }));
    assert_eq!(body["messages"][1], json!({ "role": "user", "content": "hi" }));
    assert_eq!(body["temperature"], json!(0.5));
    assert_eq!(body["top_p"], json!(0.9));
    assert_eq!(body["max_tokens"], json!(32));
}

#[tokio::test]
async fn openrouter_accepts_success_without_choices() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "x" })))
        .mount(&server)
        .await;

    let req = ChatRequest::new("m", vec![Message::user("hi")]);
    let resp = adapter(&server).chat(&req).await.unwrap();
    assert_eq!(resp.raw, json!({ "id": "x" }));
}

#[tokio::test]
async fn openrouter_classifies_http_429_as_rate_limit_and_keeps_context() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-request-id", "abc123")
                .set_body_json(json!({
                    "error": { "message": "rate limited", "code": "rate_limit_exceeded" }
                })),
        )
        .mount(&server)
        .await;

    let req = ChatRequest::new("m", vec![Message::user("hi")]);
    let err = adapter(&server).chat(&req).await.unwrap_err();
    match err {
        ProviderError::RateLimited { context } => {
            assert_eq!(context.http_status, Some(429));
            assert_eq!(context.provider_code.as_deref(), Some("rate_limit_exceeded"));
            assert_eq!(context.request_id.as_deref(), Some("abc123"));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn openrouter_surfaces_server_errors_with_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": { "message": "upstream exploded" }
        })))
        .mount(&server)
        .await;

    let req = ChatRequest::new("m", vec![Message::user("hi")]);
    let err = adapter(&server).chat(&req).await.unwrap_err();
    match &err {
        ProviderError::Provider {
            message, context, ..
        } => {
            assert_eq!(message, "upstream exploded");
            assert_eq!(context.as_ref().unwrap().http_status, Some(500));
        }
        other => panic!("expected Provider, got {other:?}"),
    }
}

#[tokio::test]
async fn openrouter_rejects_non_json_success_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let req = ChatRequest::new("m", vec![Message::user("hi")]);
    let err = adapter(&server).chat(&req).await.unwrap_err();
    assert_eq!(err.code(), "provider_error");
}

#[tokio::test]
async fn openrouter_maps_client_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(2))
                .set_body_json(json!({ "choices": [] })),
        )
        .mount(&server)
        .await;

    let adapter = OpenRouterAdapter::with_config(
        "sk-test",
        server.uri(),
        Duration::from_millis(100),
        None,
        None,
    )
    .unwrap();

    let req = ChatRequest::new("m", vec![Message::user("hi")]);
    let err = adapter.chat(&req).await.unwrap_err();
    assert!(matches!(err, ProviderError::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn openrouter_rejects_oversized_input_without_sending() {
    let server = MockServer::start().await;

    let req = ChatRequest::new("m", vec![Message::user("x".repeat(500_001))]);
    let err = adapter(&server).chat(&req).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidRequest { .. }));
    assert!(server.received_requests().await.unwrap().is_empty());
}
