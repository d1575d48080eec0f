use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use imagepipe_core_sdk::{
    config::{PipeConfig, Variant},
    error::{ErrorKind, PipeError},
    format::{NOT_FOUND_MESSAGE, STATUS_SUBMITTED},
    models::{ConversationPayload, UserContext},
    pipe::ImagePipe,
};

#[derive(Clone, Default)]
struct Captured {
    body: Arc<Mutex<Option<Value>>>,
    auth: Arc<Mutex<Option<String>>>,
}

fn long_b64() -> String {
    "iVBORw0KGgo".repeat(20)
}

async fn spawn_upstream() -> (SocketAddr, Captured) {
    let captured = Captured::default();
    let app = Router::new()
        .route(
            "/v1/chat/completions",
            post(
                |State(c): State<Captured>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    *c.auth.lock().expect("lock auth") = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    *c.body.lock().expect("lock body") = Some(body);
                    Json(json!({
                        "choices": [{"message": {"role": "assistant", "content": "![image](data:image/png;base64,AAAA)"}}]
                    }))
                },
            ),
        )
        .route(
            "/missing/v1/chat/completions",
            post(|| async { Json(json!({"choices": []})) }),
        )
        .route(
            "/fail",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "server error") }),
        )
        .route("/text", post(|| async { "not json" }))
        .route(
            "/image",
            post(|State(c): State<Captured>, Json(body): Json<Value>| async move {
                *c.body.lock().expect("lock body") = Some(body);
                Json(json!({
                    "created": 1,
                    "data": [{"revised_prompt": "a cat", "b64_json": long_b64()}]
                }))
            }),
        )
        .route(
            "/slow",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({"data": [{"b64_json": long_b64()}]}))
            }),
        )
        .route(
            "/empty",
            post(|| async { Json(json!({"data": [{"url": "https://cdn.example.com/x.png"}]})) }),
        )
        .with_state(captured.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve upstream");
    });
    (addr, captured)
}

fn start(variant: Variant, api_base_url: String, api_key: &str) -> ImagePipe {
    ImagePipe::start(PipeConfig {
        variant,
        api_base_url,
        api_key: api_key.to_string(),
        model_id: "test-model".to_string(),
        cost_per_image: 0.1,
        request_timeout_secs: Some(10),
        telemetry_enabled: false,
    })
    .expect("start pipe")
}

fn conversation() -> ConversationPayload {
    ConversationPayload::from_value(json!({
        "messages": [
            {"role": "user", "content": "a"},
            {"role": "assistant", "content": "b"},
            {"role": "user", "content": "c"}
        ],
        "temperature": 0.2,
        "stream": true
    }))
    .expect("parse conversation")
}

#[tokio::test]
async fn test_chat_variant_sends_last_user_message_and_appends_cost() {
    let (addr, captured) = spawn_upstream().await;
    let pipe = start(Variant::ChatContent, format!("http://{addr}/"), "sk-test");

    let out = pipe.run(conversation(), &UserContext::default()).await;

    assert_eq!(
        out,
        vec![
            STATUS_SUBMITTED.to_string(),
            "![image](data:image/png;base64,AAAA)\n\n本次生成消耗0.1000元".to_string(),
        ]
    );

    let body = captured
        .body
        .lock()
        .expect("lock body")
        .clone()
        .expect("upstream saw a body");
    assert_eq!(body["messages"], json!([{"role": "user", "content": "c"}]));
    assert_eq!(body["model"], json!("test-model"));
    assert_eq!(body["stream"], json!(false));
    assert_eq!(body["temperature"], json!(0.2));
    assert_eq!(
        captured.auth.lock().expect("lock auth").as_deref(),
        Some("Bearer sk-test")
    );
}

#[tokio::test]
async fn test_chat_variant_without_key_sends_no_authorization() {
    let (addr, captured) = spawn_upstream().await;
    let pipe = start(Variant::ChatContent, format!("http://{addr}"), "");

    pipe.run(conversation(), &UserContext::default()).await;

    assert!(captured.auth.lock().expect("lock auth").is_none());
}

#[tokio::test]
async fn test_chat_variant_missing_content_is_unknown_error() {
    let (addr, _) = spawn_upstream().await;
    let pipe = start(Variant::ChatContent, format!("http://{addr}/missing"), "");

    let out = pipe.run(conversation(), &UserContext::default()).await;

    assert_eq!(out.len(), 2);
    assert!(out[1].starts_with("发生未知错误: "));
    assert!(out[1].contains("choices[0].message.content"));
}

#[tokio::test]
async fn test_base64_variant_returns_data_url() {
    let (addr, captured) = spawn_upstream().await;
    let pipe = start(Variant::Base64Image, format!("http://{addr}/image"), "");

    let out = pipe.run(conversation(), &UserContext::default()).await;

    assert_eq!(out, vec![format!("data:image/png;base64,{}", long_b64())]);

    let body = captured
        .body
        .lock()
        .expect("lock body")
        .clone()
        .expect("upstream saw a body");
    assert_eq!(body["messages"].as_array().map(Vec::len), Some(3));
    assert_eq!(body["stream"], json!(true));
}

#[tokio::test]
async fn test_base64_variant_miss_reports_diagnostic() {
    let (addr, _) = spawn_upstream().await;
    let pipe = start(Variant::Base64Image, format!("http://{addr}/empty"), "");

    let out = pipe.run(conversation(), &UserContext::default()).await;

    assert_eq!(out, vec![NOT_FOUND_MESSAGE.to_string()]);
}

#[tokio::test]
async fn test_http_error_carries_status_and_body() {
    let (addr, _) = spawn_upstream().await;
    let pipe = start(Variant::Base64Image, format!("http://{addr}/fail"), "");

    let err = pipe
        .generate(&conversation())
        .await
        .expect_err("status 500 must fail");
    assert_eq!(err.kind(), ErrorKind::Http);

    let out = pipe.run(conversation(), &UserContext::default()).await;
    assert_eq!(out.len(), 1);
    assert!(out[0].contains("500"));
    assert!(out[0].contains("server error"));
}

#[tokio::test]
async fn test_non_json_body_is_parse_error() {
    let (addr, _) = spawn_upstream().await;
    let pipe = start(Variant::Base64Image, format!("http://{addr}/text"), "");

    let err = pipe
        .generate(&conversation())
        .await
        .expect_err("plain text must fail");
    assert_eq!(err.kind(), ErrorKind::Parse);

    let out = pipe.run(conversation(), &UserContext::default()).await;
    assert_eq!(out.len(), 1);
    assert!(out[0].contains("not json"));
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let pipe = start(Variant::ChatContent, format!("http://{addr}"), "");
    let out = pipe.run(conversation(), &UserContext::default()).await;

    assert_eq!(out.len(), 2);
    assert_eq!(out[0], STATUS_SUBMITTED);
    assert!(out[1].starts_with("发生未知错误: "));
    assert!(out[1].contains("Error: Transport"));
}

#[tokio::test]
async fn test_shutdown_then_invoke_recreates_client() {
    let (addr, _) = spawn_upstream().await;
    let pipe = start(Variant::Base64Image, format!("http://{addr}/image"), "");

    pipe.shutdown();
    assert!(!pipe.is_running());

    let out = pipe.run(conversation(), &UserContext::default()).await;
    assert!(out[0].starts_with("data:image/png;base64,"));
    assert!(pipe.is_running());
}

#[tokio::test]
async fn test_request_timeout_is_transport_error() {
    let (addr, _) = spawn_upstream().await;
    let pipe = ImagePipe::start(PipeConfig {
        variant: Variant::Base64Image,
        api_base_url: format!("http://{addr}/slow"),
        model_id: "test-model".to_string(),
        request_timeout_secs: Some(1),
        ..PipeConfig::default()
    })
    .expect("start pipe");

    let began = Instant::now();
    let err = pipe
        .generate(&conversation())
        .await
        .expect_err("slow upstream must time out");
    assert!(began.elapsed() < Duration::from_secs(4));
    match err {
        PipeError::Transport(e) => assert!(e.is_timeout()),
        other => panic!("expected transport error, got {other:?}"),
    }

    let out = pipe.run(conversation(), &UserContext::default()).await;
    assert_eq!(out.len(), 1);
    assert!(out[0].starts_with("发生未知错误: "));
    assert!(out[0].contains("timed out"));
}

#[tokio::test]
async fn test_base64_variant_forwards_unusual_messages_verbatim() {
    let (addr, captured) = spawn_upstream().await;
    let pipe = start(Variant::Base64Image, format!("http://{addr}/image"), "");

    let out = pipe
        .run_value(
            json!({"messages": [
                {"role": "user", "image_url": "https://cdn.example.com/cat.png"},
                {"content": "no role here"}
            ]}),
            &UserContext::default(),
        )
        .await;
    assert_eq!(out, vec![format!("data:image/png;base64,{}", long_b64())]);

    let body = captured
        .body
        .lock()
        .expect("lock body")
        .clone()
        .expect("upstream saw a body");
    assert_eq!(
        body["messages"],
        json!([
            {"role": "user", "image_url": "https://cdn.example.com/cat.png"},
            {"content": "no role here"}
        ])
    );
}
