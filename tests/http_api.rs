// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end tests for the bridge HTTP surface.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`; the
//! peer address the security gate sees is injected the same way the real
//! listener's connect-info is.

mod common;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use tower::ServiceExt;

use common::{
    body_json, chat_body, default_model, request, request_with_auth, router_with, MockPort,
    LOOPBACK_PEER, REMOTE_PEER,
};
use lmbridge::config::BridgeConfig;
use lmbridge::types::ModelInfo;

// =============================================================================
// Chat Endpoint
// =============================================================================

#[tokio::test]
async fn chat_from_loopback_succeeds() {
    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi there"));

    let response = app
        .oneshot(request(Method::POST, "/v1/chat", LOOPBACK_PEER, chat_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );

    let json = body_json(response).await;
    assert_eq!(json["output_text"], "Hi there");
    assert_eq!(json["model"]["vendor"], "copilot");
    assert_eq!(json["model"]["family"], "gpt-4o");
    assert!(json["id"].as_str().unwrap().starts_with("req_"));
    assert!(json["meta"]["startedAt"].is_string());
    assert!(json["meta"]["endedAt"].is_string());
}

#[tokio::test]
async fn chat_from_remote_peer_is_forbidden() {
    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi"));

    let response = app
        .oneshot(request(Method::POST, "/v1/chat", REMOTE_PEER, chat_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Forbidden");
    assert_eq!(json["details"], "Only localhost requests are allowed");
}

#[tokio::test]
async fn remote_peer_rejected_even_with_invalid_body() {
    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi"));

    let response = app
        .oneshot(request(
            Method::POST,
            "/v1/chat",
            REMOTE_PEER,
            Body::from("not json at all"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn chat_without_token_is_unauthorized_when_token_configured() {
    let config = BridgeConfig {
        token: "abc".to_string(),
        ..Default::default()
    };
    let app = router_with(config, MockPort::answering("Hi"));

    let response = app
        .oneshot(request(Method::POST, "/v1/chat", LOOPBACK_PEER, chat_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Unauthorized");
    assert_eq!(json["details"], "Invalid or missing bearer token");
}

#[tokio::test]
async fn chat_with_correct_token_succeeds() {
    let config = BridgeConfig {
        token: "abc".to_string(),
        ..Default::default()
    };
    let app = router_with(config, MockPort::answering("Hi"));

    let response = app
        .oneshot(request_with_auth(
            Method::POST,
            "/v1/chat",
            LOOPBACK_PEER,
            chat_body(),
            Some("Bearer abc"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn chat_with_wrong_scheme_is_unauthorized() {
    let config = BridgeConfig {
        token: "abc".to_string(),
        ..Default::default()
    };
    let app = router_with(config, MockPort::answering("Hi"));

    let response = app
        .oneshot(request_with_auth(
            Method::POST,
            "/v1/chat",
            LOOPBACK_PEER,
            chat_body(),
            Some("Basic abc"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi"));

    let response = app
        .oneshot(request(
            Method::POST,
            "/v1/chat",
            LOOPBACK_PEER,
            Body::from("{not json"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Bad Request");
    assert_eq!(json["details"], "Invalid JSON payload");
}

#[tokio::test]
async fn missing_messages_is_bad_request() {
    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi"));

    let response = app
        .oneshot(request(
            Method::POST,
            "/v1/chat",
            LOOPBACK_PEER,
            Body::from("{}"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["details"], "messages array is required");
}

#[tokio::test]
async fn empty_messages_is_bad_request() {
    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi"));

    let response = app
        .oneshot(request(
            Method::POST,
            "/v1/chat",
            LOOPBACK_PEER,
            Body::from(r#"{"messages":[]}"#),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["details"], "messages array must not be empty");
}

#[tokio::test]
async fn invalid_role_is_bad_request_naming_the_role() {
    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi"));

    let response = app
        .oneshot(request(
            Method::POST,
            "/v1/chat",
            LOOPBACK_PEER,
            Body::from(r#"{"messages":[{"role":"robot","content":"Hello"}]}"#),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["details"].as_str().unwrap().contains("'robot'"));
}

#[tokio::test]
async fn oversized_body_is_bad_request_with_limit_in_details() {
    let config = BridgeConfig {
        max_body_bytes: 10,
        ..Default::default()
    };
    let app = router_with(config, MockPort::answering("Hi"));

    let response = app
        .oneshot(request(
            Method::POST,
            "/v1/chat",
            LOOPBACK_PEER,
            Body::from("x".repeat(11)),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["details"]
        .as_str()
        .unwrap()
        .contains("exceeds maximum size of 10 bytes"));
}

#[tokio::test]
async fn body_of_exactly_the_limit_is_accepted() {
    let body = r#"{"messages":[{"role":"user","content":"Hello"}]}"#;
    let config = BridgeConfig {
        max_body_bytes: body.len(),
        ..Default::default()
    };
    let app = router_with(config, MockPort::answering("Hi"));

    let response = app
        .oneshot(request(
            Method::POST,
            "/v1/chat",
            LOOPBACK_PEER,
            Body::from(body),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn provider_without_current_model_is_internal_error() {
    let mut port = MockPort::answering("Hi");
    port.current = None;
    let app = router_with(BridgeConfig::default(), port);

    let response = app
        .oneshot(request(Method::POST, "/v1/chat", LOOPBACK_PEER, chat_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Internal Server Error");
    assert_eq!(json["details"], "No model information available");
}

// =============================================================================
// OpenAI-Compatible Endpoint
// =============================================================================

#[tokio::test]
async fn compat_route_reshapes_the_envelope() {
    let app = router_with(BridgeConfig::default(), MockPort::answering("Compat reply"));

    let response = app
        .oneshot(request(
            Method::POST,
            "/v1/chat/completions",
            LOOPBACK_PEER,
            chat_body(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["id"].as_str().unwrap().starts_with("req_"));
    assert_eq!(json["object"], "chat.completion");
    assert!(json["created"].as_i64().unwrap() > 0);
    assert_eq!(json["model"], "gpt-4o");
    assert_eq!(json["choices"][0]["index"], 0);
    assert_eq!(json["choices"][0]["message"]["role"], "assistant");
    assert_eq!(json["choices"][0]["message"]["content"], "Compat reply");
    assert_eq!(json["choices"][0]["finish_reason"], "stop");
    assert_eq!(json["usage"]["prompt_tokens"], 0);
    assert_eq!(json["usage"]["completion_tokens"], 0);
    assert_eq!(json["usage"]["total_tokens"], 0);
}

// =============================================================================
// Models Endpoint
// =============================================================================

#[tokio::test]
async fn models_with_empty_provider_listing() {
    let app = router_with(BridgeConfig::default(), MockPort::empty());

    let response = app
        .oneshot(request(Method::GET, "/v1/models", LOOPBACK_PEER, Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["models"], serde_json::json!([]));
    assert_eq!(json["count"], 0);
}

#[tokio::test]
async fn models_listing_flattens_extras() {
    let mut extra = indexmap::IndexMap::new();
    extra.insert("parameter_size".to_string(), serde_json::json!("7B"));

    let model = ModelInfo::new("m1", "ollama", "llama", "llama3:8b", 4096)
        .with_version("8b")
        .with_extra(extra);
    let port = MockPort::answering("x").with_models(vec![model, default_model()]);
    let app = router_with(BridgeConfig::default(), port);

    let response = app
        .oneshot(request(Method::GET, "/v1/models", LOOPBACK_PEER, Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["count"], 2);
    assert_eq!(json["models"][0]["id"], "m1");
    assert_eq!(json["models"][0]["maxInputTokens"], 4096);
    assert_eq!(json["models"][0]["version"], "8b");
    assert_eq!(json["models"][0]["parameter_size"], "7B");
    assert!(json["models"][1].get("version").is_none());
}

#[tokio::test]
async fn models_listing_is_idempotent() {
    let config = BridgeConfig::default();
    let first = {
        let app = router_with(config.clone(), MockPort::answering("x"));
        let response = app
            .oneshot(request(Method::GET, "/v1/models", LOOPBACK_PEER, Body::empty()))
            .await
            .unwrap();
        body_json(response).await
    };
    let second = {
        let app = router_with(config, MockPort::answering("x"));
        let response = app
            .oneshot(request(Method::GET, "/v1/models", LOOPBACK_PEER, Body::empty()))
            .await
            .unwrap();
        body_json(response).await
    };
    assert_eq!(first, second);
}

// =============================================================================
// CORS, Preflight, and Routing
// =============================================================================

#[tokio::test]
async fn options_preflight_short_circuits_with_204() {
    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi"));

    let response = app
        .oneshot(request(Method::OPTIONS, "/v1/chat", REMOTE_PEER, Body::empty()))
        .await
        .unwrap();

    // Preflight wins even over the localhost check.
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(
        response.headers()["access-control-allow-methods"],
        "GET, POST, OPTIONS"
    );
    assert_eq!(
        response.headers()["access-control-allow-headers"],
        "Content-Type, Authorization"
    );
}

#[tokio::test]
async fn cors_headers_present_on_success_and_error() {
    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi"));
    let response = app
        .oneshot(request(Method::POST, "/v1/chat", LOOPBACK_PEER, chat_body()))
        .await
        .unwrap();
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi"));
    let response = app
        .oneshot(request(Method::POST, "/v1/chat", REMOTE_PEER, chat_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn unknown_endpoint_is_404_naming_method_and_path() {
    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi"));

    let response = app
        .oneshot(request(Method::GET, "/nope", LOOPBACK_PEER, Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Not Found");
    assert_eq!(json["details"], "Unknown endpoint: GET /nope");
}

#[tokio::test]
async fn wrong_method_on_known_path_is_404() {
    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi"));

    let response = app
        .oneshot(request(Method::GET, "/v1/chat", LOOPBACK_PEER, Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["details"], "Unknown endpoint: GET /v1/chat");
}

#[tokio::test]
async fn success_bodies_are_pretty_printed() {
    use http_body_util::BodyExt;

    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi"));
    let response = app
        .oneshot(request(Method::POST, "/v1/chat", LOOPBACK_PEER, chat_body()))
        .await
        .unwrap();

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = std::str::from_utf8(&bytes).unwrap();
    assert!(text.contains("\n  \"id\""), "expected 2-space indent: {text}");
}

// =============================================================================
// Health Endpoint
// =============================================================================

#[tokio::test]
async fn health_reports_ok_without_auth() {
    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi"));

    let response = app
        .oneshot(request(Method::GET, "/health", LOOPBACK_PEER, Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["provider_status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn health_still_requires_loopback() {
    let app = router_with(BridgeConfig::default(), MockPort::answering("Hi"));

    let response = app
        .oneshot(request(Method::GET, "/health", REMOTE_PEER, Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
