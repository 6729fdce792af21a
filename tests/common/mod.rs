// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared test doubles and request helpers for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;

use lmbridge::config::BridgeConfig;
use lmbridge::error::BridgeError;
use lmbridge::server::{build_router, AppState};
use lmbridge::types::{ChatMessage, ModelInfo};
use lmbridge::LanguageModelPort;

/// A loopback peer address as the listener would report it.
pub const LOOPBACK_PEER: &str = "127.0.0.1:54321";

/// A non-loopback peer address.
pub const REMOTE_PEER: &str = "10.1.2.3:54321";

/// Scripted model port double.
pub struct MockPort {
    pub reply: String,
    pub models: Vec<ModelInfo>,
    pub current: Option<ModelInfo>,
}

impl MockPort {
    /// Port that answers every send with `reply` from a gpt-4o model.
    pub fn answering(reply: &str) -> Self {
        let model = default_model();
        Self {
            reply: reply.to_string(),
            models: vec![model.clone()],
            current: Some(model),
        }
    }

    /// Port with no models at all.
    pub fn empty() -> Self {
        Self {
            reply: String::new(),
            models: Vec::new(),
            current: None,
        }
    }

    /// Replace the model listing.
    pub fn with_models(mut self, models: Vec<ModelInfo>) -> Self {
        self.models = models;
        self
    }
}

pub fn default_model() -> ModelInfo {
    ModelInfo::new("gpt-4o", "copilot", "gpt-4o", "GPT-4o", 128_000)
}

#[async_trait]
impl LanguageModelPort for MockPort {
    async fn send_request(
        &self,
        _messages: &[ChatMessage],
        _family: Option<&str>,
    ) -> Result<String, BridgeError> {
        Ok(self.reply.clone())
    }

    async fn list_available_models(&self) -> Result<Vec<ModelInfo>, BridgeError> {
        Ok(self.models.clone())
    }

    fn current_model(&self) -> Option<ModelInfo> {
        self.current.clone()
    }
}

/// Router over a fixed config and a scripted port.
pub fn router_with(config: BridgeConfig, port: MockPort) -> Router {
    build_router(Arc::new(AppState::new(Arc::new(config), Arc::new(port))))
}

/// Build a request carrying a simulated peer address, the way the
/// listener's connect-info would.
pub fn request(method: Method, uri: &str, peer: &str, body: Body) -> Request<Body> {
    request_with_auth(method, uri, peer, body, None)
}

/// Same, with an `Authorization` header.
pub fn request_with_auth(
    method: Method,
    uri: &str,
    peer: &str,
    body: Body,
    authorization: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = authorization {
        builder = builder.header("Authorization", value);
    }
    let mut req = builder.body(body).expect("request");

    let addr: SocketAddr = peer.parse().expect("peer address");
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

/// Collect a response body into JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

/// A well-formed single-message chat body.
pub fn chat_body() -> Body {
    Body::from(r#"{"messages":[{"role":"user","content":"Hello"}]}"#)
}
