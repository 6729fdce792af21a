// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ollama adapter for the model port.
//!
//! Talks to a locally running Ollama instance: `/api/tags` for model
//! discovery and `/api/chat` (non-streaming) for completions. The cached
//! selected model lives here, not in the core: once a model is chosen it
//! is reused for every later request unless a caller names a family the
//! cached model does not satisfy and the provider can actually offer one.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DEFAULT_PROVIDER_URL;
use crate::error::BridgeError;
use crate::provider::LanguageModelPort;
use crate::types::{ChatMessage, ModelInfo};

/// Default timeout for connection checks (in seconds).
const CONNECTION_TIMEOUT_SECS: u64 = 5;

/// Default timeout for chat completions (in seconds).
const GENERATION_TIMEOUT_SECS: u64 = 300;

/// Context window advertised when the provider does not report one.
const DEFAULT_MAX_INPUT_TOKENS: u32 = 4096;

/// Vendor name stamped on every model this adapter reports.
const VENDOR: &str = "ollama";

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ReplyMessage>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    digest: String,
    #[serde(default)]
    modified_at: String,
    #[serde(default)]
    details: Option<Value>,
}

/// Model port adapter over a local Ollama endpoint.
pub struct OllamaProvider {
    /// Base URL for the Ollama API.
    base_url: String,
    /// HTTP client with configured connect timeout.
    client: reqwest::Client,
    /// Family requested when the caller does not name one.
    default_family: String,
    /// The actively selected model. Set on first successful selection,
    /// last write wins if two first requests race.
    selected: RwLock<Option<ModelInfo>>,
}

impl OllamaProvider {
    /// Adapter against the default local endpoint.
    pub fn new() -> Self {
        Self::with_url(DEFAULT_PROVIDER_URL)
    }

    /// Adapter against a custom endpoint.
    pub fn with_url(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECTION_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: url.into().trim_end_matches('/').to_string(),
            client,
            default_family: crate::config::DEFAULT_MODEL_FAMILY.to_string(),
            selected: RwLock::new(None),
        }
    }

    /// Set the family used when requests carry no hint.
    pub fn with_default_family(mut self, family: impl Into<String>) -> Self {
        self.default_family = family.into();
        self
    }

    /// Get the base URL of the provider endpoint.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn cached(&self) -> Option<ModelInfo> {
        match self.selected.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_selected(&self, model: ModelInfo) {
        match self.selected.write() {
            Ok(mut guard) => *guard = Some(model),
            Err(poisoned) => *poisoned.into_inner() = Some(model),
        }
    }

    fn transport_error(&self, e: reqwest::Error, what: &str) -> BridgeError {
        if e.is_connect() {
            BridgeError::internal_with(
                format!("Cannot connect to model provider at {}", self.base_url),
                e,
            )
        } else if e.is_timeout() {
            BridgeError::internal_with(format!("Provider request timed out while {}", what), e)
        } else {
            BridgeError::internal_with(format!("Provider network error while {}", what), e)
        }
    }

    /// Resolve the model to use for a send: the cached selection when it
    /// satisfies the request, otherwise a fresh pick from the listing.
    async fn select_model(&self, family: Option<&str>) -> Result<ModelInfo, BridgeError> {
        let want = family.unwrap_or(&self.default_family);

        if let Some(current) = self.cached() {
            if family.is_none() || matches_family(&current, want) {
                return Ok(current);
            }
            // Caller named a family the warm model does not satisfy.
            // Re-select only when the provider actually has a match.
            let models = self.list_available_models().await?;
            if let Some(m) = models.iter().find(|m| matches_family(m, want)) {
                self.store_selected(m.clone());
                return Ok(m.clone());
            }
            return Ok(current);
        }

        let models = self.list_available_models().await?;
        let chosen = choose_model(&models, want).ok_or_else(|| {
            BridgeError::model_unavailable("No chat models available from provider")
        })?;
        self.store_selected(chosen.clone());
        Ok(chosen)
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModelPort for OllamaProvider {
    async fn send_request(
        &self,
        messages: &[ChatMessage],
        family: Option<&str>,
    ) -> Result<String, BridgeError> {
        let model = self.select_model(family).await?;

        let wire: Vec<WireMessage<'_>> = messages
            .iter()
            .map(|m| WireMessage {
                role: m.role().as_str(),
                content: m.content(),
            })
            .collect();

        let body = serde_json::json!({
            "model": model.id,
            "messages": wire,
            "stream": false
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .timeout(Duration::from_secs(GENERATION_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| self.transport_error(e, "sending chat request"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(BridgeError::internal(format!(
                "Provider chat call failed: HTTP {} - {}",
                status, error_text
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::internal_with("Failed to parse provider chat response", e))?;

        if let Some(error) = parsed.error {
            return Err(BridgeError::internal(format!("Provider error: {}", error)));
        }

        Ok(parsed.message.map(|m| m.content).unwrap_or_default())
    }

    async fn list_available_models(&self) -> Result<Vec<ModelInfo>, BridgeError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(CONNECTION_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| self.transport_error(e, "listing models"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::internal(format!(
                "Failed to list models: HTTP {}",
                status
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::internal_with("Failed to parse model list response", e))?;

        Ok(tags.models.into_iter().map(map_model).collect())
    }

    fn current_model(&self) -> Option<ModelInfo> {
        self.cached()
    }

    async fn ping(&self) -> bool {
        let request = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await;

        match request {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// True when a model satisfies a requested family.
fn matches_family(model: &ModelInfo, want: &str) -> bool {
    model.family.eq_ignore_ascii_case(want) || model.id.starts_with(want)
}

/// Pick a model for a family: exact match first, else any available.
fn choose_model(models: &[ModelInfo], want: &str) -> Option<ModelInfo> {
    models
        .iter()
        .find(|m| matches_family(m, want))
        .or_else(|| models.first())
        .cloned()
}

/// Map an Ollama tags entry into the bridge model descriptor.
///
/// The `details` object and the listing-level size/digest/timestamp all
/// land in `extra`; colliding keys are dropped by the descriptor itself.
fn map_model(tag: TagModel) -> ModelInfo {
    let family = tag
        .details
        .as_ref()
        .and_then(|d| d.get("family"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| base_name(&tag.name).to_string());

    let version = tag.name.split_once(':').map(|(_, v)| v.to_string());

    let mut extra = IndexMap::new();
    if let Some(Value::Object(details)) = tag.details {
        for (key, value) in details {
            extra.insert(key, value);
        }
    }
    if tag.size > 0 {
        extra.insert("size".to_string(), Value::from(tag.size));
    }
    if !tag.digest.is_empty() {
        extra.insert("digest".to_string(), Value::from(tag.digest));
    }
    if !tag.modified_at.is_empty() {
        extra.insert("modified_at".to_string(), Value::from(tag.modified_at));
    }

    let mut model = ModelInfo::new(
        tag.name.clone(),
        VENDOR,
        family,
        tag.name,
        DEFAULT_MAX_INPUT_TOKENS,
    )
    .with_extra(extra);

    if let Some(version) = version {
        model = model.with_version(version);
    }
    model
}

/// Model name up to the first tag separator.
fn base_name(name: &str) -> &str {
    name.split_once(':').map(|(base, _)| base).unwrap_or(name)
}
