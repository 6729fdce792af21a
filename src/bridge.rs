// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request-processing use cases.
//!
//! `process_chat` turns an untrusted parsed payload into a completed chat
//! envelope: structural validation, per-message domain validation, one
//! provider invocation, timing metadata. `list_models` maps the provider
//! catalog into the wire listing. Neither retries; failures propagate
//! directly to the HTTP layer.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::BridgeError;
use crate::provider::LanguageModelPort;
use crate::types::{ChatMessage, ModelInfo, RequestId};

/// Successful chat result as it goes on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct ChatEnvelope {
    pub id: String,
    pub model: ModelIdentity,
    pub output_text: String,
    pub meta: RequestTiming,
}

/// The vendor/family pair of the model that answered.
#[derive(Debug, Clone, Serialize)]
pub struct ModelIdentity {
    pub vendor: String,
    pub family: String,
}

/// Start/end timestamps of the request, ISO-8601 with millisecond
/// precision on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct RequestTiming {
    #[serde(rename = "startedAt", serialize_with = "rfc3339_millis")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "endedAt", serialize_with = "rfc3339_millis")]
    pub ended_at: DateTime<Utc>,
}

fn rfc3339_millis<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Wire shape of the model listing.
#[derive(Debug, Clone, Serialize)]
pub struct ModelsPayload {
    pub models: Vec<ModelInfo>,
    pub count: usize,
}

/// Process one chat request against the model port.
///
/// The payload is the parsed JSON body, still untrusted: `messages` must
/// be a non-empty array of role/content objects, and an optional
/// `model.family` string is passed through as the provider hint.
///
/// # Errors
///
/// `Validation` for payload-shape defects, `InvalidMessage` for
/// per-message defects, `Internal` when the provider answered but cannot
/// name its model, and whatever the port itself raises.
pub async fn process_chat(
    port: &dyn LanguageModelPort,
    payload: &Value,
) -> Result<ChatEnvelope, BridgeError> {
    let id = RequestId::generate();
    let started_at = Utc::now();

    let entries = payload
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| BridgeError::validation("messages array is required"))?;

    if entries.is_empty() {
        return Err(BridgeError::validation("messages array must not be empty"));
    }

    let mut messages = Vec::with_capacity(entries.len());
    for entry in entries {
        messages.push(to_domain_message(entry)?);
    }

    let family = payload
        .get("model")
        .and_then(|m| m.get("family"))
        .and_then(Value::as_str);

    tracing::info!(
        "Processing chat request {} ({} messages, family: {})",
        id,
        messages.len(),
        family.unwrap_or("default")
    );

    let output_text = port.send_request(&messages, family).await?;
    let ended_at = Utc::now();

    let model = port
        .current_model()
        .ok_or_else(|| BridgeError::internal("No model information available"))?;

    Ok(ChatEnvelope {
        id: id.to_string(),
        model: ModelIdentity {
            vendor: model.vendor,
            family: model.family,
        },
        output_text,
        meta: RequestTiming {
            started_at,
            ended_at,
        },
    })
}

/// Convert one request message entry into a validated domain message.
fn to_domain_message(entry: &Value) -> Result<ChatMessage, BridgeError> {
    let role = match entry.get("role") {
        Some(Value::String(role)) => role.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let content = entry.get("content").cloned().unwrap_or(Value::Null);
    ChatMessage::new(&role, &content)
}

/// Fetch and map all available models.
pub async fn list_models(port: &dyn LanguageModelPort) -> Result<ModelsPayload, BridgeError> {
    let models = port.list_available_models().await?;
    Ok(ModelsPayload {
        count: models.len(),
        models,
    })
}
