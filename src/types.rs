// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Canonical domain types used across lmbridge.
//!
//! Everything here is a validated, immutable value: messages fail at
//! construction rather than at use, model descriptors never let vendor
//! extras shadow their fixed fields, and request ids are generated once
//! and only read afterwards.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

/// The role of a chat message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Parse a role string, rejecting anything outside the allowed set.
    pub fn parse(role: &str) -> Result<Self, BridgeError> {
        match role {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(BridgeError::invalid_message(format!(
                "Invalid message role: '{}'. Must be one of: system, user, assistant",
                other
            ))),
        }
    }

    /// String form as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A validated chat message.
///
/// Validation order is fixed: role first, then content. Content must be a
/// JSON string and non-empty after trimming; the trimmed form is what gets
/// stored and sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    role: Role,
    content: String,
}

impl ChatMessage {
    /// Build a message from untrusted request parts.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::InvalidMessage` naming the offending role, or
    /// describing the content defect ("must be a string" before "cannot be
    /// empty").
    pub fn new(role: &str, content: &Value) -> Result<Self, BridgeError> {
        let role = Role::parse(role)?;

        let text = content
            .as_str()
            .ok_or_else(|| BridgeError::invalid_message("Message content must be a string"))?;

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(BridgeError::invalid_message("Message content cannot be empty"));
        }

        Ok(Self {
            role,
            content: trimmed.to_string(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Fixed field names of the serialized model shape. Vendor extras under
/// these keys are dropped so they can never shadow the fixed fields.
const MODEL_FIXED_KEYS: [&str; 6] = ["id", "vendor", "family", "name", "maxInputTokens", "version"];

/// Descriptor for a provider model.
///
/// Vendor-supplied extra properties are flattened into the serialized
/// shape alongside the fixed fields, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub vendor: String,
    pub family: String,
    pub name: String,
    #[serde(rename = "maxInputTokens")]
    pub max_input_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl ModelInfo {
    /// Create a descriptor with no extra properties.
    pub fn new(
        id: impl Into<String>,
        vendor: impl Into<String>,
        family: impl Into<String>,
        name: impl Into<String>,
        max_input_tokens: u32,
    ) -> Self {
        Self {
            id: id.into(),
            vendor: vendor.into(),
            family: family.into(),
            name: name.into(),
            max_input_tokens,
            version: None,
            extra: IndexMap::new(),
        }
    }

    /// Set the optional version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Attach vendor extras, dropping any key that collides with a fixed
    /// field name.
    pub fn with_extra(mut self, extra: IndexMap<String, Value>) -> Self {
        self.extra = extra
            .into_iter()
            .filter(|(key, _)| !MODEL_FIXED_KEYS.contains(&key.as_str()))
            .collect();
        self
    }
}

/// Literal prefix for externally visible request ids.
const REQUEST_ID_PREFIX: &str = "req_";

/// Opaque per-request correlation token: `req_` followed by a UUIDv4 in
/// canonical lowercase hyphenated form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh id. Unique per process with overwhelming
    /// probability.
    pub fn generate() -> Self {
        Self(format!("{}{}", REQUEST_ID_PREFIX, uuid_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generate a random UUID v4 in canonical 8-4-4-4-12 form.
fn uuid_v4() -> String {
    use rand::Rng;

    let mut rng = rand::thread_rng();

    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);

    // Set version (4) and variant (RFC 4122) bits
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5], bytes[6], bytes[7],
        bytes[8], bytes[9], bytes[10], bytes[11],
        bytes[12], bytes[13], bytes[14], bytes[15]
    )
}
