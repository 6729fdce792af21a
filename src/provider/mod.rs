// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Chat-model provider port.
//!
//! The core talks to whatever serves completions through this trait and
//! nothing else. The adapter owns all provider policy: model selection,
//! the cached selected model, fallback between families. The core only
//! passes an optional family hint through and reads the result.

use async_trait::async_trait;

use crate::error::BridgeError;
use crate::types::{ChatMessage, ModelInfo};

pub mod ollama;

pub use ollama::OllamaProvider;

/// Capability interface consumed by the use cases.
#[async_trait]
pub trait LanguageModelPort: Send + Sync {
    /// Send the full ordered message list and return the complete buffered
    /// reply text. No partial delivery, no retries.
    async fn send_request(
        &self,
        messages: &[ChatMessage],
        family: Option<&str>,
    ) -> Result<String, BridgeError>;

    /// All models the provider currently offers.
    async fn list_available_models(&self) -> Result<Vec<ModelInfo>, BridgeError>;

    /// The model selected by an earlier send, if any.
    fn current_model(&self) -> Option<ModelInfo>;

    /// Cheap reachability probe for health reporting.
    async fn ping(&self) -> bool {
        true
    }
}
