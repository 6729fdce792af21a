// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! lmbridge - Loopback-only HTTP bridge for local chat models
//!
//! lmbridge exposes a small JSON API on localhost and forwards chat
//! requests to a local model provider. Everything rides on one pipeline:
//! trust-boundary checks, bounded body reads, domain validation, a single
//! provider call, and a stable error-to-status mapping.
//!
//! # Core Modules
//!
//! - [`security`] - Localhost check, bearer auth, size-limited body reads
//! - [`types`] - Validated messages, model descriptors, request ids
//! - [`bridge`] - The chat and model-listing use cases
//! - [`provider`] - The model port and its Ollama adapter
//! - [`server`] - HTTP dispatch and server lifecycle
//! - [`config`] - Per-request configuration snapshots
//! - [`error`] - The bridge error taxonomy

pub mod bridge;
pub mod config;
pub mod error;
pub mod provider;
pub mod security;
pub mod server;
pub mod types;

// Re-export the domain types
pub use types::{ChatMessage, ModelInfo, RequestId, Role};

// Re-export the error taxonomy
pub use error::BridgeError;

// Re-export the use cases and their wire shapes
pub use bridge::{list_models, process_chat, ChatEnvelope, ModelIdentity, ModelsPayload, RequestTiming};

// Re-export configuration
pub use config::{BridgeConfig, ConfigOverrides, ConfigSource, FileConfigSource};

// Re-export the provider port and adapter
pub use provider::{LanguageModelPort, OllamaProvider};

// Re-export validation primitives
pub use security::{is_localhost, read_body_with_limit, validate_bearer_token};

// Re-export the server
pub use server::{build_router, AppState, BridgeServer};
