// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy for the bridge.
//!
//! A single tagged enum carries every failure the request pipeline can
//! produce. The HTTP layer matches on the variant to pick a status code;
//! callers that need to discriminate match on it directly instead of
//! downcasting.

use thiserror::Error;

/// Every error the bridge core can surface.
///
/// `Validation` and `InvalidMessage` are caller mistakes and map to 400.
/// `ModelUnavailable` and `Internal` indicate environment or provider
/// failure and map to 500.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed or missing caller input (bad payload shape, oversized body).
    #[error("{0}")]
    Validation(String),

    /// A chat message failed domain validation (role or content).
    #[error("{0}")]
    InvalidMessage(String),

    /// The provider reported no usable models.
    #[error("{0}")]
    ModelUnavailable(String),

    /// Anything unexpected, with the underlying cause preserved when known.
    #[error("{message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl BridgeError {
    /// Caller-input validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Domain-level message validation failure.
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage(message.into())
    }

    /// Provider has no models to offer.
    pub fn model_unavailable(message: impl Into<String>) -> Self {
        Self::ModelUnavailable(message.into())
    }

    /// Unexpected failure with no underlying cause.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Unexpected failure wrapping its cause.
    pub fn internal_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The human-readable message, regardless of variant.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// True for errors the caller can fix (4xx territory).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidMessage(_))
    }
}
