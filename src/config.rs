// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bridge configuration.
//!
//! Configuration is an immutable snapshot fetched fresh for every request:
//! the HTTP layer takes one snapshot at the gate and every later stage of
//! that request reads from it, so a config edit mid-request can never mix
//! old and new values. Nothing is cached across requests.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 32123;

/// Default bind address (loopback only).
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Default model family hint passed to the provider.
pub const DEFAULT_MODEL_FAMILY: &str = "gpt-4o";

/// Default maximum request body size in bytes.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1_000_000;

/// Default provider endpoint (local Ollama).
pub const DEFAULT_PROVIDER_URL: &str = "http://localhost:11434";

/// One consistent view of the bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Port to listen on.
    pub port: u16,
    /// Address to bind to. Normalized to loopback at server start.
    pub bind_address: String,
    /// Bearer token required on every request. Empty disables auth.
    pub token: String,
    /// Model family requested when the caller does not name one.
    pub default_family: String,
    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
    /// Base URL of the chat-model provider.
    pub provider_url: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            token: String::new(),
            default_family: DEFAULT_MODEL_FAMILY.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            provider_url: DEFAULT_PROVIDER_URL.to_string(),
        }
    }
}

/// Source of configuration snapshots.
pub trait ConfigSource: Send + Sync {
    /// Produce a fresh, self-consistent snapshot.
    fn snapshot(&self) -> BridgeConfig;
}

/// A fixed config is its own source. Handy for tests and one-shot CLI
/// commands.
impl ConfigSource for BridgeConfig {
    fn snapshot(&self) -> BridgeConfig {
        self.clone()
    }
}

/// Command-line overrides layered onto every snapshot.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub token: Option<String>,
    pub default_family: Option<String>,
    pub max_body_bytes: Option<usize>,
    pub provider_url: Option<String>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut BridgeConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ref bind) = self.bind_address {
            config.bind_address = bind.clone();
        }
        if let Some(ref token) = self.token {
            config.token = token.clone();
        }
        if let Some(ref family) = self.default_family {
            config.default_family = family.clone();
        }
        if let Some(max) = self.max_body_bytes {
            config.max_body_bytes = max;
        }
        if let Some(ref url) = self.provider_url {
            config.provider_url = url.clone();
        }
    }
}

/// Config source backed by a TOML file, re-read on every snapshot.
///
/// A missing file or unreadable content falls back to defaults; partial
/// files fill the gaps with defaults. CLI overrides win over the file.
pub struct FileConfigSource {
    path: PathBuf,
    overrides: ConfigOverrides,
}

impl FileConfigSource {
    /// Source reading from an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            overrides: ConfigOverrides::default(),
        }
    }

    /// Source reading from the default per-user location.
    pub fn at_default_path() -> Self {
        Self::new(default_config_path())
    }

    /// Layer CLI overrides onto every snapshot.
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> BridgeConfig {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_) => return BridgeConfig::default(),
        };

        match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "Ignoring malformed config file {}: {}",
                    self.path.display(),
                    e
                );
                BridgeConfig::default()
            }
        }
    }
}

impl ConfigSource for FileConfigSource {
    fn snapshot(&self) -> BridgeConfig {
        let mut config = self.read_file();
        self.overrides.apply(&mut config);
        config
    }
}

/// Default location of the config file: `<user config dir>/lmbridge/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lmbridge")
        .join("config.toml")
}
