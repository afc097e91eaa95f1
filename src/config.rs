// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent settings, stored as JSON in `~/.dispsync/config.json`.
//!
//! Every field has a default, so a missing file or a partial one is fine.
//! Command-line flags are applied on top by the binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::sync::EngineOptions;
use crate::transfer::ManagerOptions;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SyncConfig {
    /// Base address prepended to identifiers starting with `/`
    #[serde(default = "default_server")]
    pub server: String,
    /// Flat directory holding every downloaded file
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Identifier of the index document
    #[serde(default = "default_index")]
    pub index: String,
    /// Parse this local file instead of the downloaded index
    #[serde(default)]
    pub index_override: Option<PathBuf>,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Pause before an unreachable transfer is tried again
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Pause before re-requesting an index that failed while nothing is adopted
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_abort_on_invalid_first_index")]
    pub abort_on_invalid_first_index: bool,
    /// Lines kept by each in-memory diagnostic buffer
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

fn default_server() -> String {
    "http://localhost:7859".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./dispFiles")
}

fn default_index() -> String {
    "/index.json".to_string()
}

fn default_tick_interval_ms() -> u64 {
    16
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_retry_interval_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    crate::transfer::transport::CONNECTION_TIMEOUT_SECS
}

fn default_abort_on_invalid_first_index() -> bool {
    true
}

fn default_log_capacity() -> usize {
    crate::diagnostics::DEFAULT_CAPACITY
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            cache_dir: default_cache_dir(),
            index: default_index(),
            index_override: None,
            tick_interval_ms: default_tick_interval_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_interval_secs: default_retry_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            abort_on_invalid_first_index: default_abort_on_invalid_first_index(),
            log_capacity: default_log_capacity(),
        }
    }
}

/// `~/.dispsync/config.json`
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".dispsync").join("config.json"))
}

impl SyncConfig {
    /// Load from the default location, or defaults if there is no file.
    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.server.starts_with("http://") || self.server.starts_with("https://")) {
            bail!("server must be an http:// or https:// address, got \"{}\"", self.server);
        }
        if self.index.is_empty() {
            bail!("index identifier must not be empty");
        }
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be at least 1");
        }
        if self.connect_timeout_secs == 0 {
            bail!("connect_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            index: self.index.clone(),
            index_override: self.index_override.clone(),
            retry_interval: Duration::from_secs(self.retry_interval_secs),
            abort_on_invalid_first_index: self.abort_on_invalid_first_index,
        }
    }
}
