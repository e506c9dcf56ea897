//! Configuration loading and persistence.
//!
//! Handles reading and writing the hubnotify configuration file.
//! The bearer token is stored in the OS keyring via the keyring module,
//! never in this file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{fs, path::PathBuf};

use crate::constants;
use crate::render::MarkupPolicy;
use crate::session::DuplicatePolicy;

/// Configuration for the hubnotify client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// REST API origin (notifications, invitations, sign-in).
    pub api_url: String,
    /// Push hub endpoint.
    pub hub_url: String,
    /// Per-request timeout in seconds for REST calls and hub negotiation.
    pub request_timeout_secs: u64,
    /// Drop pushed notifications whose related id is already in the feed.
    pub dedupe_related_id: bool,
    /// How message markup is rendered.
    pub render_markup: MarkupPolicy,
    /// Connect the hub WebSocket directly without negotiating.
    pub skip_negotiation: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: constants::DEFAULT_API_URL.to_string(),
            hub_url: constants::DEFAULT_HUB_URL.to_string(),
            request_timeout_secs: constants::HTTP_REQUEST_TIMEOUT.as_secs(),
            dedupe_related_id: false,
            render_markup: MarkupPolicy::default(),
            skip_negotiation: false,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `HUBNOTIFY_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("HUBNOTIFY_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("hubnotify")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_stored();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads the file as written, without environment overrides. Used when
    /// editing so overrides are never persisted.
    pub fn load_stored() -> Self {
        Self::load_from_file().unwrap_or_else(|e| {
            log::debug!("Using default config: {}", e);
            Self::default()
        })
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            anyhow::bail!("Config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(api_url) = std::env::var("HUBNOTIFY_API_URL") {
            self.api_url = api_url;
        }

        if let Ok(hub_url) = std::env::var("HUBNOTIFY_HUB_URL") {
            self.hub_url = hub_url;
        }

        if let Ok(timeout) = std::env::var("HUBNOTIFY_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.request_timeout_secs = secs;
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Duplicate handling for pushed notifications.
    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        if self.dedupe_related_id {
            DuplicatePolicy::SkipKnownRelatedId
        } else {
            DuplicatePolicy::KeepAll
        }
    }

    /// Set a single field by its config-file key.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "api_url" => self.api_url = value.trim_end_matches('/').to_string(),
            "hub_url" => self.hub_url = value.to_string(),
            "request_timeout_secs" => {
                self.request_timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout: {value}"))?;
            }
            "dedupe_related_id" => {
                self.dedupe_related_id = value
                    .parse()
                    .with_context(|| format!("Expected true or false, got {value}"))?;
            }
            "render_markup" => {
                self.render_markup = value.parse()?;
            }
            "skip_negotiation" => {
                self.skip_negotiation = value
                    .parse()
                    .with_context(|| format!("Expected true or false, got {value}"))?;
            }
            _ => anyhow::bail!("Unknown config key: {key}"),
        }
        Ok(())
    }

    /// Read a single field by its config-file key.
    pub fn get_value(&self, key: &str) -> Option<String> {
        match key {
            "api_url" => Some(self.api_url.clone()),
            "hub_url" => Some(self.hub_url.clone()),
            "request_timeout_secs" => Some(self.request_timeout_secs.to_string()),
            "dedupe_related_id" => Some(self.dedupe_related_id.to_string()),
            "render_markup" => Some(self.render_markup.to_string()),
            "skip_negotiation" => Some(self.skip_negotiation.to_string()),
            _ => None,
        }
    }
}
