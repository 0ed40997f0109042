//! Configuration management for MedChat
//!
//! This module provides configuration loading, saving and validation.
//! Configuration is loaded from `~/.medchat/config.json` with environment variable overrides.

mod types;

pub use types::*;

use crate::error::{MedchatError, Result};
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the MedChat configuration directory path (~/.medchat)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".medchat")
    }

    /// Returns the path to the config file (~/.medchat/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// Environment variables can override config values using the pattern:
    /// `MEDCHAT_SECTION_KEY`
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: MEDCHAT_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        // Backend
        if let Ok(val) = std::env::var("MEDCHAT_BACKEND_API_KEY") {
            self.backend.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("MEDCHAT_BACKEND_API_BASE") {
            self.backend.api_base = val;
        }
        if let Ok(val) = std::env::var("MEDCHAT_BACKEND_MODEL") {
            self.backend.model = val;
        }
        if let Ok(val) = std::env::var("MEDCHAT_BACKEND_CONNECT_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.backend.connect_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("MEDCHAT_BACKEND_READ_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.backend.read_timeout_secs = v;
            }
        }

        // Agent
        if let Ok(val) = std::env::var("MEDCHAT_AGENT_MAX_STEPS") {
            if let Ok(v) = val.parse() {
                self.agent.max_steps = v;
            }
        }
        if let Ok(val) = std::env::var("MEDCHAT_AGENT_MAX_TOKENS") {
            if let Ok(v) = val.parse() {
                self.agent.max_tokens = v;
            }
        }
        if let Ok(val) = std::env::var("MEDCHAT_AGENT_TEMPERATURE") {
            if let Ok(v) = val.parse() {
                self.agent.temperature = v;
            }
        }

        // Summary
        if let Ok(val) = std::env::var("MEDCHAT_SUMMARY_MODEL") {
            self.summary.model = val;
        }

        // Storage & logging
        if let Ok(val) = std::env::var("MEDCHAT_STORAGE_PATH") {
            self.storage.path = Some(val);
        }
        if let Ok(val) = std::env::var("MEDCHAT_LOGGING_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The configured API key, if it is present and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.backend
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Returns the expanded snapshot path (resolves ~ to home directory)
    pub fn storage_path(&self) -> Option<PathBuf> {
        self.storage.path.as_deref().map(expand_home)
    }

    /// Check the limits that would otherwise fail at request time.
    ///
    /// A missing API key is not an error here: the orchestrator answers with
    /// a fixed message instead, so the process can still start.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.agent.max_steps == 0 {
            problems.push("agent.max_steps must be at least 1".to_string());
        }
        if self.agent.max_payload_bytes == 0 {
            problems.push("agent.max_payload_bytes must be positive".to_string());
        }
        if self.summary.conversation_ttl_mins <= 0 || self.summary.global_ttl_mins <= 0 {
            problems.push("summary TTLs must be positive".to_string());
        }
        if self.images.min_quality == 0 || self.images.min_quality > self.images.high_quality {
            problems.push("images.min_quality must be in 1..=high_quality".to_string());
        }
        if self.images.high_quality > 100 {
            problems.push("images.high_quality must be at most 100".to_string());
        }

        let presets = [
            ("primary", &self.images.primary),
            ("fallback", &self.images.fallback),
            ("ultra_compact", &self.images.ultra_compact),
        ];
        for pair in presets.windows(2) {
            let (larger_name, larger) = pair[0];
            let (smaller_name, smaller) = pair[1];
            if !smaller.fits_within(larger) {
                problems.push(format!(
                    "images.{} must not exceed images.{}",
                    smaller_name, larger_name
                ));
            }
        }
        for (name, preset) in presets {
            if preset.max_images == 0 || preset.max_bytes == 0 || preset.max_megapixels <= 0.0 {
                problems.push(format!("images.{} limits must be positive", name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(MedchatError::Config(problems.join("; ")))
        }
    }
}

/// Expand ~ to home directory in a path string
fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
