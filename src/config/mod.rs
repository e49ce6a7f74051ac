//! Configuration module for relay-dispatch
//!
//! This module handles:
//! - The dispatch configuration file (`dispatch.toml`, or `.json`)
//! - Process-wide runtime [`Settings`] seeded from that file
//!
//! # Config Location
//!
//! The default configuration file lives in the platform config directory
//! under `relay-dispatch/dispatch.toml`:
//! - **Linux**: `~/.config/relay-dispatch/`
//! - **macOS**: `~/Library/Application Support/relay-dispatch/`
//! - **Windows**: `%APPDATA%\relay-dispatch\`
//!
//! # Example
//!
//! ```toml
//! enable_log_warnings = true
//! log_filter = "info,relay_dispatch=debug"
//!
//! [threads]
//! background = "dispatch-background"
//! io = "dispatch-io"
//! ```

pub mod settings;

pub use settings::*;

use crate::context::DefaultContextFactory;
use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Application identifier for config directories
pub const APP_ID: &str = "relay-dispatch";

/// Config filename
pub const CONFIG_FILE: &str = "dispatch.toml";

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Get the default configuration file path
pub fn default_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Thread names for the shared run loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadNames {
    pub background: String,
    pub background_secondary: String,
    pub network: String,
    pub io: String,
    pub main: String,
}

impl Default for ThreadNames {
    fn default() -> Self {
        Self {
            background: "dispatch-background".to_string(),
            background_secondary: "dispatch-background-secondary".to_string(),
            network: "dispatch-network".to_string(),
            io: "dispatch-io".to_string(),
            main: "dispatch-main".to_string(),
        }
    }
}

/// Serialized dispatch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Warn when a pipeline starts without a controller
    pub enable_log_warnings: bool,

    /// Default `tracing` filter directive
    pub log_filter: String,

    /// Names of the shared run loop threads
    pub threads: ThreadNames,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enable_log_warnings: true,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            threads: ThreadNames::default(),
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

impl DispatchConfig {
    /// Load a config file. `.json` files are parsed as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        if is_json(path) {
            serde_json::from_str(&content)
                .map_err(|e| DispatchError::Config(format!("Failed to parse config: {}", e)))
        } else {
            toml::from_str(&content)
                .map_err(|e| DispatchError::Config(format!("Failed to parse config: {}", e)))
        }
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load dispatch config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| DispatchError::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| DispatchError::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content)
            .map_err(|e| DispatchError::Config(format!("Failed to write config: {}", e)))
    }

    /// Build runtime settings from this config
    pub fn into_settings(self) -> Settings {
        Settings {
            enable_log_warnings: self.enable_log_warnings,
            context_factory: Arc::new(DefaultContextFactory::new(self.threads)),
            ..Settings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DispatchConfig = toml::from_str(
            r#"
            enable_log_warnings = false

            [threads]
            io = "disk"
            "#,
        )
        .unwrap();

        assert!(!config.enable_log_warnings);
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
        assert_eq!(config.threads.io, "disk");
        assert_eq!(config.threads.network, "dispatch-network");
    }

    #[test]
    fn test_default_path_ends_with_config_file() {
        if let Some(path) = default_path() {
            assert!(path.ends_with(Path::new(APP_ID).join(CONFIG_FILE)));
        }
    }

    #[test]
    fn test_into_settings_carries_warning_switch() {
        let config = DispatchConfig {
            enable_log_warnings: false,
            ..DispatchConfig::default()
        };
        assert!(!config.into_settings().enable_log_warnings);
    }
}
