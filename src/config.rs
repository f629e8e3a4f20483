//! attrgraph Configuration Module
//!
//! Run defaults for the CLI and embedders.
//! Config is stored in `~/.config/attrgraph/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`ATTRGRAPH_MAX_DEPTH`, `ATTRGRAPH_BATCHING`,
//!    `ATTRGRAPH_PLAN_CACHE`)
//! 2. Config file (`~/.config/attrgraph/config.toml`)
//! 3. Defaults

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GraphError, Result};
use crate::plan::{PlanCache, DEFAULT_MAX_NESTED_DEPTH};
use crate::runtime::{PathChooser, PlannedOrder, PriorityChooser, RunConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Execution knobs
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

/// Runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSettings {
    /// Cap on nested join recursion (default 8)
    pub max_nested_depth: Option<usize>,

    /// Coordinate batch resolvers across collections (default true)
    pub batching: Option<bool>,

    /// Reuse plans across runs and collection elements (default true)
    pub plan_cache: Option<bool>,

    /// OR branch ordering: "priority" (default) or "planned"
    pub chooser: Option<String>,
}

impl Settings {
    /// Get the config directory path
    ///
    /// Returns `~/.config/attrgraph/` on Unix, `%APPDATA%/attrgraph/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("attrgraph")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from the default path
    ///
    /// Returns default settings if the file doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`
    ///
    /// Returns error if the file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| GraphError::ConfigError {
            reason: format!("Failed to read config file: {}", e),
        })?;

        toml::from_str(&content).map_err(|e| GraphError::ConfigError {
            reason: format!("Failed to parse config file: {}", e),
        })
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| GraphError::ConfigError {
                    reason: format!("Failed to create config directory: {}", e),
                })?;
            }
        }

        let content = toml::to_string_pretty(self).map_err(|e| GraphError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| GraphError::ConfigError {
            reason: format!("Failed to write config file: {}", e),
        })?;

        Ok(())
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    /// Unparsable values are ignored with a warning.
    pub fn with_env(mut self) -> Self {
        if let Some(depth) = env_value("ATTRGRAPH_MAX_DEPTH", |v| v.parse::<usize>().ok()) {
            self.runtime.max_nested_depth = Some(depth);
        }
        if let Some(batching) = env_value("ATTRGRAPH_BATCHING", parse_flag) {
            self.runtime.batching = Some(batching);
        }
        if let Some(cache) = env_value("ATTRGRAPH_PLAN_CACHE", parse_flag) {
            self.runtime.plan_cache = Some(cache);
        }
        self
    }

    pub fn max_nested_depth(&self) -> usize {
        self.runtime
            .max_nested_depth
            .unwrap_or(DEFAULT_MAX_NESTED_DEPTH)
    }

    pub fn batching(&self) -> bool {
        self.runtime.batching.unwrap_or(true)
    }

    pub fn plan_cache(&self) -> bool {
        self.runtime.plan_cache.unwrap_or(true)
    }

    /// Build the run configuration these settings describe
    pub fn to_run_config(&self) -> Result<RunConfig> {
        let chooser: Arc<dyn PathChooser> = match self.runtime.chooser.as_deref() {
            None | Some("priority") => Arc::new(PriorityChooser),
            Some("planned") => Arc::new(PlannedOrder),
            Some(other) => {
                return Err(GraphError::ConfigError {
                    reason: format!(
                        "Unknown chooser '{}' (expected 'priority' or 'planned')",
                        other
                    ),
                })
            }
        };
        if self.max_nested_depth() == 0 {
            return Err(GraphError::ConfigError {
                reason: "max_nested_depth must be at least 1".to_string(),
            });
        }

        Ok(RunConfig::default()
            .with_chooser(chooser)
            .with_max_nested_depth(self.max_nested_depth())
            .with_batching(self.batching())
            .with_plan_cache(self.plan_cache().then(|| Arc::new(PlanCache::new()))))
    }
}

fn env_value<T>(name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let raw = std::env::var(name).ok().filter(|v| !v.is_empty())?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!(var = name, value = %raw, "ignoring unparsable environment override");
    }
    parsed
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
