//! Static routing configuration.
//!
//! Loaded from an optional YAML file, then overridden by environment
//! variables:
//! - `ROUTED_TOPOLOGY`: `binomial`, `radix` or `direct`
//! - `ROUTED_RADIX`: fan-out of the radix tree (must be > 0)
//! - `ROUTED_ROUTING_ENABLED`: `false` degrades every route to direct delivery
//! - `ROUTED_STATIC_PORTS`: lifeline follows the parent instead of the root
//! - `ROUTED_STATIC_PARENT`: pre-assigned parent rank

use crate::Rank;
use crate::routing::TopologyKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_RADIX: u32 = 64;

/// Configuration consumed by the routing modules at start-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutedConfig {
    /// Force a topology; `None` selects by priority
    pub topology: Option<TopologyKind>,
    /// Fan-out of the radix tree
    pub radix: u32,
    /// Global switch; when false every route is direct
    pub routing_enabled: bool,
    /// Daemons were given static ports, so the parent is the lifeline
    pub static_ports: bool,
    /// Externally imposed parent, overriding the computed one
    pub static_parent: Option<Rank>,
}

impl Default for RoutedConfig {
    fn default() -> Self {
        Self {
            topology: None,
            radix: DEFAULT_RADIX,
            routing_enabled: true,
            static_ports: false,
            static_parent: None,
        }
    }
}

impl RoutedConfig {
    /// Reject values the routing modules cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.radix == 0 {
            return Err(ConfigError::InvalidRadix(self.radix));
        }
        if let Some(parent) = self.static_parent
            && !parent.is_valid()
        {
            return Err(ConfigError::InvalidValue {
                key: "static_parent".into(),
                value: parent.to_string(),
            });
        }
        Ok(())
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `ROUTED_*` overrides read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ROUTED_TOPOLOGY") {
            self.topology = Some(value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "ROUTED_TOPOLOGY".into(),
                value: value.clone(),
            })?);
        }
        if let Some(value) = lookup("ROUTED_RADIX") {
            self.radix = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "ROUTED_RADIX".into(),
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("ROUTED_ROUTING_ENABLED") {
            self.routing_enabled = parse_flag("ROUTED_ROUTING_ENABLED", &value)?;
        }
        if let Some(value) = lookup("ROUTED_STATIC_PORTS") {
            self.static_ports = parse_flag("ROUTED_STATIC_PORTS", &value)?;
        }
        if let Some(value) = lookup("ROUTED_STATIC_PARENT") {
            self.static_parent = Some(value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "ROUTED_STATIC_PARENT".into(),
                value: value.clone(),
            })?);
        }
        self.validate()?;
        Ok(self)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.into(),
            value: value.into(),
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("radix must be greater than zero, got {0}")]
    InvalidRadix(u32),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
