//! Resolve the routing configuration for a run.
//!
//! Precedence, lowest first: defaults, YAML file, `ROUTED_*` environment,
//! command-line flags.

use anyhow::{Context, Result};
use routed_core::{RoutedConfig, TopologyKind};
use std::path::Path;

/// Values given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub topology: Option<TopologyKind>,
    pub radix: Option<u32>,
    pub no_routing: bool,
}

pub fn resolve_config<F>(
    file: Option<&Path>,
    lookup: F,
    overrides: &CliOverrides,
) -> Result<RoutedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let base = match file {
        Some(path) => RoutedConfig::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RoutedConfig::default(),
    };
    let mut config = base
        .with_env_overrides(lookup)
        .context("applying ROUTED_* environment")?;

    if let Some(topology) = overrides.topology {
        config.topology = Some(topology);
    }
    if let Some(radix) = overrides.radix {
        config.radix = radix;
    }
    if overrides.no_routing {
        config.routing_enabled = false;
    }
    config.validate()?;
    Ok(config)
}
