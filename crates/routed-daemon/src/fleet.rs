//! Launch a simulated fleet of daemons as tokio tasks.

use crate::loopback::LoopbackHub;
use crate::node::{DaemonNode, LaunchSummary, NodeOptions, NodeOutcome, NodeReport};
use anyhow::{Context, Result, bail};
use routed_core::protocol::NodeMap;
use routed_core::routing::compute_plan;
use routed_core::{
    select_module, EventBus, FleetRegistry, LaunchState, Rank, RoutedConfig, RoutingState,
    RuntimeFlags, TopologyKind,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct FleetOptions {
    pub daemons: u32,
    pub config: RoutedConfig,
    /// Daemons get static parents and wait for the node map from them
    pub warmup: bool,
    /// Ranks that never start
    pub kill: Vec<Rank>,
    /// Upper bound of the random delay before each self report
    pub jitter: Duration,
    pub timeout: Duration,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            daemons: 4,
            config: RoutedConfig::default(),
            warmup: false,
            kill: Vec::new(),
            jitter: Duration::ZERO,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a fleet launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetReport {
    pub topology: TopologyKind,
    pub state: LaunchState,
    pub reported: Vec<Rank>,
    pub missing: Vec<Rank>,
    pub aborted: Vec<Rank>,
    pub hostnames: BTreeMap<Rank, String>,
    pub probe_hops: BTreeMap<Rank, u32>,
}

pub struct Fleet;

impl Fleet {
    /// Start every daemon, wait for the launch to finish and the fleet to
    /// shut down, and summarize what the root saw.
    pub async fn launch(options: FleetOptions, events: Arc<EventBus>) -> Result<FleetReport> {
        options.config.validate()?;
        if options.daemons == 0 {
            bail!("a fleet needs at least one daemon");
        }
        let killed: BTreeSet<Rank> = options.kill.iter().copied().collect();
        if killed.contains(&Rank::ROOT) {
            bail!("the root cannot be killed");
        }
        if let Some(rank) = killed.iter().find(|r| r.as_u32() >= options.daemons) {
            bail!("cannot kill rank {} in a fleet of {}", rank, options.daemons);
        }

        let population = options.daemons;
        let topology = options
            .config
            .topology
            .unwrap_or_else(TopologyKind::highest_priority);
        let node_map = NodeMap::uniform(population, "node");
        let hub = LoopbackHub::new();

        info!(
            "launching {} daemons over a {} tree ({} killed, warm-up {})",
            population,
            topology,
            killed.len(),
            options.warmup
        );

        let mut nodes = Vec::new();
        for r in 0..population {
            let rank = Rank::new(r);
            let (transport, inbox) = hub.register(rank);
            if killed.contains(&rank) {
                continue;
            }

            let mut config = options.config.clone();
            config.topology = Some(topology);
            let knows_map = rank.is_root() || !options.warmup;
            if !knows_map {
                config.static_ports = true;
                config.static_parent = compute_plan(topology, rank, population, config.radix)?.parent;
            }

            let registry = Arc::new(FleetRegistry::new(if knows_map { population } else { 0 }));
            let flags = RuntimeFlags::default();
            let state = RoutingState::new(rank, config, registry.clone(), flags.clone());
            let router = select_module(state).with_context(|| format!("rank {}", rank))?;

            let node_options = NodeOptions {
                hostname: node_map.hostname(rank).unwrap_or_default().to_string(),
                topology_signature: format!("{}c", 2 + r % 3),
                warmup: !knows_map,
                jitter: options.jitter,
            };
            nodes.push(DaemonNode::new(
                router,
                Arc::new(transport),
                inbox,
                registry,
                flags,
                Arc::clone(&events),
                knows_map.then(|| node_map.clone()),
                node_options,
            ));
        }

        for rank in &killed {
            warn!("rank {} never starts", rank);
            hub.sever(*rank);
        }

        let handles: Vec<_> = nodes
            .into_iter()
            .map(|node| {
                let hub = hub.clone();
                tokio::spawn(async move {
                    let rank = node.rank();
                    let report = node.run().await;
                    if let NodeOutcome::Aborted { .. } = report.outcome {
                        hub.sever(rank);
                    }
                    report
                })
            })
            .collect();

        let results = tokio::time::timeout(options.timeout, futures::future::join_all(handles))
            .await
            .with_context(|| format!("fleet did not shut down within {:?}", options.timeout))?;

        let mut reports: Vec<NodeReport> = Vec::with_capacity(results.len());
        for result in results {
            reports.push(result.context("daemon task panicked")?);
        }

        let aborted = reports
            .iter()
            .filter(|r| matches!(r.outcome, NodeOutcome::Aborted { .. }))
            .map(|r| r.rank)
            .collect();
        let summary: LaunchSummary = reports
            .into_iter()
            .find_map(|r| r.launch)
            .context("root finished without a launch summary")?;

        Ok(FleetReport {
            topology,
            state: summary.state,
            reported: summary.reported,
            missing: summary.missing,
            aborted,
            hostnames: summary.hostnames,
            probe_hops: summary.probe_hops,
        })
    }
}
