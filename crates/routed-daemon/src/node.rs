//! Per-daemon message loop.
//!
//! A `DaemonNode` owns its routing module and rollup coordinator and is the
//! only task that touches them. Everything arrives through one inbox:
//! - `DaemonCallback`: a child's merged rollup report
//! - `NodeRegexReport`: the node map, pushed by the parent
//! - `WarmupConnection`: a child announcing itself, answered with the map
//! - `Xcast`: a broadcast, relayed over the routing list
//! - `Routed`: a point-to-point message forwarded hop by hop

use anyhow::{Result, anyhow};
use rand::Rng;
use routed_core::protocol::{
    CallbackEnvelope, ContactInfo, DaemonReport, NodeMap, RoutedEnvelope, RoutedKind, Tag,
    XcastCommand, XcastEnvelope,
};
use routed_core::{
    ContactDirectory, EventBus, FleetRegistry, LaunchState, LaunchTracker, LifelineMonitor,
    LossVerdict, Rank, RollupAction, RollupCoordinator, RoutedError, RoutedEvent, RoutingModule,
    RuntimeFlags, Transport, TransportEvent,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Per-daemon settings.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub hostname: String,
    pub topology_signature: String,
    /// Wait for the node map from the parent before completing the rollup
    pub warmup: bool,
    /// Upper bound of a random delay before the self report
    pub jitter: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Left the loop on an `Exit` broadcast or a closed inbox
    Exited,
    /// Stopped on an unrecoverable error, e.g. lifeline loss
    Aborted { reason: String },
}

/// Root-side result of the launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSummary {
    pub state: LaunchState,
    pub reported: Vec<Rank>,
    pub missing: Vec<Rank>,
    pub hostnames: BTreeMap<Rank, String>,
    /// Hops each probe took to reach its daemon
    pub probe_hops: BTreeMap<Rank, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub rank: Rank,
    pub outcome: NodeOutcome,
    pub launch: Option<LaunchSummary>,
}

enum Flow {
    Continue,
    Exit,
}

pub struct DaemonNode {
    rank: Rank,
    router: Box<dyn RoutingModule>,
    rollup: RollupCoordinator,
    monitor: LifelineMonitor,
    transport: Arc<dyn Transport>,
    inbox: mpsc::UnboundedReceiver<TransportEvent>,
    registry: Arc<FleetRegistry>,
    contacts: Arc<ContactDirectory>,
    flags: RuntimeFlags,
    events: Arc<EventBus>,
    options: NodeOptions,
    node_map: Option<NodeMap>,
    pending_warmups: Vec<Rank>,
    /// Peers whose sends failed, handled as lost once the current event is done
    deferred_losses: Vec<Rank>,
    tracker: Option<LaunchTracker>,
    probes_outstanding: BTreeSet<Rank>,
    probe_hops: BTreeMap<Rank, u32>,
}

impl DaemonNode {
    /// Build a node. The root, and every daemon when warm-up is off, is
    /// handed the node map up front.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Box<dyn RoutingModule>,
        transport: Arc<dyn Transport>,
        inbox: mpsc::UnboundedReceiver<TransportEvent>,
        registry: Arc<FleetRegistry>,
        flags: RuntimeFlags,
        events: Arc<EventBus>,
        node_map: Option<NodeMap>,
        options: NodeOptions,
    ) -> Self {
        let rank = router.my_rank();
        let contacts = Arc::new(ContactDirectory::new());
        let rollup = RollupCoordinator::new(rank, Arc::clone(&contacts)).with_events(Arc::clone(&events));
        let tracker = rank.is_root().then(|| {
            let population = node_map.as_ref().map_or(1, |m| m.population);
            LaunchTracker::new(population).with_events(Arc::clone(&events))
        });
        Self {
            rank,
            router,
            rollup,
            monitor: LifelineMonitor::with_events(Arc::clone(&events)),
            transport,
            inbox,
            registry,
            contacts,
            flags,
            events,
            options,
            node_map,
            pending_warmups: Vec::new(),
            deferred_losses: Vec::new(),
            tracker,
            probes_outstanding: BTreeSet::new(),
            probe_hops: BTreeMap::new(),
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Run until told to exit or until a fatal error.
    pub async fn run(mut self) -> NodeReport {
        let outcome = match self.event_loop().await {
            Ok(()) => NodeOutcome::Exited,
            Err(e) => {
                error!("{} aborting: {}", self.rank, e);
                self.events.emit(RoutedEvent::LaunchFailed {
                    rank: self.rank,
                    reason: e.to_string(),
                });
                NodeOutcome::Aborted {
                    reason: e.to_string(),
                }
            }
        };
        self.flags.begin_finalize();
        if let Err(e) = self.router.finalize() {
            warn!("{} finalize failed: {}", self.rank, e);
        }
        NodeReport {
            rank: self.rank,
            outcome,
            launch: self.launch_summary(),
        }
    }

    async fn event_loop(&mut self) -> Result<()> {
        if let Flow::Exit = self.start().await? {
            return Ok(());
        }
        while let Some(event) = self.inbox.recv().await {
            let flow = match self.handle_event(event).await {
                Ok(flow) => flow,
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    warn!("{} dropped message: {}", self.rank, e);
                    Flow::Continue
                }
            };
            if let Flow::Exit = flow {
                return Ok(());
            }
            if let Flow::Exit = self.drain_deferred_losses().await? {
                return Ok(());
            }
        }
        debug!("{} inbox closed", self.rank);
        Ok(())
    }

    async fn start(&mut self) -> Result<Flow> {
        if let Some(map) = &self.node_map {
            self.registry.set_population(map.population);
            self.router.update_routing_plan(self.rank, map.population)?;
            self.emit_plan();
        }

        let actions = self.rollup.begin_phase(self.router.as_ref(), self.options.warmup)?;
        if let Flow::Exit = self.apply(actions).await? {
            return Ok(Flow::Exit);
        }

        let jitter = self.options.jitter.as_millis() as u64;
        if jitter > 0 {
            let delay = rand::rng().random_range(0..=jitter);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let contact = ContactInfo {
            uri: format!("loop://{}", self.rank),
        };
        let report = DaemonReport {
            rank: self.rank,
            hostname: self.options.hostname.clone(),
            contact: Some(contact.clone()),
            topology_signature: self.options.topology_signature.clone(),
        };
        let actions = self
            .rollup
            .on_self_report(self.router.as_ref(), report.to_bytes(), Some(contact))?;
        if let Flow::Exit = self.apply(actions).await? {
            return Ok(Flow::Exit);
        }
        self.drain_deferred_losses().await
    }

    async fn handle_event(&mut self, event: TransportEvent) -> Result<Flow> {
        match event {
            TransportEvent::Message { from, tag, bytes } => {
                debug!("{} <- {} {} ({} bytes)", self.rank, from, tag, bytes.len());
                match tag {
                    Tag::DaemonCallback => self.on_callback(from, &bytes).await,
                    Tag::NodeRegexReport => self.on_node_regex_report(&bytes).await,
                    Tag::WarmupConnection => self.on_warmup(from).await,
                    Tag::Xcast => self.on_xcast(&bytes).await,
                    Tag::Routed => self.on_routed(&bytes).await,
                }
            }
            TransportEvent::ConnectionLost { rank } => self.on_connection_lost(rank).await,
        }
    }

    // ==================== Rollup ====================

    async fn on_callback(&mut self, from: Rank, bytes: &[u8]) -> Result<Flow> {
        let envelope = CallbackEnvelope::from_bytes(bytes)?;
        let actions =
            self.rollup
                .on_child_report(self.router.as_ref(), from, envelope.payload, envelope.extra)?;
        self.apply(actions).await
    }

    async fn on_node_regex_report(&mut self, bytes: &[u8]) -> Result<Flow> {
        let actions = self.rollup.on_node_regex_report(self.router.as_mut(), bytes)?;
        self.emit_plan();
        if let Flow::Exit = self.apply(actions).await? {
            return Ok(Flow::Exit);
        }

        // losses seen before the plan existed could not prune anything
        let lost_children: Vec<Rank> = self
            .router
            .children()
            .iter()
            .map(|c| c.rank)
            .filter(|rank| self.router.state().is_lost(*rank))
            .collect();
        for child in lost_children {
            if let Flow::Exit = self.on_connection_lost(child).await? {
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    async fn on_warmup(&mut self, from: Rank) -> Result<Flow> {
        match self.node_map.as_ref().map(NodeMap::to_bytes) {
            Some(bytes) => self.send(from, Tag::NodeRegexReport, bytes).await,
            None => {
                debug!("{} deferring warm-up reply to {}", self.rank, from);
                self.pending_warmups.push(from);
            }
        }
        Ok(Flow::Continue)
    }

    async fn apply(&mut self, actions: Vec<RollupAction>) -> Result<Flow> {
        for action in actions {
            match action {
                RollupAction::SendWarmup { parent } => {
                    self.send(parent, Tag::WarmupConnection, Vec::new()).await;
                }
                RollupAction::Forward { parent, envelope } => {
                    self.send(parent, Tag::DaemonCallback, envelope.to_bytes()).await;
                    self.rollup.mark_forwarded();
                }
                RollupAction::PhaseComplete { payload } => {
                    if let Flow::Exit = self.on_launch_complete(&payload).await? {
                        return Ok(Flow::Exit);
                    }
                }
                RollupAction::SpawnChildren { children, node_map } => {
                    debug!("{} spawning {} children", self.rank, children.len());
                    self.registry.set_population(node_map.population);
                    let bytes = node_map.to_bytes();
                    self.node_map = Some(node_map);
                    for child in std::mem::take(&mut self.pending_warmups) {
                        self.send(child, Tag::NodeRegexReport, bytes.clone()).await;
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    // ==================== Launch completion (root) ====================

    async fn on_launch_complete(&mut self, payload: &[u8]) -> Result<Flow> {
        let tracker = self
            .tracker
            .as_mut()
            .ok_or_else(|| anyhow!("{} completed a rollup without a tracker", self.rank))?;
        let state = tracker.record_payload(payload, &self.contacts)?;
        info!(
            "launch {:?}: {} of {} daemons reported",
            state,
            tracker.num_reported(),
            tracker.num_reported() + tracker.missing().len()
        );

        let targets: Vec<Rank> = tracker
            .records()
            .map(|(rank, _)| *rank)
            .filter(|rank| !rank.is_root())
            .collect();
        for target in targets {
            self.probes_outstanding.insert(target);
            let envelope = RoutedEnvelope::new(self.rank, target, RoutedKind::Probe, Vec::new());
            self.send_routed(envelope).await?;
        }
        self.maybe_shutdown_fleet().await
    }

    /// Broadcast `Exit` once every probe came back.
    async fn maybe_shutdown_fleet(&mut self) -> Result<Flow> {
        if !self.probes_outstanding.is_empty() {
            return Ok(Flow::Continue);
        }
        let reported = self
            .tracker
            .as_ref()
            .is_some_and(|t| t.state() == LaunchState::DaemonsReported);
        if !reported {
            warn!("launch incomplete, ordering abnormal termination");
            self.flags.order_abnormal_termination();
        }
        self.flags.begin_finalize();
        self.xcast(XcastCommand::Exit).await;
        Ok(Flow::Exit)
    }

    // ==================== Broadcast ====================

    /// Originate a broadcast from this daemon.
    pub async fn xcast(&mut self, command: XcastCommand) {
        let envelope = XcastEnvelope {
            origin: self.rank,
            command,
            direct: self.rank.is_root() && self.flags.abnormal_termination_ordered(),
        };
        self.relay_xcast(&envelope).await;
    }

    async fn relay_xcast(&mut self, envelope: &XcastEnvelope) {
        let mut targets = Vec::new();
        self.router.get_routing_list(&mut targets);
        let bytes = envelope.to_bytes();
        for target in targets {
            self.send(target, Tag::Xcast, bytes.clone()).await;
        }
    }

    async fn on_xcast(&mut self, bytes: &[u8]) -> Result<Flow> {
        let envelope = XcastEnvelope::from_bytes(bytes)?;
        if !envelope.direct {
            self.relay_xcast(&envelope).await;
        }
        match envelope.command {
            XcastCommand::Announce(text) => {
                info!("{} announcement from {}: {}", self.rank, envelope.origin, text);
                Ok(Flow::Continue)
            }
            XcastCommand::Exit => {
                debug!("{} exiting on broadcast from {}", self.rank, envelope.origin);
                self.flags.begin_finalize();
                Ok(Flow::Exit)
            }
        }
    }

    // ==================== Routed messages ====================

    async fn on_routed(&mut self, bytes: &[u8]) -> Result<Flow> {
        let mut envelope = RoutedEnvelope::from_bytes(bytes)?;
        envelope.hops += 1;
        if envelope.dest != self.rank {
            self.send_routed(envelope).await?;
            return Ok(Flow::Continue);
        }

        match envelope.kind {
            RoutedKind::Probe => {
                let mut reply = RoutedEnvelope::new(
                    self.rank,
                    envelope.origin,
                    RoutedKind::ProbeReply,
                    envelope.hops.to_be_bytes().to_vec(),
                );
                reply.hops = 0;
                self.send_routed(reply).await?;
                Ok(Flow::Continue)
            }
            RoutedKind::ProbeReply => {
                let outbound = envelope
                    .body
                    .as_slice()
                    .try_into()
                    .map(u32::from_be_bytes)
                    .map_err(|_| RoutedError::Codec("probe reply without hop count".into()))?;
                debug!(
                    "{} probe to {} took {} hops out, {} back",
                    self.rank, envelope.origin, outbound, envelope.hops
                );
                self.probe_hops.insert(envelope.origin, outbound);
                self.probes_outstanding.remove(&envelope.origin);
                self.maybe_shutdown_fleet().await
            }
        }
    }

    /// Hand `envelope` to the next hop toward its destination.
    async fn send_routed(&mut self, envelope: RoutedEnvelope) -> Result<()> {
        let next = match self.router.get_route(envelope.dest) {
            Ok(next) => next,
            Err(RoutedError::NotFound(_)) => envelope.dest,
            Err(e) => return Err(e.into()),
        };
        self.send(next, Tag::Routed, envelope.to_bytes()).await;
        Ok(())
    }

    // ==================== Failures ====================

    async fn on_connection_lost(&mut self, lost: Rank) -> Result<Flow> {
        let verdict = self.monitor.on_connection_lost(self.router.as_mut(), lost)?;
        if let LossVerdict::Fatal { reason, .. } = &verdict {
            return Err(RoutedError::Fatal(reason.clone()).into());
        }
        if self.probes_outstanding.remove(&lost) {
            if let Flow::Exit = self.maybe_shutdown_fleet().await? {
                return Ok(Flow::Exit);
            }
        }
        let actions = self.rollup.on_route_lost(self.router.as_ref(), &verdict)?;
        self.apply(actions).await
    }

    async fn drain_deferred_losses(&mut self) -> Result<Flow> {
        while let Some(lost) = self.deferred_losses.pop() {
            if self.flags.is_finalizing() {
                continue;
            }
            if let Flow::Exit = self.on_connection_lost(lost).await? {
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    /// Send, turning a failure into a deferred route loss.
    async fn send(&mut self, dest: Rank, tag: Tag, bytes: Vec<u8>) {
        if let Err(e) = self.transport.send_tagged(dest, tag, bytes).await {
            if self.flags.is_finalizing() {
                debug!("{} -> {} {} failed during shutdown: {}", self.rank, dest, tag, e);
            } else {
                warn!("{} -> {} {} failed: {}", self.rank, dest, tag, e);
                self.deferred_losses.push(dest);
            }
        }
    }

    fn emit_plan(&self) {
        self.events.emit(RoutedEvent::PlanUpdated {
            rank: self.rank,
            parent: self.router.parent(),
            children: self.router.children().iter().map(|c| c.rank).collect(),
        });
    }

    fn launch_summary(&self) -> Option<LaunchSummary> {
        let tracker = self.tracker.as_ref()?;
        Some(LaunchSummary {
            state: tracker.state(),
            reported: tracker.records().map(|(rank, _)| *rank).collect(),
            missing: tracker.missing(),
            hostnames: tracker
                .records()
                .map(|(rank, record)| (*rank, record.hostname.clone()))
                .collect(),
            probe_hops: self.probe_hops.clone(),
        })
    }
}

fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RoutedError>()
        .is_some_and(RoutedError::is_fatal)
}
