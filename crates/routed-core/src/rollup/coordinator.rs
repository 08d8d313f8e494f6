//! Rollup coordinator: merges the reports of a daemon's subtree and
//! forwards one payload to the parent.
//!
//! Driven entirely by inbound-message callbacks. Every entry point returns
//! the [`RollupAction`]s the caller must carry out (sends, completion,
//! spawning), so the coordinator itself never touches the network.

use crate::bitmap::Bitmap;
use crate::contacts::ContactDirectory;
use crate::error::{Result, RoutedError};
use crate::events::{EventBus, RoutedEvent};
use crate::lifeline::LossVerdict;
use crate::protocol::{CallbackEnvelope, ContactInfo, NodeMap};
use crate::routing::RoutingModule;
use crate::Rank;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupPhase {
    Idle,
    Collecting,
    Forwarding,
    Done,
}

/// Work the caller must perform on behalf of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollupAction {
    /// Open the connection to the parent ahead of time
    SendWarmup { parent: Rank },
    /// Send the merged subtree report to the parent
    Forward {
        parent: Rank,
        envelope: CallbackEnvelope,
    },
    /// The root holds every report
    PhaseComplete { payload: Vec<u8> },
    /// The node map is known; start the daemons below us
    SpawnChildren { children: Vec<Rank>, node_map: NodeMap },
}

pub struct RollupCoordinator {
    my_rank: Rank,
    phase: RollupPhase,
    self_payload: Option<Vec<u8>>,
    self_extra: Option<ContactInfo>,
    /// Child payloads in arrival order, each kept whole
    child_payloads: Vec<(Rank, Vec<u8>)>,
    /// Self and every accepted child
    reporters: Bitmap,
    /// Reports that arrived before the plan was final
    held: Vec<(Rank, Vec<u8>, Option<ContactInfo>)>,
    expected: usize,
    warmup_pending: bool,
    contacts: Arc<ContactDirectory>,
    events: Option<Arc<EventBus>>,
}

impl RollupCoordinator {
    pub fn new(my_rank: Rank, contacts: Arc<ContactDirectory>) -> Self {
        Self {
            my_rank,
            phase: RollupPhase::Idle,
            self_payload: None,
            self_extra: None,
            child_payloads: Vec::new(),
            reporters: Bitmap::new(),
            held: Vec::new(),
            expected: 0,
            warmup_pending: false,
            contacts,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn phase(&self) -> RollupPhase {
        self.phase
    }

    /// Distinct reporters counted so far, self included.
    pub fn received(&self) -> usize {
        self.reporters.count_ones()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn warmup_pending(&self) -> bool {
        self.warmup_pending
    }

    /// Reports waiting for the node map.
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Start a report phase.
    ///
    /// With `warmup`, a non-root daemon holds completion until the node map
    /// arrives from its parent, and asks the caller to open that connection.
    pub fn begin_phase(
        &mut self,
        router: &dyn RoutingModule,
        warmup: bool,
    ) -> Result<Vec<RollupAction>> {
        if self.phase == RollupPhase::Collecting || self.phase == RollupPhase::Forwarding {
            return Err(RoutedError::ResourceBusy(format!(
                "rollup phase already in progress on {}",
                self.my_rank
            )));
        }

        self.phase = RollupPhase::Collecting;
        self.self_payload = None;
        self.self_extra = None;
        self.child_payloads.clear();
        self.reporters.clear_all();
        self.held.clear();
        self.expected = router.num_routes() + 1;
        self.warmup_pending = warmup && !self.my_rank.is_root();

        let mut actions = Vec::new();
        if self.warmup_pending {
            let parent = router.parent().ok_or_else(|| {
                RoutedError::BadParam(format!(
                    "{} cannot warm up without a known parent",
                    self.my_rank
                ))
            })?;
            actions.push(RollupAction::SendWarmup { parent });
        }
        debug!(
            "{} rollup phase started, expecting {} reports",
            self.my_rank, self.expected
        );
        Ok(actions)
    }

    /// This daemon's own contribution.
    pub fn on_self_report(
        &mut self,
        router: &dyn RoutingModule,
        payload: Vec<u8>,
        extra: Option<ContactInfo>,
    ) -> Result<Vec<RollupAction>> {
        self.on_child_report(router, self.my_rank, payload, extra)
    }

    /// A report from `sender`; `sender == my_rank` is the self report.
    pub fn on_child_report(
        &mut self,
        router: &dyn RoutingModule,
        sender: Rank,
        payload: Vec<u8>,
        extra: Option<ContactInfo>,
    ) -> Result<Vec<RollupAction>> {
        if !sender.is_valid() {
            return Err(RoutedError::bad_rank("report sender", sender));
        }
        if self.phase != RollupPhase::Collecting {
            return Err(RoutedError::BadParam(format!(
                "{} got a report from {} outside a collecting phase",
                self.my_rank, sender
            )));
        }
        if self.reporters.is_set(sender.index()) || self.held.iter().any(|(r, _, _)| *r == sender) {
            return Err(RoutedError::Duplicate(sender));
        }
        let is_self = sender == self.my_rank;
        if !is_self && self.warmup_pending {
            debug!(
                "{} holding report from {} until the node map arrives",
                self.my_rank, sender
            );
            self.held.push((sender, payload, extra));
            return Ok(Vec::new());
        }
        if !is_self && !is_child(router, sender) {
            return Err(RoutedError::BadParam(format!(
                "{} is not a child of {}",
                sender, self.my_rank
            )));
        }

        self.accept(sender, payload, extra)?;
        self.check_complete(router)
    }

    fn accept(&mut self, sender: Rank, payload: Vec<u8>, extra: Option<ContactInfo>) -> Result<()> {
        self.reporters.set_bit(sender.index())?;
        if let Some(info) = extra.clone() {
            self.contacts.import(sender, info)?;
        }

        let size = payload.len();
        if sender == self.my_rank {
            self.self_payload = Some(payload);
            self.self_extra = extra;
        } else {
            self.child_payloads.push((sender, payload));
        }
        debug!(
            "{} report from {} ({} bytes), {}/{}",
            self.my_rank,
            sender,
            size,
            self.received(),
            self.expected
        );
        self.emit(RoutedEvent::ReportReceived {
            rank: self.my_rank,
            from: sender,
            size,
        });
        Ok(())
    }

    /// Node map from the parent: replan, release the warm-up hold,
    /// re-check completion, then spawn the children.
    pub fn on_node_regex_report(
        &mut self,
        router: &mut dyn RoutingModule,
        payload: &[u8],
    ) -> Result<Vec<RollupAction>> {
        let node_map = NodeMap::from_bytes(payload)?;
        router.update_routing_plan(self.my_rank, node_map.population)?;

        self.warmup_pending = false;

        for (sender, payload, extra) in std::mem::take(&mut self.held) {
            if self.phase != RollupPhase::Collecting || !is_child(&*router, sender) {
                warn!("{} dropping report from non-child {}", self.my_rank, sender);
                continue;
            }
            self.accept(sender, payload, extra)?;
        }
        let mut actions = self.check_complete(&*router)?;
        actions.push(RollupAction::SpawnChildren {
            children: router.children().iter().map(|c| c.rank).collect(),
            node_map,
        });
        Ok(actions)
    }

    /// Stop waiting for a pruned child. A child that already reported
    /// keeps its contribution.
    pub fn on_route_lost(
        &mut self,
        router: &dyn RoutingModule,
        verdict: &LossVerdict,
    ) -> Result<Vec<RollupAction>> {
        if let LossVerdict::SubtreePruned { child, .. } = verdict {
            debug!("{} no longer waits for {}", self.my_rank, child);
        }
        self.check_complete(router)
    }

    /// The forwarded payload left this daemon.
    pub fn mark_forwarded(&mut self) {
        if self.phase == RollupPhase::Forwarding {
            self.phase = RollupPhase::Done;
        }
    }

    fn check_complete(&mut self, router: &dyn RoutingModule) -> Result<Vec<RollupAction>> {
        if self.phase != RollupPhase::Collecting {
            return Ok(Vec::new());
        }
        // children pruned after reporting still count
        let former_children = self
            .child_payloads
            .iter()
            .filter(|(rank, _)| !is_child(router, *rank))
            .count();
        self.expected = router.num_routes() + 1 + former_children;
        if self.warmup_pending || self.self_payload.is_none() || self.received() < self.expected {
            return Ok(Vec::new());
        }

        let forward_to = if self.my_rank.is_root() {
            None
        } else {
            Some(router.parent().ok_or(RoutedError::NotFound(self.my_rank))?)
        };

        let mut payload = self.self_payload.take().unwrap_or_default();
        for (_, bytes) in self.child_payloads.drain(..) {
            payload.extend(bytes);
        }
        let reports = self.received();

        let action = if let Some(parent) = forward_to {
            self.phase = RollupPhase::Forwarding;
            debug!(
                "{} forwarding {} bytes from {} reports to {}",
                self.my_rank,
                payload.len(),
                reports,
                parent
            );
            RollupAction::Forward {
                parent,
                envelope: CallbackEnvelope {
                    payload,
                    extra: self.self_extra.take(),
                },
            }
        } else {
            self.phase = RollupPhase::Done;
            info!("{} rollup complete with {} reports", self.my_rank, reports);
            RollupAction::PhaseComplete { payload }
        };

        let forwarded_to = match &action {
            RollupAction::Forward { parent, .. } => Some(*parent),
            _ => None,
        };
        self.emit(RoutedEvent::PhaseComplete {
            rank: self.my_rank,
            reports,
            forwarded_to,
        });
        Ok(vec![action])
    }

    fn emit(&self, event: RoutedEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

fn is_child(router: &dyn RoutingModule, rank: Rank) -> bool {
    router.children().iter().any(|c| c.rank == rank)
}
