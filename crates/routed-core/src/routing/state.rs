//! State shared by every routing variant.

use super::{RouteLoss, RoutingPlan, RoutingTreeNode};
use crate::bitmap::Bitmap;
use crate::config::RoutedConfig;
use crate::error::{Result, RoutedError};
use crate::registry::DaemonRegistry;
use crate::Rank;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where the lifeline points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifelineTarget {
    /// No lifeline (the root)
    Unset,
    /// Whatever the current parent is
    Parent,
    /// A fixed rank
    Rank(Rank),
}

/// Process-wide flags read by the routing core but owned by the runtime.
///
/// Clones share the same flags.
#[derive(Debug, Clone, Default)]
pub struct RuntimeFlags {
    finalizing: Arc<AtomicBool>,
    abnormal_term: Arc<AtomicBool>,
}

impl RuntimeFlags {
    pub fn begin_finalize(&self) {
        self.finalizing.store(true, Ordering::SeqCst);
    }

    pub fn is_finalizing(&self) -> bool {
        self.finalizing.load(Ordering::SeqCst)
    }

    pub fn order_abnormal_termination(&self) {
        self.abnormal_term.store(true, Ordering::SeqCst);
    }

    pub fn abnormal_termination_ordered(&self) -> bool {
        self.abnormal_term.load(Ordering::SeqCst)
    }
}

/// Parent, children and lifeline of the local daemon.
pub struct RoutingState {
    my_rank: Rank,
    population: u32,
    parent: Option<Rank>,
    children: Vec<RoutingTreeNode>,
    lifeline: LifelineTarget,
    hnp_direct: bool,
    /// Lost ranks inside the population
    lost: Bitmap,
    /// Losses seen before any plan told us the population
    unplanned_lost: BTreeSet<Rank>,
    config: RoutedConfig,
    registry: Arc<dyn DaemonRegistry>,
    flags: RuntimeFlags,
}

impl RoutingState {
    pub fn new(
        my_rank: Rank,
        config: RoutedConfig,
        registry: Arc<dyn DaemonRegistry>,
        flags: RuntimeFlags,
    ) -> Self {
        Self {
            my_rank,
            population: 0,
            parent: None,
            children: Vec::new(),
            lifeline: LifelineTarget::Unset,
            hnp_direct: true,
            lost: Bitmap::new(),
            unplanned_lost: BTreeSet::new(),
            config,
            registry,
            flags,
        }
    }

    pub fn my_rank(&self) -> Rank {
        self.my_rank
    }

    pub fn population(&self) -> u32 {
        self.population
    }

    pub fn parent(&self) -> Option<Rank> {
        self.parent
    }

    pub fn children(&self) -> &[RoutingTreeNode] {
        &self.children
    }

    pub fn config(&self) -> &RoutedConfig {
        &self.config
    }

    pub fn flags(&self) -> &RuntimeFlags {
        &self.flags
    }

    pub fn hnp_direct(&self) -> bool {
        self.hnp_direct
    }

    pub fn lifeline_target(&self) -> LifelineTarget {
        self.lifeline
    }

    /// Resolve the lifeline against the current parent.
    pub fn lifeline(&self) -> Option<Rank> {
        match self.lifeline {
            LifelineTarget::Unset => None,
            LifelineTarget::Parent => self.parent,
            LifelineTarget::Rank(rank) => Some(rank),
        }
    }

    /// True once a connection to `rank` has been reported lost.
    pub fn is_lost(&self, rank: Rank) -> bool {
        self.lost.is_set(rank.index()) || self.unplanned_lost.contains(&rank)
    }

    pub fn lost_ranks(&self) -> &Bitmap {
        &self.lost
    }

    /// Lifeline defaults shared by the tree variants.
    pub(crate) fn init_lifeline(&mut self) {
        self.lifeline = if self.my_rank.is_root() {
            LifelineTarget::Unset
        } else if self.config.static_ports {
            LifelineTarget::Parent
        } else {
            LifelineTarget::Rank(Rank::ROOT)
        };
        if !self.my_rank.is_root() {
            self.parent = self.config.static_parent;
        }
    }

    /// Replace parent and children wholesale.
    pub(crate) fn install_plan(&mut self, my_rank: Rank, population: u32, plan: RoutingPlan) {
        self.my_rank = my_rank;
        self.population = population;
        self.parent = if my_rank.is_root() {
            None
        } else {
            self.config.static_parent.or(plan.parent)
        };
        self.children = plan.children;
        for rank in std::mem::take(&mut self.unplanned_lost) {
            if rank.as_u32() < population {
                // `lost` has no ceiling
                let _ = self.lost.set_bit(rank.index());
            }
        }

        debug!(
            "{} routing plan: parent {} with {} children",
            self.my_rank,
            self.parent.unwrap_or(Rank::INVALID),
            self.children.len()
        );
        for child in &self.children {
            debug!(
                "{}   child {} relatives {:?}",
                self.my_rank,
                child.rank,
                child.relatives.iter().collect::<Vec<_>>()
            );
        }
    }

    pub(crate) fn finalize(&mut self) {
        self.children.clear();
        self.lifeline = LifelineTarget::Unset;
    }

    pub(crate) fn update_route(&mut self, target: Rank, via: Rank) -> Result<()> {
        if !target.is_valid() {
            return Err(RoutedError::bad_rank("update_route target", target));
        }
        if !via.is_valid() {
            return Err(RoutedError::bad_rank("update_route via", via));
        }
        if target.is_root() {
            self.hnp_direct = via.is_root();
            debug!(
                "{} route to root is {}",
                self.my_rank,
                if self.hnp_direct { "direct" } else { "via parent" }
            );
        }
        Ok(())
    }

    pub(crate) fn set_lifeline(&mut self, rank: Rank) -> Result<()> {
        if !rank.is_valid() {
            return Err(RoutedError::bad_rank("lifeline", rank));
        }
        self.lifeline = LifelineTarget::Rank(rank);
        Ok(())
    }

    pub(crate) fn route_lost(&mut self, lost: Rank) -> Result<RouteLoss> {
        if !lost.is_valid() {
            return Err(RoutedError::bad_rank("lost route", lost));
        }

        if !self.flags.is_finalizing() && self.lifeline() == Some(lost) {
            warn!("{} lost connection to lifeline {}", self.my_rank, lost);
            return Err(RoutedError::Fatal(format!(
                "connection to lifeline {} lost",
                lost
            )));
        }

        self.record_lost(lost)?;

        match self.children.iter().position(|c| c.rank == lost) {
            Some(pos) => {
                let child = self.children.remove(pos);
                debug!(
                    "{} pruned child {} and {} relatives",
                    self.my_rank,
                    lost,
                    child.relatives.count_ones()
                );
                Ok(RouteLoss::ChildPruned(child))
            }
            None => Ok(RouteLoss::Irrelevant),
        }
    }

    fn record_lost(&mut self, lost: Rank) -> Result<()> {
        if self.population == 0 {
            self.unplanned_lost.insert(lost);
        } else if lost.as_u32() < self.population {
            self.lost.set_bit(lost.index())?;
        }
        Ok(())
    }

    pub(crate) fn route_is_defined(&self, target: Rank) -> bool {
        target.is_valid() && self.registry.hosting_daemon_of(target).is_some()
    }

    pub(crate) fn hosting_daemon(&self, target: Rank) -> Result<Rank> {
        self.registry
            .hosting_daemon_of(target)
            .ok_or(RoutedError::NotFound(target))
    }

    /// Next-hop lookup shared by the binomial and radix trees.
    pub(crate) fn tree_route(&self, target: Rank) -> Result<Rank> {
        if !self.config.routing_enabled {
            return Ok(target);
        }
        if !target.is_valid() {
            return Err(RoutedError::bad_rank("route target", target));
        }
        if target == self.my_rank {
            return Ok(target);
        }

        if target.is_root() {
            if self.hnp_direct && !self.config.static_ports {
                return Ok(Rank::ROOT);
            }
            return self.parent.ok_or(RoutedError::NotFound(target));
        }

        let daemon = self.hosting_daemon(target)?;
        if daemon == self.my_rank {
            return Ok(target);
        }

        for child in &self.children {
            if child.rank == daemon || child.relatives.is_set(daemon.index()) {
                return Ok(child.rank);
            }
        }

        self.parent.ok_or(RoutedError::NotFound(target))
    }

    /// Broadcast fan-out list.
    pub(crate) fn xcast_targets(&self, collector: &mut Vec<Rank>) {
        let direct = self.flags.abnormal_termination_ordered() || !self.config.routing_enabled;
        if self.my_rank.is_root() && direct {
            collector.extend(
                (1..self.population)
                    .map(Rank::new)
                    .filter(|rank| !self.is_lost(*rank)),
            );
            return;
        }
        collector.extend(self.children.iter().map(|c| c.rank));
    }

    pub(crate) fn set_parent(&mut self, parent: Option<Rank>) {
        self.parent = parent;
    }
}
