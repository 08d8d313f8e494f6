//! Routing modules: spanning-tree computation and next-hop lookup.
//!
//! Three variants share one contract ([`RoutingModule`]):
//! - **Binomial**: tree defined by bit arithmetic on ranks, O(log N) depth
//! - **Radix**: geometric levels of `radix` ranks, shallow and wide
//! - **Direct**: flat star around the root
//!
//! Exactly one module is selected at start-up, either forced by
//! configuration or by priority (see [`select_module`]).

pub mod binomial;
pub mod direct;
pub mod radix;
mod state;

pub use binomial::BinomialRouter;
pub use direct::DirectRouter;
pub use radix::RadixRouter;
pub use state::{LifelineTarget, RoutingState, RuntimeFlags};

use crate::bitmap::Bitmap;
use crate::error::{Result, RoutedError};
use crate::Rank;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Available tree generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    Binomial,
    Radix,
    Direct,
}

impl TopologyKind {
    pub const ALL: [TopologyKind; 3] = [
        TopologyKind::Radix,
        TopologyKind::Binomial,
        TopologyKind::Direct,
    ];

    /// Selection priority when no topology is forced. Highest wins.
    pub fn priority(&self) -> u32 {
        match self {
            TopologyKind::Radix => radix::PRIORITY,
            TopologyKind::Binomial => binomial::PRIORITY,
            TopologyKind::Direct => direct::PRIORITY,
        }
    }

    /// The variant chosen when configuration does not force one.
    pub fn highest_priority() -> TopologyKind {
        Self::ALL
            .into_iter()
            .max_by_key(|kind| kind.priority())
            .unwrap_or(TopologyKind::Radix)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyKind::Binomial => "binomial",
            TopologyKind::Radix => "radix",
            TopologyKind::Direct => "direct",
        }
    }
}

impl Display for TopologyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopologyKind {
    type Err = RoutedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binomial" => Ok(TopologyKind::Binomial),
            "radix" => Ok(TopologyKind::Radix),
            "direct" => Ok(TopologyKind::Direct),
            other => Err(RoutedError::BadParam(format!("unknown topology {:?}", other))),
        }
    }
}

/// One direct child of the local daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTreeNode {
    /// The child's rank
    pub rank: Rank,
    /// Every rank strictly below the child (the child itself excluded)
    pub relatives: Bitmap,
}

impl RoutingTreeNode {
    /// True if `rank` is the child or anywhere in its subtree.
    pub fn covers(&self, rank: Rank) -> bool {
        self.rank == rank || self.relatives.is_set(rank.index())
    }

    /// Ranks in the subtree, the child first.
    pub fn subtree(&self) -> Vec<Rank> {
        std::iter::once(self.rank)
            .chain(self.relatives.iter().map(|i| Rank::new(i as u32)))
            .collect()
    }
}

/// Result of a tree computation for one rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPlan {
    pub parent: Option<Rank>,
    pub children: Vec<RoutingTreeNode>,
}

impl RoutingPlan {
    /// Build a plan from a child-generation rule.
    ///
    /// Each direct child's relatives are filled by walking the same rule
    /// down its branch with an explicit stack.
    pub(crate) fn build<F>(population: u32, parent: Option<Rank>, direct: Vec<Rank>, children_of: F) -> Result<Self>
    where
        F: Fn(Rank) -> Vec<Rank>,
    {
        let mut children = Vec::with_capacity(direct.len());
        for child in direct {
            let mut relatives = Bitmap::with_capacity(population as usize);
            let mut stack = children_of(child);
            while let Some(rank) = stack.pop() {
                relatives.set_bit(rank.index())?;
                stack.extend(children_of(rank));
            }
            children.push(RoutingTreeNode {
                rank: child,
                relatives,
            });
        }
        Ok(Self { parent, children })
    }

    pub fn child_ranks(&self) -> Vec<Rank> {
        self.children.iter().map(|c| c.rank).collect()
    }
}

/// Compute the plan of `rank` under `kind` without building a module.
pub fn compute_plan(kind: TopologyKind, rank: Rank, population: u32, radix: u32) -> Result<RoutingPlan> {
    check_plan_args(rank, population)?;
    match kind {
        TopologyKind::Binomial => binomial::plan(rank, population),
        TopologyKind::Radix => radix::plan(rank, population, radix),
        TopologyKind::Direct => Ok(direct::plan(rank, population)),
    }
}

pub(crate) fn check_plan_args(rank: Rank, population: u32) -> Result<()> {
    if !rank.is_valid() {
        return Err(RoutedError::bad_rank("my_rank", rank));
    }
    if population == 0 || rank.as_u32() >= population {
        return Err(RoutedError::BadParam(format!(
            "rank {} outside population of {}",
            rank, population
        )));
    }
    Ok(())
}

/// What a lost connection meant to the local tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteLoss {
    /// A direct child was removed along with its whole subtree
    ChildPruned(RoutingTreeNode),
    /// Neither the lifeline nor a direct child
    Irrelevant,
}

/// Common contract of every routing variant.
///
/// Variants own a [`RoutingState`] and implement the tree-specific parts
/// (`init`, `update_routing_plan`, `get_route`); everything else is shared.
pub trait RoutingModule: Send {
    fn kind(&self) -> TopologyKind;

    fn state(&self) -> &RoutingState;

    fn state_mut(&mut self) -> &mut RoutingState;

    /// Establish parent and lifeline defaults from static configuration.
    fn init(&mut self) -> Result<()>;

    /// Recompute parent and children, replacing any previous plan.
    fn update_routing_plan(&mut self, my_rank: Rank, population: u32) -> Result<()>;

    /// Next hop toward `target`.
    ///
    /// `NotFound` means no daemon hosts the target; callers fall back to
    /// sending directly.
    fn get_route(&self, target: Rank) -> Result<Rank>;

    /// Release the children list.
    fn finalize(&mut self) -> Result<()> {
        self.state_mut().finalize();
        Ok(())
    }

    /// Record whether the root is reachable without the parent.
    fn update_route(&mut self, target: Rank, via: Rank) -> Result<()> {
        self.state_mut().update_route(target, via)
    }

    /// No-op for daemons; the next replan rebuilds the tree.
    fn delete_route(&mut self, target: Rank) -> Result<()> {
        if !target.is_valid() {
            return Err(RoutedError::bad_rank("delete_route target", target));
        }
        tracing::debug!("{} delete_route for {}", self.state().my_rank(), target);
        Ok(())
    }

    /// Classify a lost connection. `Fatal` when the lifeline is lost.
    fn route_lost(&mut self, lost: Rank) -> Result<RouteLoss> {
        self.state_mut().route_lost(lost)
    }

    fn route_is_defined(&self, target: Rank) -> bool {
        self.state().route_is_defined(target)
    }

    /// Copy `rank` in as the lifeline.
    fn set_lifeline(&mut self, rank: Rank) -> Result<()> {
        self.state_mut().set_lifeline(rank)
    }

    /// Append the ranks a broadcast must be handed to.
    fn get_routing_list(&self, collector: &mut Vec<Rank>) {
        self.state().xcast_targets(collector);
    }

    fn num_routes(&self) -> usize {
        self.state().children().len()
    }

    fn my_rank(&self) -> Rank {
        self.state().my_rank()
    }

    fn parent(&self) -> Option<Rank> {
        self.state().parent()
    }

    fn lifeline(&self) -> Option<Rank> {
        self.state().lifeline()
    }

    fn children(&self) -> &[RoutingTreeNode] {
        self.state().children()
    }

    fn population(&self) -> u32 {
        self.state().population()
    }
}

/// Pick and initialize the routing module for this process.
pub fn select_module(state: RoutingState) -> Result<Box<dyn RoutingModule>> {
    let kind = state
        .config()
        .topology
        .unwrap_or_else(TopologyKind::highest_priority);

    tracing::debug!("{} selected routing module {}", state.my_rank(), kind);

    let mut module: Box<dyn RoutingModule> = match kind {
        TopologyKind::Binomial => Box::new(BinomialRouter::new(state)),
        TopologyKind::Radix => Box::new(RadixRouter::new(state)?),
        TopologyKind::Direct => Box::new(DirectRouter::new(state)),
    };
    module.init()?;
    Ok(module)
}
