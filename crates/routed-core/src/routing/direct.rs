//! Direct routing: a flat star around the root.

use super::{check_plan_args, RoutingModule, RoutingPlan, RoutingState, RoutingTreeNode, TopologyKind};
use crate::bitmap::Bitmap;
use crate::error::{Result, RoutedError};
use crate::Rank;

pub const PRIORITY: u32 = 0;

/// The root owns every other rank; everyone else is a leaf.
pub fn plan(rank: Rank, population: u32) -> RoutingPlan {
    if rank.is_root() {
        RoutingPlan {
            parent: None,
            children: (1..population)
                .map(|r| RoutingTreeNode {
                    rank: Rank::new(r),
                    relatives: Bitmap::new(),
                })
                .collect(),
        }
    } else {
        RoutingPlan {
            parent: Some(Rank::ROOT),
            children: Vec::new(),
        }
    }
}

pub struct DirectRouter {
    state: RoutingState,
}

impl DirectRouter {
    pub fn new(state: RoutingState) -> Self {
        Self { state }
    }
}

impl RoutingModule for DirectRouter {
    fn kind(&self) -> TopologyKind {
        TopologyKind::Direct
    }

    fn state(&self) -> &RoutingState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RoutingState {
        &mut self.state
    }

    fn init(&mut self) -> Result<()> {
        self.state.init_lifeline();
        if !self.state.my_rank().is_root() && self.state.parent().is_none() {
            self.state.set_parent(Some(Rank::ROOT));
        }
        Ok(())
    }

    fn update_routing_plan(&mut self, my_rank: Rank, population: u32) -> Result<()> {
        check_plan_args(my_rank, population)?;
        self.state
            .install_plan(my_rank, population, plan(my_rank, population));
        Ok(())
    }

    /// Either the target itself or the root.
    fn get_route(&self, target: Rank) -> Result<Rank> {
        if !target.is_valid() {
            return Err(RoutedError::bad_rank("route target", target));
        }
        if target.is_root() {
            return Ok(Rank::ROOT);
        }
        let daemon = self.state.hosting_daemon(target)?;
        if daemon == self.state.my_rank() {
            return Ok(target);
        }
        Ok(daemon)
    }
}
