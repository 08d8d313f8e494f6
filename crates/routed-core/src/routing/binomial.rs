//! Binomial tree: children and parent follow from the bits of the rank.
//!
//! With `dim = ceil(log2(N))`, rank `r` owns `r | 1 << i` for every bit `i`
//! above its highest set bit. Clearing the highest set bit inverts that
//! rule, which gives the parent without searching from the root.

use super::{check_plan_args, RoutingModule, RoutingPlan, RoutingState, TopologyKind};
use crate::error::Result;
use crate::Rank;

pub const PRIORITY: u32 = 30;

/// Smallest `d` with `2^d >= population`.
pub fn cube_dim(population: u32) -> u32 {
    if population <= 1 {
        0
    } else {
        u32::BITS - (population - 1).leading_zeros()
    }
}

/// Highest set bit of `value`, or -1 for zero.
fn hibit(value: u32) -> i32 {
    if value == 0 {
        -1
    } else {
        (u32::BITS - 1 - value.leading_zeros()) as i32
    }
}

pub fn children_of(rank: Rank, population: u32) -> Vec<Rank> {
    if rank.as_u32() >= population {
        return Vec::new();
    }
    let dim = cube_dim(population);
    let first = (hibit(rank.as_u32()) + 1) as u32;
    (first..dim)
        .map(|bit| rank.as_u32() | (1 << bit))
        .filter(|&peer| peer < population)
        .map(Rank::new)
        .collect()
}

pub fn parent_of(rank: Rank, population: u32) -> Option<Rank> {
    if rank.is_root() || rank.as_u32() >= population {
        return None;
    }
    let top = hibit(rank.as_u32()) as u32;
    Some(Rank::new(rank.as_u32() & !(1 << top)))
}

pub fn plan(rank: Rank, population: u32) -> Result<RoutingPlan> {
    RoutingPlan::build(
        population,
        parent_of(rank, population),
        children_of(rank, population),
        |r| children_of(r, population),
    )
}

pub struct BinomialRouter {
    state: RoutingState,
}

impl BinomialRouter {
    pub fn new(state: RoutingState) -> Self {
        Self { state }
    }
}

impl RoutingModule for BinomialRouter {
    fn kind(&self) -> TopologyKind {
        TopologyKind::Binomial
    }

    fn state(&self) -> &RoutingState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RoutingState {
        &mut self.state
    }

    fn init(&mut self) -> Result<()> {
        self.state.init_lifeline();
        Ok(())
    }

    fn update_routing_plan(&mut self, my_rank: Rank, population: u32) -> Result<()> {
        check_plan_args(my_rank, population)?;
        let plan = plan(my_rank, population)?;
        self.state.install_plan(my_rank, population, plan);
        Ok(())
    }

    fn get_route(&self, target: Rank) -> Result<Rank> {
        self.state.tree_route(target)
    }
}
