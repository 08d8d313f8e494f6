//! Radix tree: level `k` holds `radix^k` ranks, numbered breadth-first.
//!
//! Rank `r` at a level of width `w` owns `r + w`, `r + 2w`, ... up to
//! `radix` children. Arithmetic runs in u64 so wide radices cannot wrap.

use super::{check_plan_args, RoutingModule, RoutingPlan, RoutingState, TopologyKind};
use crate::error::{Result, RoutedError};
use crate::Rank;

pub const PRIORITY: u32 = 70;

/// `(cumulative ranks through the level, width of the level)` for `rank`.
fn level_span(rank: u64, radix: u64) -> (u64, u64) {
    let mut sum = 1u64;
    let mut width = 1u64;
    while sum < rank + 1 {
        width = width.saturating_mul(radix);
        sum = sum.saturating_add(width);
    }
    (sum, width)
}

/// Depth of `rank` below the root.
pub fn level_of(rank: Rank, radix: u32) -> u32 {
    let radix = u64::from(radix.max(1));
    let target = u64::from(rank.as_u32()) + 1;
    let (mut sum, mut width, mut level) = (1u64, 1u64, 0u32);
    while sum < target {
        width = width.saturating_mul(radix);
        sum = sum.saturating_add(width);
        level += 1;
    }
    level
}

pub fn children_of(rank: Rank, population: u32, radix: u32) -> Vec<Rank> {
    let population = u64::from(population);
    let r = u64::from(rank.as_u32());
    if radix == 0 || r >= population {
        return Vec::new();
    }
    let (_, width) = level_span(r, u64::from(radix));

    let mut children = Vec::new();
    let mut peer = r.saturating_add(width);
    for _ in 0..radix {
        if peer >= population {
            break;
        }
        children.push(Rank::new(peer as u32));
        peer = peer.saturating_add(width);
    }
    children
}

pub fn parent_of(rank: Rank, population: u32, radix: u32) -> Option<Rank> {
    if rank.is_root() || radix == 0 || rank.as_u32() >= population {
        return None;
    }
    let radix = u64::from(radix);
    let r = u64::from(rank.as_u32());
    let (sum, width) = level_span(r, radix);
    let prev_sum = sum - width;
    let prev_width = width / radix;
    let parent = (r - prev_sum) % prev_width + (prev_sum - prev_width);
    Some(Rank::new(parent as u32))
}

pub fn plan(rank: Rank, population: u32, radix: u32) -> Result<RoutingPlan> {
    if radix == 0 {
        return Err(RoutedError::BadParam("radix must be greater than zero".into()));
    }
    RoutingPlan::build(
        population,
        parent_of(rank, population, radix),
        children_of(rank, population, radix),
        |r| children_of(r, population, radix),
    )
}

pub struct RadixRouter {
    state: RoutingState,
    radix: u32,
}

impl RadixRouter {
    pub fn new(state: RoutingState) -> Result<Self> {
        let radix = state.config().radix;
        if radix == 0 {
            return Err(RoutedError::BadParam("radix must be greater than zero".into()));
        }
        Ok(Self { state, radix })
    }

    pub fn radix(&self) -> u32 {
        self.radix
    }
}

impl RoutingModule for RadixRouter {
    fn kind(&self) -> TopologyKind {
        TopologyKind::Radix
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
        let plan = plan(my_rank, population, self.radix)?;
        self.state.install_plan(my_rank, population, plan);
        Ok(())
    }

    fn get_route(&self, target: Rank) -> Result<Rank> {
        self.state.tree_route(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranks(values: &[u32]) -> Vec<Rank> {
        values.iter().copied().map(Rank::new).collect()
    }

    fn search_parent(rank: Rank, population: u32, radix: u32) -> Option<Rank> {
        (0..population)
            .map(Rank::new)
            .find(|p| children_of(*p, population, radix).contains(&rank))
    }

    // ==================== Children ====================

    #[test]
    fn test_radix_two() {
        assert_eq!(children_of(Rank::new(0), 7, 2), ranks(&[1, 2]));
        assert_eq!(children_of(Rank::new(1), 7, 2), ranks(&[3, 5]));
        assert_eq!(children_of(Rank::new(2), 7, 2), ranks(&[4, 6]));
        assert!(children_of(Rank::new(3), 7, 2).is_empty());
    }

    #[test]
    fn test_radix_three() {
        assert_eq!(children_of(Rank::new(0), 13, 3), ranks(&[1, 2, 3]));
        assert_eq!(children_of(Rank::new(1), 13, 3), ranks(&[4, 7, 10]));
        assert_eq!(children_of(Rank::new(3), 13, 3), ranks(&[6, 9, 12]));
    }

    #[test]
    fn test_wide_radix_is_a_star() {
        assert_eq!(children_of(Rank::ROOT, 5, 64), ranks(&[1, 2, 3, 4]));
        for r in 1..5 {
            assert!(children_of(Rank::new(r), 5, 64).is_empty());
            assert_eq!(parent_of(Rank::new(r), 5, 64), Some(Rank::ROOT));
        }
    }

    #[test]
    fn test_radix_one_is_a_chain() {
        assert_eq!(children_of(Rank::new(2), 5, 1), ranks(&[3]));
        assert_eq!(parent_of(Rank::new(3), 5, 1), Some(Rank::new(2)));
    }

    #[test]
    fn test_huge_radix_does_not_overflow() {
        assert_eq!(children_of(Rank::ROOT, 3, u32::MAX), ranks(&[1, 2]));
        assert_eq!(parent_of(Rank::new(2), 3, u32::MAX), Some(Rank::ROOT));
    }

    // ==================== Parent ====================

    #[test]
    fn test_parent_matches_search() {
        for radix in 1..6 {
            for population in 1..60 {
                for r in 1..population {
                    let rank = Rank::new(r);
                    assert_eq!(
                        parent_of(rank, population, radix),
                        search_parent(rank, population, radix),
                        "rank {} of {} radix {}",
                        r,
                        population,
                        radix
                    );
                }
            }
        }
    }

    #[test]
    fn test_levels() {
        assert_eq!(level_of(Rank::ROOT, 2), 0);
        assert_eq!(level_of(Rank::new(2), 2), 1);
        assert_eq!(level_of(Rank::new(3), 2), 2);
        assert_eq!(level_of(Rank::new(6), 2), 2);
        assert_eq!(level_of(Rank::new(7), 2), 3);
    }

    // ==================== Plans ====================

    #[test]
    fn test_plan_relatives() {
        let plan = plan(Rank::ROOT, 7, 2).unwrap();
        assert_eq!(plan.child_ranks(), ranks(&[1, 2]));
        assert_eq!(plan.children[0].relatives.iter().collect::<Vec<_>>(), vec![3, 5]);
        assert_eq!(plan.children[1].relatives.iter().collect::<Vec<_>>(), vec![4, 6]);
    }

    #[test]
    fn test_zero_radix_rejected() {
        assert!(plan(Rank::ROOT, 4, 0).is_err());
        assert!(children_of(Rank::ROOT, 4, 0).is_empty());
    }
}
