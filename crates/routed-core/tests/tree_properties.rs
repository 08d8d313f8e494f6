//! Structural properties of the routing trees, checked over many
//! population sizes.

use routed_core::routing::{binomial, radix, compute_plan};
use routed_core::{
    select_module, FleetRegistry, Rank, RouteLoss, RoutedConfig, RoutedError, RoutingModule,
    RoutingState, RuntimeFlags, TopologyKind,
};
use std::collections::HashSet;
use std::sync::Arc;

fn config(kind: TopologyKind, radix: u32) -> RoutedConfig {
    RoutedConfig {
        topology: Some(kind),
        radix,
        ..Default::default()
    }
}

fn router_with(config: RoutedConfig, rank: u32, population: u32, flags: RuntimeFlags) -> Box<dyn RoutingModule> {
    let state = RoutingState::new(
        Rank::new(rank),
        config,
        Arc::new(FleetRegistry::new(population)),
        flags,
    );
    let mut router = select_module(state).unwrap();
    router.update_routing_plan(Rank::new(rank), population).unwrap();
    router
}

fn fleet(kind: TopologyKind, radix: u32, population: u32) -> Vec<Box<dyn RoutingModule>> {
    (0..population)
        .map(|r| router_with(config(kind, radix), r, population, RuntimeFlags::default()))
        .collect()
}

const TREES: [(TopologyKind, u32); 5] = [
    (TopologyKind::Binomial, 0),
    (TopologyKind::Radix, 2),
    (TopologyKind::Radix, 3),
    (TopologyKind::Radix, 64),
    (TopologyKind::Direct, 0),
];

// ==================== Spanning tree ====================

#[test]
fn test_root_subtrees_partition_population() {
    for (kind, radix) in TREES {
        for population in 1..90 {
            let plan = compute_plan(kind, Rank::ROOT, population, radix).unwrap();
            let mut seen = HashSet::new();
            for child in &plan.children {
                for rank in child.subtree() {
                    assert!(
                        seen.insert(rank),
                        "{} appears twice ({} N={})",
                        rank,
                        kind,
                        population
                    );
                }
            }
            let expected: HashSet<Rank> = (1..population).map(Rank::new).collect();
            assert_eq!(seen, expected, "{} radix {} N={}", kind, radix, population);
        }
    }
}

#[test]
fn test_every_rank_has_one_parent() {
    for population in 1..90u32 {
        for r in 1..population {
            let rank = Rank::new(r);
            let owners: Vec<u32> = (0..population)
                .filter(|p| binomial::children_of(Rank::new(*p), population).contains(&rank))
                .collect();
            assert_eq!(owners.len(), 1, "binomial rank {} of {}", r, population);
            assert_eq!(binomial::parent_of(rank, population), Some(Rank::new(owners[0])));

            let owners: Vec<u32> = (0..population)
                .filter(|p| radix::children_of(Rank::new(*p), population, 4).contains(&rank))
                .collect();
            assert_eq!(owners.len(), 1, "radix rank {} of {}", r, population);
            assert_eq!(radix::parent_of(rank, population, 4), Some(Rank::new(owners[0])));
        }
    }
}

#[test]
fn test_relatives_never_contain_own_child_or_ancestors() {
    for (kind, radix) in TREES {
        let population = 37;
        for r in 0..population {
            let plan = compute_plan(kind, Rank::new(r), population, radix).unwrap();
            for child in &plan.children {
                assert!(!child.relatives.is_set(child.rank.index()));
                assert!(!child.relatives.is_set(r as usize));
                if let Some(parent) = plan.parent {
                    assert!(!child.relatives.is_set(parent.index()));
                }
            }
        }
    }
}

// ==================== Routing ====================

#[test]
fn test_routes_reach_every_target() {
    for (kind, radix) in TREES {
        for population in [1u32, 2, 5, 9, 16, 23] {
            let routers = fleet(kind, radix, population);
            for s in 0..population {
                for t in 0..population {
                    let target = Rank::new(t);
                    let mut current = Rank::new(s);
                    let mut steps = 0;
                    while current != target {
                        current = routers[current.index()].get_route(target).unwrap();
                        steps += 1;
                        assert!(
                            steps <= population,
                            "{} N={} {} -> {} does not converge",
                            kind,
                            population,
                            s,
                            t
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn test_downward_routes_shrink_the_subtree() {
    let routers = fleet(TopologyKind::Binomial, 0, 16);
    let target = Rank::new(15);
    let hops: Vec<Rank> = std::iter::successors(Some(Rank::ROOT), |cur| {
        (*cur != target).then(|| routers[cur.index()].get_route(target).unwrap())
    })
    .collect();
    assert_eq!(
        hops,
        vec![Rank::new(0), Rank::new(1), Rank::new(3), Rank::new(7), Rank::new(15)]
    );
}

#[test]
fn test_unknown_target_is_not_found() {
    let root = router_with(config(TopologyKind::Radix, 4), 0, 8, RuntimeFlags::default());
    assert_eq!(
        root.get_route(Rank::new(50)),
        Err(RoutedError::NotFound(Rank::new(50)))
    );
    assert!(!root.route_is_defined(Rank::new(50)));
    assert!(root.route_is_defined(Rank::new(7)));
    assert!(!root.route_is_defined(Rank::INVALID));
}

#[test]
fn test_invalid_target_is_bad_param() {
    let leaf = router_with(config(TopologyKind::Binomial, 0), 3, 8, RuntimeFlags::default());
    assert!(matches!(
        leaf.get_route(Rank::INVALID),
        Err(RoutedError::BadParam(_))
    ));
}

#[test]
fn test_routing_disabled_goes_direct() {
    let config = RoutedConfig {
        topology: Some(TopologyKind::Binomial),
        routing_enabled: false,
        ..Default::default()
    };
    let leaf = router_with(config, 5, 8, RuntimeFlags::default());
    assert_eq!(leaf.get_route(Rank::new(6)).unwrap(), Rank::new(6));
    assert_eq!(leaf.get_route(Rank::INVALID).unwrap(), Rank::INVALID);
}

#[test]
fn test_root_route_follows_hnp_direct() {
    let mut leaf = router_with(config(TopologyKind::Binomial, 0), 7, 8, RuntimeFlags::default());
    assert_eq!(leaf.get_route(Rank::ROOT).unwrap(), Rank::ROOT);

    leaf.update_route(Rank::ROOT, Rank::new(3)).unwrap();
    assert_eq!(leaf.get_route(Rank::ROOT).unwrap(), Rank::new(3));

    leaf.update_route(Rank::ROOT, Rank::ROOT).unwrap();
    assert_eq!(leaf.get_route(Rank::ROOT).unwrap(), Rank::ROOT);

    assert!(leaf.update_route(Rank::INVALID, Rank::ROOT).is_err());
}

#[test]
fn test_static_ports_route_root_through_parent() {
    let config = RoutedConfig {
        topology: Some(TopologyKind::Binomial),
        static_ports: true,
        ..Default::default()
    };
    let leaf = router_with(config, 6, 8, RuntimeFlags::default());
    assert_eq!(leaf.get_route(Rank::ROOT).unwrap(), Rank::new(2));
    assert_eq!(leaf.lifeline(), Some(Rank::new(2)));
}

#[test]
fn test_static_parent_overrides_plan() {
    let config = RoutedConfig {
        topology: Some(TopologyKind::Radix),
        radix: 2,
        static_parent: Some(Rank::ROOT),
        ..Default::default()
    };
    let leaf = router_with(config, 5, 8, RuntimeFlags::default());
    assert_eq!(leaf.parent(), Some(Rank::ROOT));
}

// ==================== Replanning ====================

#[test]
fn test_replan_is_idempotent() {
    for (kind, radix) in TREES {
        let mut router = router_with(config(kind, radix), 1, 20, RuntimeFlags::default());
        let first = router.children().to_vec();
        let parent = router.parent();
        router.update_routing_plan(Rank::new(1), 20).unwrap();
        assert_eq!(router.children(), first.as_slice());
        assert_eq!(router.parent(), parent);
    }
}

#[test]
fn test_replan_after_growth() {
    let mut root = router_with(config(TopologyKind::Binomial, 0), 0, 2, RuntimeFlags::default());
    assert_eq!(root.num_routes(), 1);
    root.update_routing_plan(Rank::ROOT, 9).unwrap();
    assert_eq!(root.num_routes(), 4);
}

#[test]
fn test_replan_rejects_bad_args() {
    let mut router = router_with(config(TopologyKind::Binomial, 0), 0, 4, RuntimeFlags::default());
    assert!(router.update_routing_plan(Rank::new(4), 4).is_err());
    assert!(router.update_routing_plan(Rank::INVALID, 4).is_err());
    assert_eq!(router.num_routes(), 2);
}

#[test]
fn test_binomial_rank_three_of_nine() {
    let router = router_with(config(TopologyKind::Binomial, 0), 3, 9, RuntimeFlags::default());
    let children: Vec<Rank> = router.children().iter().map(|c| c.rank).collect();
    assert_eq!(children, vec![Rank::new(7)]);
    assert!(router.children()[0].relatives.is_empty());
    assert_eq!(router.parent(), Some(Rank::new(1)));
    assert_eq!(router.num_routes(), 1);
}

#[test]
fn test_direct_route_counts() {
    let routers = fleet(TopologyKind::Direct, 0, 6);
    assert_eq!(routers[0].num_routes(), 5);
    assert!(routers[1..].iter().all(|r| r.num_routes() == 0));
}

// ==================== Lifeline ====================

#[test]
fn test_lifeline_loss_fatal_for_every_variant() {
    for (kind, radix) in TREES {
        let mut leaf = router_with(config(kind, radix), 4, 8, RuntimeFlags::default());
        let lifeline = leaf.lifeline().unwrap();
        let err = leaf.route_lost(lifeline).unwrap_err();
        assert!(err.is_fatal(), "{}", kind);
    }
}

#[test]
fn test_set_lifeline_copies_rank() {
    let mut leaf = router_with(config(TopologyKind::Binomial, 0), 5, 8, RuntimeFlags::default());
    let mut chosen = Rank::new(1);
    leaf.set_lifeline(chosen).unwrap();
    chosen = Rank::new(4);
    assert_eq!(leaf.lifeline(), Some(Rank::new(1)));
    assert!(leaf.route_lost(Rank::new(1)).unwrap_err().is_fatal());
    assert!(leaf.route_lost(chosen).is_ok());
    assert!(leaf.set_lifeline(Rank::INVALID).is_err());
}

#[test]
fn test_root_has_no_lifeline() {
    let mut root = router_with(config(TopologyKind::Radix, 2), 0, 8, RuntimeFlags::default());
    assert_eq!(root.lifeline(), None);
    assert!(root.route_lost(Rank::new(7)).is_ok());
}

#[test]
fn test_finalize_releases_children() {
    let mut root = router_with(config(TopologyKind::Binomial, 0), 0, 8, RuntimeFlags::default());
    root.finalize().unwrap();
    assert_eq!(root.num_routes(), 0);
    assert!(root.delete_route(Rank::new(3)).is_ok());
}

#[test]
fn test_lost_ranks_stay_within_population() {
    let far = Rank::new(4_000_000_000);
    let mut root = router_with(config(TopologyKind::Binomial, 0), 0, 8, RuntimeFlags::default());
    assert!(matches!(root.route_lost(far).unwrap(), RouteLoss::Irrelevant));
    assert!(!root.state().is_lost(far));
    assert_eq!(root.state().lost_ranks().capacity(), 0);

    // before any plan, losses are kept aside and folded in by the replan
    let state = RoutingState::new(
        Rank::new(1),
        config(TopologyKind::Binomial, 0),
        Arc::new(FleetRegistry::new(8)),
        RuntimeFlags::default(),
    );
    let mut leaf = select_module(state).unwrap();
    leaf.route_lost(Rank::new(3)).unwrap();
    leaf.route_lost(far).unwrap();
    assert!(leaf.state().is_lost(far));

    leaf.update_routing_plan(Rank::new(1), 8).unwrap();
    assert!(leaf.state().is_lost(Rank::new(3)));
    assert!(!leaf.state().is_lost(far));
    assert!(leaf.state().lost_ranks().capacity() <= 64);
}

// ==================== Broadcast ====================

#[test]
fn test_routing_list_is_children() {
    let root = router_with(config(TopologyKind::Binomial, 0), 0, 8, RuntimeFlags::default());
    let mut list = Vec::new();
    root.get_routing_list(&mut list);
    assert_eq!(list, vec![Rank::new(1), Rank::new(2), Rank::new(4)]);
}

#[test]
fn test_abnormal_termination_targets_all_live_daemons() {
    let flags = RuntimeFlags::default();
    let mut root = router_with(config(TopologyKind::Binomial, 0), 0, 6, flags.clone());
    root.route_lost(Rank::new(5)).unwrap();
    flags.order_abnormal_termination();

    let mut list = Vec::new();
    root.get_routing_list(&mut list);
    assert_eq!(
        list,
        vec![Rank::new(1), Rank::new(2), Rank::new(3), Rank::new(4)]
    );

    // non-root daemons keep relaying to their children
    let mut leaf_list = Vec::new();
    let leaf = router_with(config(TopologyKind::Binomial, 0), 1, 6, flags);
    leaf.get_routing_list(&mut leaf_list);
    assert_eq!(leaf_list, vec![Rank::new(3), Rank::new(5)]);
}
