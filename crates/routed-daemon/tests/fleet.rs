//! End-to-end launches of in-process fleets.

use routed_core::{EventBus, LaunchState, Rank, RoutedConfig, RoutedEvent, TopologyKind};
use routed_daemon::{Fleet, FleetOptions};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn ranks(values: &[u32]) -> Vec<Rank> {
    values.iter().copied().map(Rank::new).collect()
}

fn options(kind: TopologyKind, daemons: u32) -> FleetOptions {
    FleetOptions {
        daemons,
        config: RoutedConfig {
            topology: Some(kind),
            radix: 3,
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn launch(options: FleetOptions) -> routed_daemon::FleetReport {
    Fleet::launch(options, Arc::new(EventBus::new())).await.unwrap()
}

// ==================== Healthy launches ====================

#[tokio::test]
async fn test_every_topology_reports_all_daemons() {
    for kind in TopologyKind::ALL {
        let report = launch(options(kind, 8)).await;
        assert_eq!(report.topology, kind);
        assert_eq!(report.state, LaunchState::DaemonsReported, "{}", kind);
        assert_eq!(report.reported, ranks(&[0, 1, 2, 3, 4, 5, 6, 7]));
        assert!(report.missing.is_empty());
        assert!(report.aborted.is_empty());
        assert_eq!(report.hostnames[&Rank::new(5)], "node5");
        let probed: Vec<Rank> = report.probe_hops.keys().copied().collect();
        assert_eq!(probed, ranks(&[1, 2, 3, 4, 5, 6, 7]), "{}", kind);
    }
}

#[tokio::test]
async fn test_probe_hops_follow_the_tree() {
    let report = launch(options(TopologyKind::Binomial, 8)).await;
    assert_eq!(report.probe_hops[&Rank::new(1)], 1);
    assert_eq!(report.probe_hops[&Rank::new(3)], 2);
    assert_eq!(report.probe_hops[&Rank::new(7)], 3);

    let report = launch(options(TopologyKind::Direct, 8)).await;
    assert!(report.probe_hops.values().all(|hops| *hops == 1));
}

#[tokio::test]
async fn test_single_daemon_fleet() {
    let report = launch(options(TopologyKind::Binomial, 1)).await;
    assert_eq!(report.state, LaunchState::DaemonsReported);
    assert_eq!(report.reported, ranks(&[0]));
    assert!(report.probe_hops.is_empty());
}

#[tokio::test]
async fn test_priority_selects_radix() {
    let mut opts = options(TopologyKind::Binomial, 5);
    opts.config.topology = None;
    let report = launch(opts).await;
    assert_eq!(report.topology, TopologyKind::Radix);
    assert_eq!(report.state, LaunchState::DaemonsReported);
}

#[tokio::test]
async fn test_routing_disabled_still_completes() {
    let mut opts = options(TopologyKind::Binomial, 8);
    opts.config.routing_enabled = false;
    let report = launch(opts).await;
    assert_eq!(report.state, LaunchState::DaemonsReported);
    assert!(report.probe_hops.values().all(|hops| *hops == 1));
}

#[tokio::test]
async fn test_warmup_launch_with_jitter() {
    for kind in [TopologyKind::Binomial, TopologyKind::Radix] {
        let mut opts = options(kind, 12);
        opts.warmup = true;
        opts.jitter = Duration::from_millis(5);
        let report = launch(opts).await;
        assert_eq!(report.state, LaunchState::DaemonsReported, "{}", kind);
        assert_eq!(report.reported.len(), 12);
        assert!(report.aborted.is_empty());
    }
}

// ==================== Failures ====================

#[tokio::test]
async fn test_killed_rank_loses_its_subtree() {
    let mut opts = options(TopologyKind::Binomial, 8);
    opts.kill = ranks(&[2]);
    let report = launch(opts).await;
    assert_eq!(report.state, LaunchState::DaemonsLaunched);
    assert_eq!(report.missing, ranks(&[2, 6]));
    assert_eq!(report.reported, ranks(&[0, 1, 3, 4, 5, 7]));
    assert!(report.aborted.is_empty());
}

#[tokio::test]
async fn test_killed_leaf_only_misses_itself() {
    let mut opts = options(TopologyKind::Radix, 10);
    opts.kill = ranks(&[9]);
    let report = launch(opts).await;
    assert_eq!(report.missing, ranks(&[9]));
    assert_eq!(report.reported.len(), 9);
}

#[tokio::test]
async fn test_warmup_orphans_abort_on_lifeline_loss() {
    let mut opts = options(TopologyKind::Binomial, 8);
    opts.warmup = true;
    opts.kill = ranks(&[2]);
    let report = launch(opts).await;
    assert_eq!(report.state, LaunchState::DaemonsLaunched);
    assert_eq!(report.missing, ranks(&[2, 6]));
    assert_eq!(report.aborted, ranks(&[6]));
}

#[tokio::test]
async fn test_invalid_fleets_rejected() {
    let events = Arc::new(EventBus::new());

    let mut opts = options(TopologyKind::Binomial, 4);
    opts.kill = vec![Rank::ROOT];
    assert!(Fleet::launch(opts, Arc::clone(&events)).await.is_err());

    let mut opts = options(TopologyKind::Binomial, 4);
    opts.kill = ranks(&[4]);
    assert!(Fleet::launch(opts, Arc::clone(&events)).await.is_err());

    assert!(Fleet::launch(options(TopologyKind::Binomial, 0), Arc::clone(&events)).await.is_err());

    let mut opts = options(TopologyKind::Radix, 4);
    opts.config.radix = 0;
    assert!(Fleet::launch(opts, events).await.is_err());
}

// ==================== Events ====================

#[tokio::test]
async fn test_launch_emits_events() {
    let events = Arc::new(EventBus::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = events.subscribe(move |event| sink.lock().unwrap().push(event));

    let report = Fleet::launch(options(TopologyKind::Binomial, 6), Arc::clone(&events))
        .await
        .unwrap();
    assert_eq!(report.state, LaunchState::DaemonsReported);

    let seen = seen.lock().unwrap();
    let completions = seen
        .iter()
        .filter(|e| matches!(e, RoutedEvent::PhaseComplete { .. }))
        .count();
    assert_eq!(completions, 6);
    assert!(seen.contains(&RoutedEvent::DaemonsReported { population: 6 }));
    assert!(seen.contains(&RoutedEvent::PhaseComplete {
        rank: Rank::ROOT,
        reports: 4,
        forwarded_to: None,
    }));
}
