//! Which daemon hosts a given rank.

use crate::Rank;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

/// Process/job registry consulted by the routing modules.
pub trait DaemonRegistry: Send + Sync {
    /// Number of daemons in the job.
    fn daemon_count(&self) -> u32;

    /// Daemon hosting `target`, or `None` if no daemon is known to host it.
    fn hosting_daemon_of(&self, target: Rank) -> Option<Rank>;
}

/// Registry for a daemon-only job: every rank below the population hosts
/// itself, plus optional placements for ranks that live on another daemon.
///
/// The population grows when a node map arrives, so it is shared through
/// `Arc` and updated in place.
#[derive(Default)]
pub struct FleetRegistry {
    population: AtomicU32,
    placements: RwLock<HashMap<Rank, Rank>>,
}

impl FleetRegistry {
    pub fn new(population: u32) -> Self {
        Self {
            population: AtomicU32::new(population),
            placements: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_population(&self, population: u32) {
        self.population.store(population, Ordering::SeqCst);
    }

    /// Record that `rank` runs on `daemon`.
    pub fn place(&self, rank: Rank, daemon: Rank) {
        self.placements
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(rank, daemon);
    }
}

impl DaemonRegistry for FleetRegistry {
    fn daemon_count(&self) -> u32 {
        self.population.load(Ordering::SeqCst)
    }

    fn hosting_daemon_of(&self, target: Rank) -> Option<Rank> {
        if !target.is_valid() {
            return None;
        }
        if let Some(daemon) = self
            .placements
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&target)
        {
            return Some(*daemon);
        }
        (target.as_u32() < self.daemon_count()).then_some(target)
    }
}
