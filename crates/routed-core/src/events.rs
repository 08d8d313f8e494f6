//! Event infrastructure for routed-core.
//!
//! Provides `RoutedEvent` for debug/monitoring and `EventBus` for
//! subscriptions. The bus is shared as `Arc<EventBus>` across the daemon
//! tasks of a fleet.

use crate::Rank;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted by the routing and rollup core for real-time monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RoutedEvent {
    /// A routing plan was (re)computed.
    PlanUpdated {
        rank: Rank,
        parent: Option<Rank>,
        children: Vec<Rank>,
    },
    /// A connection-lost notification was classified.
    RouteLost {
        rank: Rank,
        lost: Rank,
        /// "fatal", "pruned" or "irrelevant"
        verdict: String,
        /// Ranks dropped from routing, child first
        pruned: Vec<Rank>,
    },
    /// A rollup report was accepted.
    ReportReceived {
        rank: Rank,
        from: Rank,
        /// Payload size in bytes.
        size: usize,
    },
    /// A rollup phase completed on this daemon.
    PhaseComplete {
        rank: Rank,
        /// Reports counted, self included.
        reports: usize,
        /// Parent the merged payload went to; `None` on the root.
        #[serde(rename = "forwardedTo")]
        forwarded_to: Option<Rank>,
    },
    /// Every daemon in the population reported to the root.
    DaemonsReported { population: u32 },
    /// The launch cannot complete.
    LaunchFailed { rank: Rank, reason: String },
}

type Callback = Arc<dyn Fn(RoutedEvent) + Send + Sync>;

/// Fan-out of [`RoutedEvent`]s to registered callbacks.
///
/// Shared as `Arc<EventBus>`; each registration is held by a
/// [`Subscription`].
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<BTreeMap<usize, Callback>>,
    next_id: AtomicUsize,
}

/// Keeps a callback registered until dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        // a drop inside a callback must not wait on the emitting thread
        if let Ok(mut subscribers) = bus.subscribers.try_write() {
            subscribers.remove(&self.id);
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(RoutedEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(callback));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver `event` to every callback registered at the time of the call.
    pub fn emit(&self, event: RoutedEvent) {
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(event.clone());
        }
    }
}
