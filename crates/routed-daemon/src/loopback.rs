//! In-process transport connecting the daemons of a simulated fleet.
//!
//! Every daemon owns one unbounded inbox. Severing a rank drops its inbox
//! and tells every other daemon that the connection is gone.

use async_trait::async_trait;
use routed_core::protocol::Tag;
use routed_core::transport::{Result, Transport, TransportError, TransportEvent};
use routed_core::Rank;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct HubInner {
    endpoints: HashMap<Rank, mpsc::UnboundedSender<TransportEvent>>,
    severed: HashSet<Rank>,
}

/// Switchboard shared by all loopback endpoints.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<RwLock<HubInner>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the endpoint for `rank`.
    pub fn register(&self, rank: Rank) -> (LoopbackTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.endpoints.insert(rank, tx);
        inner.severed.remove(&rank);
        (
            LoopbackTransport {
                rank,
                hub: self.clone(),
            },
            rx,
        )
    }

    /// Take `rank` off the network and notify everyone still attached.
    pub fn sever(&self, rank: Rank) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !inner.severed.insert(rank) {
            return;
        }
        inner.endpoints.remove(&rank);
        debug!("severed {}, notifying {} endpoints", rank, inner.endpoints.len());
        for tx in inner.endpoints.values() {
            // receivers that already shut down do not need the notice
            let _ = tx.send(TransportEvent::ConnectionLost { rank });
        }
    }

    pub fn is_alive(&self, rank: Rank) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.endpoints.contains_key(&rank)
    }

    fn deliver(&self, dest: Rank, event: TransportEvent) -> Result<()> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let tx = inner
            .endpoints
            .get(&dest)
            .ok_or(TransportError::Unreachable(dest))?;
        tx.send(event).map_err(|_| TransportError::Closed)
    }
}

/// One daemon's view of the hub.
pub struct LoopbackTransport {
    rank: Rank,
    hub: LoopbackHub,
}

impl LoopbackTransport {
    pub fn uri(&self) -> String {
        format!("loop://{}", self.rank)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn local_rank(&self) -> Rank {
        self.rank
    }

    async fn send_tagged(&self, dest: Rank, tag: Tag, bytes: Vec<u8>) -> Result<()> {
        self.hub.deliver(
            dest,
            TransportEvent::Message {
                from: self.rank,
                tag,
                bytes,
            },
        )
    }
}
