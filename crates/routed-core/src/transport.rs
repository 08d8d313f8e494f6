//! Transport trait consumed by the daemon message loop.
//!
//! Implementations deliver inbound traffic as [`TransportEvent`]s on a
//! single queue per daemon, so the routing and rollup state is only ever
//! touched from one task.

use crate::protocol::Tag;
use crate::Rank;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Rank not reachable: {0}")]
    Unreachable(Rank),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Inbound event for one daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message { from: Rank, tag: Tag, bytes: Vec<u8> },
    /// The connection to `rank` is gone
    ConnectionLost { rank: Rank },
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Rank this endpoint sends as.
    fn local_rank(&self) -> Rank;

    /// Deliver `bytes` to `dest` under `tag`.
    async fn send_tagged(&self, dest: Rank, tag: Tag, bytes: Vec<u8>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        rank: Rank,
        sent: Mutex<Vec<(Rank, Tag, usize)>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        fn local_rank(&self) -> Rank {
            self.rank
        }

        async fn send_tagged(&self, dest: Rank, tag: Tag, bytes: Vec<u8>) -> Result<()> {
            if !dest.is_valid() {
                return Err(TransportError::Unreachable(dest));
            }
            self.sent.lock().unwrap().push((dest, tag, bytes.len()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_through_trait_object() {
        let recorder = Arc::new(Recorder {
            rank: Rank::new(2),
            sent: Mutex::new(Vec::new()),
        });
        let transport: Arc<dyn Transport> = recorder.clone();

        assert_eq!(transport.local_rank(), Rank::new(2));
        transport
            .send_tagged(Rank::ROOT, Tag::DaemonCallback, vec![0; 3])
            .await
            .unwrap();
        let err = transport
            .send_tagged(Rank::INVALID, Tag::Xcast, Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Rank not reachable: INVALID");
        assert_eq!(
            *recorder.sent.lock().unwrap(),
            vec![(Rank::ROOT, Tag::DaemonCallback, 3)]
        );
    }
}
