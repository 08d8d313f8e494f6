//! Route-loss and lifeline monitoring.
//!
//! Classifies every "connection to rank R lost" notification:
//! 1. R is the lifeline and we are not finalizing: fatal
//! 2. R is a direct child: the child and its relatives leave the tree
//! 3. Anything else: ignored

use crate::error::{Result, RoutedError};
use crate::events::{EventBus, RoutedEvent};
use crate::routing::{RouteLoss, RoutingModule};
use crate::Rank;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of a lost connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LossVerdict {
    /// The lifeline is gone; the caller must shut down.
    Fatal { lost: Rank, reason: String },
    /// A direct child was removed together with its subtree.
    SubtreePruned { child: Rank, pruned: Vec<Rank> },
    /// An edge the local tree does not depend on.
    Irrelevant { lost: Rank },
}

impl LossVerdict {
    pub fn is_fatal(&self) -> bool {
        matches!(self, LossVerdict::Fatal { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            LossVerdict::Fatal { .. } => "fatal",
            LossVerdict::SubtreePruned { .. } => "pruned",
            LossVerdict::Irrelevant { .. } => "irrelevant",
        }
    }
}

/// Receives connection-lost notifications and applies them to the router.
#[derive(Default)]
pub struct LifelineMonitor {
    events: Option<Arc<EventBus>>,
    losses: usize,
}

impl LifelineMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Arc<EventBus>) -> Self {
        Self {
            events: Some(events),
            losses: 0,
        }
    }

    /// Number of notifications handled so far.
    pub fn losses(&self) -> usize {
        self.losses
    }

    /// Classify the loss of `lost` and update the router accordingly.
    ///
    /// Errors other than `Fatal` (e.g. `BadParam` for `Rank::INVALID`) are
    /// returned as-is.
    pub fn on_connection_lost(
        &mut self,
        router: &mut dyn RoutingModule,
        lost: Rank,
    ) -> Result<LossVerdict> {
        let me = router.my_rank();
        let verdict = match router.route_lost(lost) {
            Ok(RouteLoss::ChildPruned(child)) => {
                info!("{} lost child {}, pruning its subtree", me, child.rank);
                LossVerdict::SubtreePruned {
                    child: child.rank,
                    pruned: child.subtree(),
                }
            }
            Ok(RouteLoss::Irrelevant) => {
                debug!("{} lost connection to {}, not on the tree", me, lost);
                LossVerdict::Irrelevant { lost }
            }
            Err(RoutedError::Fatal(reason)) => {
                error!("{} {}", me, reason);
                LossVerdict::Fatal { lost, reason }
            }
            Err(err) => return Err(err),
        };
        self.losses += 1;

        if let Some(events) = &self.events {
            let pruned = match &verdict {
                LossVerdict::SubtreePruned { pruned, .. } => pruned.clone(),
                _ => Vec::new(),
            };
            events.emit(RoutedEvent::RouteLost {
                rank: me,
                lost,
                verdict: verdict.label().to_string(),
                pruned,
            });
        }
        Ok(verdict)
    }
}
