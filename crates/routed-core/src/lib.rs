//! routed-core: routing trees and launch rollup for a daemon fleet.
//!
//! This crate provides the core functionality for:
//! - Computing the spanning tree over daemon ranks (binomial, radix, direct)
//! - Next-hop lookup and broadcast fan-out over that tree
//! - Aggregating per-daemon launch reports toward the root
//! - Classifying lost connections as pruned subtrees or fatal lifeline loss

pub mod bitmap;
pub mod config;
pub mod contacts;
pub mod error;
pub mod events;
pub mod lifeline;
pub mod protocol;
pub mod rank;
pub mod registry;
pub mod rollup;
pub mod routing;
pub mod transport;

pub use bitmap::{Bitmap, BitmapError};
pub use config::{ConfigError, RoutedConfig};
pub use contacts::ContactDirectory;
pub use error::{Result, RoutedError};
pub use events::{EventBus, RoutedEvent, Subscription};
pub use lifeline::{LifelineMonitor, LossVerdict};
pub use rank::{Rank, RankError};
pub use registry::{DaemonRegistry, FleetRegistry};
pub use rollup::{LaunchState, LaunchTracker, RollupAction, RollupCoordinator, RollupPhase};
pub use routing::{
    select_module, RouteLoss, RoutingModule, RoutingPlan, RoutingState, RoutingTreeNode,
    RuntimeFlags, TopologyKind,
};
pub use transport::{Transport, TransportError, TransportEvent};
