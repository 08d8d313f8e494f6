//! routed-daemon library: Exposes the daemon components for the binary
//! and for integration tests.
//!
//! - `loopback`: in-process transport between simulated daemons
//! - `node`: the per-daemon message loop
//! - `fleet`: launches a whole fleet and reports on it
//! - `settings`: configuration precedence for the binary

pub mod fleet;
pub mod loopback;
pub mod node;
pub mod settings;

pub use fleet::{Fleet, FleetOptions, FleetReport};
pub use loopback::{LoopbackHub, LoopbackTransport};
pub use node::{DaemonNode, LaunchSummary, NodeOptions, NodeOutcome, NodeReport};
pub use settings::{resolve_config, CliOverrides};
