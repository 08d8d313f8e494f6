//! Launch-completion aggregation.
//!
//! - [`RollupCoordinator`] runs on every daemon and merges its subtree
//! - [`LaunchTracker`] runs on the root and accounts for every daemon

pub mod coordinator;
pub mod launch;

pub use coordinator::{RollupAction, RollupCoordinator, RollupPhase};
pub use launch::{DaemonRecord, LaunchState, LaunchTracker};
