//! Message tags, one per inbound handler.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// Rollup report travelling toward the root
    DaemonCallback,
    /// Node map pushed from a parent to its children
    NodeRegexReport,
    /// Rendezvous message opening the connection to the parent
    WarmupConnection,
    /// Broadcast relayed down the tree
    Xcast,
    /// Point-to-point message forwarded hop by hop
    Routed,
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::DaemonCallback => "daemon-callback",
            Tag::NodeRegexReport => "node-regex-report",
            Tag::WarmupConnection => "warmup-connection",
            Tag::Xcast => "xcast",
            Tag::Routed => "routed",
        };
        f.write_str(name)
    }
}
