//! Wire records exchanged between daemons.
//!
//! Everything on the wire is bincode. Rollup payloads are runs of
//! concatenated [`DaemonReport`]s; the routing core itself treats them as
//! opaque bytes.

pub mod envelope;
pub mod nodemap;
pub mod report;
pub mod tags;

pub use envelope::{RoutedEnvelope, RoutedKind, XcastCommand, XcastEnvelope};
pub use nodemap::NodeMap;
pub use report::{decode_reports, CallbackEnvelope, ContactInfo, DaemonReport, UriBatch};
pub use tags::Tag;

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize an in-memory record.
pub(crate) fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).expect("record serialization should not fail")
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
