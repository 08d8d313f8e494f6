//! Rollup records: one daemon's report and the envelope carrying a run of
//! them to the parent.

use super::{decode, encode};
use crate::error::Result;
use crate::Rank;
use serde::{Deserialize, Serialize};

/// How to reach a daemon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactInfo {
    pub uri: String,
}

/// A daemon's own contribution to the rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonReport {
    pub rank: Rank,
    pub hostname: String,
    pub contact: Option<ContactInfo>,
    /// Summary of the node's hardware topology
    pub topology_signature: String,
}

impl DaemonReport {
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self)
    }
}

/// Walk a run of concatenated reports.
pub fn decode_reports(mut bytes: &[u8]) -> Result<Vec<DaemonReport>> {
    let mut reports = Vec::new();
    while !bytes.is_empty() {
        let report: DaemonReport = bincode::deserialize_from(&mut bytes)?;
        reports.push(report);
    }
    Ok(reports)
}

/// Body of a `DaemonCallback` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackEnvelope {
    /// Concatenated reports of the sender's subtree, sender first
    pub payload: Vec<u8>,
    /// The sender's own contact info
    pub extra: Option<ContactInfo>,
}

impl CallbackEnvelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

/// `(rank, uri)` pairs pushed to daemons that need contact info.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriBatch {
    pub entries: Vec<(Rank, Option<String>)>,
}

impl UriBatch {
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RoutedError;

    fn report(rank: u32) -> DaemonReport {
        DaemonReport {
            rank: Rank::new(rank),
            hostname: format!("node{}", rank),
            contact: Some(ContactInfo {
                uri: format!("loop://{}", rank),
            }),
            topology_signature: "4c".into(),
        }
    }

    #[test]
    fn test_concatenated_reports_decode_in_order() {
        let mut bytes = report(2).to_bytes();
        bytes.extend(report(0).to_bytes());
        bytes.extend(report(5).to_bytes());

        let ranks: Vec<u32> = decode_reports(&bytes)
            .unwrap()
            .iter()
            .map(|r| r.rank.as_u32())
            .collect();
        assert_eq!(ranks, vec![2, 0, 5]);
    }

    #[test]
    fn test_empty_payload_has_no_reports() {
        assert!(decode_reports(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_payload_is_codec_error() {
        let bytes = report(1).to_bytes();
        let err = decode_reports(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, RoutedError::Codec(_)));
    }
}
