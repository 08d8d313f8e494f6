//! Envelopes for routed point-to-point messages and broadcasts.

use super::{decode, encode};
use crate::error::Result;
use crate::Rank;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutedKind {
    Probe,
    ProbeReply,
}

/// A message forwarded hop by hop until it reaches `dest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedEnvelope {
    pub origin: Rank,
    pub dest: Rank,
    pub kind: RoutedKind,
    /// Hops taken so far
    pub hops: u32,
    pub body: Vec<u8>,
}

impl RoutedEnvelope {
    pub fn new(origin: Rank, dest: Rank, kind: RoutedKind, body: Vec<u8>) -> Self {
        Self {
            origin,
            dest,
            kind,
            hops: 0,
            body,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum XcastCommand {
    /// Informational text, logged by every daemon
    Announce(String),
    /// Shut down after relaying
    Exit,
}

/// A broadcast relayed over each daemon's routing list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XcastEnvelope {
    pub origin: Rank,
    pub command: XcastCommand,
    /// Sent straight to every daemon; receivers must not relay it
    pub direct: bool,
}

impl XcastEnvelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}
