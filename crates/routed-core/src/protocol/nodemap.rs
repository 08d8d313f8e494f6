//! Node map: population size and the host of every daemon.

use super::{decode, encode};
use crate::error::{Result, RoutedError};
use crate::Rank;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMap {
    pub population: u32,
    /// Hostname per rank, indexed by rank
    pub hostnames: Vec<String>,
}

impl NodeMap {
    /// One host per daemon, named `{prefix}{rank}`.
    pub fn uniform(population: u32, prefix: &str) -> Self {
        Self {
            population,
            hostnames: (0..population).map(|r| format!("{}{}", prefix, r)).collect(),
        }
    }

    pub fn hostname(&self, rank: Rank) -> Option<&str> {
        self.hostnames.get(rank.index()).map(String::as_str)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self)
    }

    /// Decode and check that every rank has a hostname.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let map: Self = decode(bytes)?;
        if map.population == 0 || map.hostnames.len() != map.population as usize {
            return Err(RoutedError::BadParam(format!(
                "node map lists {} hosts for a population of {}",
                map.hostnames.len(),
                map.population
            )));
        }
        Ok(map)
    }
}
