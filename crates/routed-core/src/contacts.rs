//! Process-wide contact directory.
//!
//! Filled from the "extra info" block of rollup reports and from URI
//! batches. The lock is held only across a single insert or lookup.

use crate::error::{Result, RoutedError};
use crate::protocol::{ContactInfo, UriBatch};
use crate::Rank;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

#[derive(Default)]
pub struct ContactDirectory {
    entries: RwLock<HashMap<Rank, ContactInfo>>,
}

impl ContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store contact info for `rank`, replacing any previous entry.
    pub fn import(&self, rank: Rank, info: ContactInfo) -> Result<()> {
        if !rank.is_valid() {
            return Err(RoutedError::bad_rank("contact rank", rank));
        }
        debug!("contact for {}: {}", rank, info.uri);
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(rank, info);
        Ok(())
    }

    pub fn lookup(&self, rank: Rank) -> Option<ContactInfo> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&rank)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a batch of `(rank, uri)` pairs.
    ///
    /// A missing uri is `Fatal`. Ranks for which `is_known` is false are
    /// logged and skipped. Returns the number of entries applied.
    pub fn apply_uri_batch<F>(&self, batch: &UriBatch, is_known: F) -> Result<usize>
    where
        F: Fn(Rank) -> bool,
    {
        let mut applied = 0;
        for (rank, uri) in &batch.entries {
            let Some(uri) = uri else {
                return Err(RoutedError::Fatal(format!("no contact uri for rank {}", rank)));
            };
            if !is_known(*rank) {
                warn!("skipping contact for unknown rank {}", rank);
                continue;
            }
            self.import(*rank, ContactInfo { uri: uri.clone() })?;
            applied += 1;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(uri: &str) -> ContactInfo {
        ContactInfo { uri: uri.into() }
    }

    #[test]
    fn test_import_and_lookup() {
        let dir = ContactDirectory::new();
        assert!(dir.is_empty());
        dir.import(Rank::new(2), info("loop://2")).unwrap();
        assert_eq!(dir.lookup(Rank::new(2)), Some(info("loop://2")));
        assert_eq!(dir.lookup(Rank::new(3)), None);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_import_rejects_invalid_rank() {
        let dir = ContactDirectory::new();
        assert!(matches!(
            dir.import(Rank::INVALID, info("x")),
            Err(RoutedError::BadParam(_))
        ));
    }

    #[test]
    fn test_uri_batch_skips_unknown() {
        let dir = ContactDirectory::new();
        let batch = UriBatch {
            entries: vec![
                (Rank::new(1), Some("loop://1".into())),
                (Rank::new(9), Some("loop://9".into())),
            ],
        };
        let applied = dir.apply_uri_batch(&batch, |r| r.as_u32() < 4).unwrap();
        assert_eq!(applied, 1);
        assert!(dir.lookup(Rank::new(9)).is_none());
    }

    #[test]
    fn test_uri_batch_missing_uri_is_fatal() {
        let dir = ContactDirectory::new();
        let batch = UriBatch {
            entries: vec![(Rank::new(1), None)],
        };
        let err = dir.apply_uri_batch(&batch, |_| true).unwrap_err();
        assert!(err.is_fatal());
    }
}
