//! Root-side accounting of daemon reports.

use crate::bitmap::Bitmap;
use crate::contacts::ContactDirectory;
use crate::error::{Result, RoutedError};
use crate::events::{EventBus, RoutedEvent};
use crate::protocol::{decode_reports, ContactInfo, DaemonReport};
use crate::Rank;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    DaemonsLaunched,
    DaemonsReported,
    FailedToStart,
}

/// What the root learned about one daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonRecord {
    pub hostname: String,
    pub contact: Option<ContactInfo>,
    pub topology_signature: String,
}

pub struct LaunchTracker {
    population: u32,
    reported: Bitmap,
    records: BTreeMap<Rank, DaemonRecord>,
    state: LaunchState,
    events: Option<Arc<EventBus>>,
}

impl LaunchTracker {
    pub fn new(population: u32) -> Self {
        Self {
            population,
            reported: Bitmap::with_capacity(population as usize),
            records: BTreeMap::new(),
            state: LaunchState::DaemonsLaunched,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    pub fn num_reported(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, rank: Rank) -> Option<&DaemonRecord> {
        self.records.get(&rank)
    }

    pub fn records(&self) -> impl Iterator<Item = (&Rank, &DaemonRecord)> {
        self.records.iter()
    }

    /// Ranks that have not reported yet.
    pub fn missing(&self) -> Vec<Rank> {
        (0..self.population)
            .map(Rank::new)
            .filter(|rank| !self.reported.is_set(rank.index()))
            .collect()
    }

    /// Account for every report in a merged rollup payload.
    pub fn record_payload(&mut self, payload: &[u8], contacts: &ContactDirectory) -> Result<LaunchState> {
        for report in decode_reports(payload)? {
            self.record_report(report, contacts)?;
        }
        Ok(self.state)
    }

    pub fn record_report(&mut self, report: DaemonReport, contacts: &ContactDirectory) -> Result<()> {
        if self.state == LaunchState::FailedToStart {
            return Err(RoutedError::Fatal("launch already failed".into()));
        }

        let rank = report.rank;
        if !rank.is_valid() || rank.as_u32() >= self.population {
            self.state = LaunchState::FailedToStart;
            let reason = format!(
                "report from rank {} outside population of {}",
                rank, self.population
            );
            error!("{}", reason);
            self.emit(RoutedEvent::LaunchFailed {
                rank,
                reason: reason.clone(),
            });
            return Err(RoutedError::BadParam(reason));
        }
        if self.reported.is_set(rank.index()) {
            return Err(RoutedError::Duplicate(rank));
        }

        self.reported.set_bit(rank.index())?;
        if let Some(contact) = &report.contact {
            contacts.import(rank, contact.clone())?;
        }
        self.records.insert(
            rank,
            DaemonRecord {
                hostname: report.hostname,
                contact: report.contact,
                topology_signature: report.topology_signature,
            },
        );

        if self.state == LaunchState::DaemonsLaunched && self.records.len() == self.population as usize {
            self.state = LaunchState::DaemonsReported;
            info!("all {} daemons reported", self.population);
            self.emit(RoutedEvent::DaemonsReported {
                population: self.population,
            });
        }
        Ok(())
    }

    fn emit(&self, event: RoutedEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}
