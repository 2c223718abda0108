//! Snapshot of one scrape pass and its groupings

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use visa_common::{AvailabilityTier, VisaCategory, VisaSlotRecord};

/// Records produced by one scrape pass. Never mutated once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSnapshot {
    pub fetched_at: DateTime<Utc>,
    pub source_url: String,
    pub records: Vec<VisaSlotRecord>,
}

/// Totals for one category or one location
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub records: usize,
    pub total_slots: u64,
    pub total_appointments: u64,
    pub locations: usize,
    pub visa_types: usize,
}

impl ScrapeSnapshot {
    pub fn empty(source_url: impl Into<String>) -> Self {
        Self {
            fetched_at: Utc::now(),
            source_url: source_url.into(),
            records: Vec::new(),
        }
    }

    pub fn total_slots(&self) -> u64 {
        self.records.iter().map(|r| u64::from(r.slot_count)).sum()
    }

    pub fn total_appointments(&self) -> u64 {
        self.records.iter().map(|r| u64::from(r.appointment_count)).sum()
    }

    pub fn by_category(&self) -> BTreeMap<VisaCategory, Vec<&VisaSlotRecord>> {
        let mut groups: BTreeMap<VisaCategory, Vec<&VisaSlotRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.category()).or_default().push(record);
        }
        groups
    }

    pub fn by_location(&self) -> BTreeMap<&str, Vec<&VisaSlotRecord>> {
        let mut groups: BTreeMap<&str, Vec<&VisaSlotRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.location.as_str()).or_default().push(record);
        }
        groups
    }

    /// Dated records, earliest first. Ties keep snapshot order.
    pub fn earliest(&self, limit: usize) -> Vec<&VisaSlotRecord> {
        let mut dated: Vec<&VisaSlotRecord> = self
            .records
            .iter()
            .filter(|r| r.earliest_date.is_some())
            .collect();
        dated.sort_by_key(|r| r.earliest_date);
        dated.truncate(limit);
        dated
    }

    pub fn tier_counts(&self) -> BTreeMap<AvailabilityTier, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.tier()).or_insert(0) += 1;
        }
        counts
    }
}

impl GroupSummary {
    pub fn from_records(records: &[&VisaSlotRecord]) -> Self {
        let mut locations: Vec<&str> = records.iter().map(|r| r.location.as_str()).collect();
        locations.sort_unstable();
        locations.dedup();
        let mut visa_types: Vec<&str> = records.iter().map(|r| r.visa_label.as_str()).collect();
        visa_types.sort_unstable();
        visa_types.dedup();

        Self {
            records: records.len(),
            total_slots: records.iter().map(|r| u64::from(r.slot_count)).sum(),
            total_appointments: records.iter().map(|r| u64::from(r.appointment_count)).sum(),
            locations: locations.len(),
            visa_types: visa_types.len(),
        }
    }
}
