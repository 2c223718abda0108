use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::category::{
    AvailabilityTier, VisaCategory, VisaSubtype, normalize_location, split_visa_label,
};

/// One row of scraped availability
///
/// Category and tier are not stored; they are recomputed from
/// `visa_type` and `slot_count` on every access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisaSlotRecord {
    /// Consulate / VAC name, normalized, e.g. "CHENNAI VAC"
    pub location: String,
    /// Bare visa token, e.g. "B1"
    pub visa_type: String,
    /// Label as published by the source, e.g. "B1 (Dropbox)"
    pub visa_label: String,
    /// Earliest open date; `None` when the source shows no dates
    pub earliest_date: Option<NaiveDate>,
    /// Number of open dates
    pub slot_count: u32,
    /// Number of bookable appointments
    #[serde(default)]
    pub appointment_count: u32,
    /// When the source last refreshed this row
    #[serde(default)]
    pub source_updated_at: Option<NaiveDateTime>,
    pub scraped_at: DateTime<Utc>,
}

impl VisaSlotRecord {
    pub fn category(&self) -> VisaCategory {
        VisaCategory::from_token(&self.visa_type)
    }

    pub fn tier(&self) -> AvailabilityTier {
        AvailabilityTier::from_slot_count(self.slot_count)
    }

    pub fn subtype(&self) -> VisaSubtype {
        split_visa_label(&self.visa_label)
            .1
            .unwrap_or(VisaSubtype::Other)
    }

    /// Days from `today` to the earliest open date (negative if already past)
    pub fn days_until(&self, today: NaiveDate) -> Option<i64> {
        self.earliest_date
            .map(|date| date.signed_duration_since(today).num_days())
    }

    /// Identity used for duplicate-notification suppression
    pub fn match_key(&self) -> Option<MatchKey> {
        self.earliest_date.map(|earliest_date| MatchKey {
            location: self.location.clone(),
            visa_type: self.visa_label.clone(),
            earliest_date,
        })
    }

    /// Same record with `scraped_at` cleared, for content comparisons
    pub fn without_scrape_time(&self) -> Self {
        Self {
            scraped_at: DateTime::<Utc>::default(),
            ..self.clone()
        }
    }
}

/// (location, visa label, earliest date) tuple a subscriber is notified about once
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchKey {
    pub location: String,
    pub visa_type: String,
    pub earliest_date: NaiveDate,
}

impl std::fmt::Display for MatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {} / {}", self.location, self.visa_type, self.earliest_date)
    }
}

/// A subscriber's alert preferences, keyed by email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub email: String,
    /// Bare tokens ("B1") or full labels ("B1 (Dropbox)")
    pub visa_types: BTreeSet<String>,
    /// Empty means every location
    #[serde(default)]
    pub locations: BTreeSet<String>,
    /// Maximum days ahead an earliest date may be and still alert
    pub alert_threshold_days: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn wants_visa(&self, record: &VisaSlotRecord) -> bool {
        let record_subtype = record.subtype();
        self.visa_types.iter().any(|entry| {
            let (token, subtype) = split_visa_label(entry);
            token == record.visa_type && subtype.is_none_or(|s| s == record_subtype)
        })
    }

    pub fn wants_location(&self, record: &VisaSlotRecord) -> bool {
        self.locations.is_empty()
            || self
                .locations
                .iter()
                .any(|loc| normalize_location(loc) == record.location)
    }

    /// Whether the record's earliest date falls inside this subscriber's window
    pub fn within_threshold(&self, record: &VisaSlotRecord, today: NaiveDate) -> bool {
        match record.days_until(today) {
            Some(days) => days >= 0 && days <= i64::from(self.alert_threshold_days),
            None => false,
        }
    }

    pub fn matches(&self, record: &VisaSlotRecord, today: NaiveDate) -> bool {
        self.wants_visa(record) && self.wants_location(record) && self.within_threshold(record, today)
    }
}

/// Outcome of one notification attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NotificationStatus {
    Sent,
    Failed { reason: String },
}

impl NotificationStatus {
    pub fn is_sent(&self) -> bool {
        matches!(self, NotificationStatus::Sent)
    }
}

/// Append-only history of sent alerts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationLogEntry {
    pub email: String,
    /// `None` for confirmation and test emails
    pub matched_record_ref: Option<MatchKey>,
    pub sent_at: DateTime<Utc>,
    pub status: NotificationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(location: &str, label: &str, days_ahead: i64, today: NaiveDate) -> VisaSlotRecord {
        VisaSlotRecord {
            location: location.to_string(),
            visa_type: split_visa_label(label).0,
            visa_label: label.to_string(),
            earliest_date: Some(today + Duration::days(days_ahead)),
            slot_count: 3,
            appointment_count: 5,
            source_updated_at: None,
            scraped_at: Utc::now(),
        }
    }

    fn subscription(visa_types: &[&str], locations: &[&str], threshold: u32) -> Subscription {
        Subscription {
            email: "a@x.com".to_string(),
            visa_types: visa_types.iter().map(|s| s.to_string()).collect(),
            locations: locations.iter().map(|s| s.to_string()).collect(),
            alert_threshold_days: threshold,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_match_within_threshold() {
        let today = NaiveDate::from_ymd_opt(2025, 8, 14).unwrap();
        let sub = subscription(&["B1"], &["CHENNAI"], 30);
        assert!(sub.matches(&record("CHENNAI", "B1", 10, today), today));
        assert!(sub.matches(&record("CHENNAI", "B1", 30, today), today));
        assert!(!sub.matches(&record("CHENNAI", "B1", 45, today), today));
        assert!(!sub.matches(&record("CHENNAI", "B1", -1, today), today));
    }

    #[test]
    fn test_match_requires_visa_and_location() {
        let today = NaiveDate::from_ymd_opt(2025, 8, 14).unwrap();
        let sub = subscription(&["B1"], &["CHENNAI"], 30);
        assert!(!sub.matches(&record("MUMBAI", "B1", 1, today), today));
        assert!(!sub.matches(&record("CHENNAI", "F1", 1, today), today));
    }

    #[test]
    fn test_full_label_restricts_subtype() {
        let today = NaiveDate::from_ymd_opt(2025, 8, 14).unwrap();
        let sub = subscription(&["B1 (Dropbox)"], &[], 30);
        assert!(sub.matches(&record("CHENNAI", "B1 (Dropbox)", 1, today), today));
        assert!(!sub.matches(&record("CHENNAI", "B1 (Regular)", 1, today), today));

        let bare = subscription(&["B1"], &[], 30);
        assert!(bare.matches(&record("CHENNAI", "B1 (Regular)", 1, today), today));
    }

    #[test]
    fn test_empty_locations_match_everywhere() {
        let today = NaiveDate::from_ymd_opt(2025, 8, 14).unwrap();
        let sub = subscription(&["F1"], &[], 7);
        assert!(sub.matches(&record("KOLKATA VAC", "F1", 2, today), today));
    }

    #[test]
    fn test_undated_record_never_matches() {
        let today = NaiveDate::from_ymd_opt(2025, 8, 14).unwrap();
        let mut rec = record("CHENNAI", "B1", 1, today);
        rec.earliest_date = None;
        assert!(!subscription(&["B1"], &["CHENNAI"], 30).matches(&rec, today));
        assert!(rec.match_key().is_none());
    }

    #[test]
    fn test_derived_fields() {
        let today = NaiveDate::from_ymd_opt(2025, 8, 14).unwrap();
        let mut rec = record("CHENNAI", "H-1B (Emergency)", 1, today);
        assert_eq!(rec.visa_type, "H1B");
        assert_eq!(rec.category(), VisaCategory::SkilledWorker);
        assert_eq!(rec.subtype(), VisaSubtype::Emergency);
        assert_eq!(rec.tier(), AvailabilityTier::Medium);
        rec.slot_count = 0;
        assert_eq!(rec.tier(), AvailabilityTier::Low);
    }

    #[test]
    fn test_stored_formats() {
        let failed = NotificationStatus::Failed { reason: "timeout".to_string() };
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({ "state": "failed", "reason": "timeout" })
        );

        // subscriptions written before locations were optional still load
        let sub: Subscription = serde_json::from_str(
            r#"{"email":"a@x.com","visa_types":["B1"],"alert_threshold_days":30,
                "created_at":"2025-08-14T06:00:00Z","updated_at":"2025-08-14T06:00:00Z"}"#,
        )
        .unwrap();
        assert!(sub.locations.is_empty());
    }
}
