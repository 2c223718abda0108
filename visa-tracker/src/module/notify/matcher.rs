use chrono::NaiveDate;
use visa_common::{Subscription, VisaSlotRecord};

/// A subscriber and one record they asked to hear about
#[derive(Debug, Clone, Copy)]
pub struct SlotMatch<'a> {
    pub subscription: &'a Subscription,
    pub record: &'a VisaSlotRecord,
}

/// Every (subscription, record) pair where the record passes the
/// subscription's visa, location and threshold filters as of `today`.
pub fn find_matches<'a>(
    subscriptions: &'a [Subscription],
    records: &'a [VisaSlotRecord],
    today: NaiveDate,
) -> Vec<SlotMatch<'a>> {
    subscriptions
        .iter()
        .flat_map(|subscription| {
            records
                .iter()
                .filter(move |record| subscription.matches(record, today))
                .map(move |record| SlotMatch { subscription, record })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::collections::BTreeSet;
    use visa_common::MatchKey;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 14).unwrap()
    }

    fn record(location: &str, visa: &str, days: Option<i64>) -> VisaSlotRecord {
        VisaSlotRecord {
            location: location.to_string(),
            visa_type: visa_common::split_visa_label(visa).0,
            visa_label: visa.to_string(),
            earliest_date: days.map(|d| today() + Duration::days(d)),
            slot_count: 2,
            appointment_count: 4,
            source_updated_at: None,
            scraped_at: Utc::now(),
        }
    }

    fn subscription(email: &str, visas: &[&str], locations: &[&str], days: u32) -> Subscription {
        Subscription {
            email: email.to_string(),
            visa_types: visas.iter().map(|v| v.to_string()).collect(),
            locations: locations.iter().map(|l| l.to_string()).collect(),
            alert_threshold_days: days,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn keys(matches: &[SlotMatch<'_>]) -> BTreeSet<(String, MatchKey)> {
        matches
            .iter()
            .filter_map(|m| Some((m.subscription.email.clone(), m.record.match_key()?)))
            .collect()
    }

    #[test]
    fn test_threshold_scenarios() {
        let subs = vec![subscription("a@x.com", &["B1"], &["CHENNAI"], 30)];

        let near = vec![record("CHENNAI", "B1", Some(10))];
        assert_eq!(find_matches(&subs, &near, today()).len(), 1);

        let far = vec![record("CHENNAI", "B1", Some(45))];
        assert!(find_matches(&subs, &far, today()).is_empty());
    }

    #[test]
    fn test_one_match_per_subscriber_record_pair() {
        let subs = vec![
            subscription("a@x.com", &["B1", "F1"], &[], 30),
            subscription("b@x.com", &["F1"], &["MUMBAI VAC"], 5),
        ];
        let records = vec![
            record("CHENNAI VAC", "B1 (Regular)", Some(3)),
            record("MUMBAI VAC", "F1 (Dropbox)", Some(4)),
            record("MUMBAI VAC", "F1 (Regular)", Some(20)),
            record("MUMBAI VAC", "H1B", Some(1)),
            record("KOLKATA VAC", "B1", None),
        ];

        let matches = find_matches(&subs, &records, today());
        let a = matches.iter().filter(|m| m.subscription.email == "a@x.com").count();
        let b = matches.iter().filter(|m| m.subscription.email == "b@x.com").count();
        assert_eq!(a, 3);
        assert_eq!(b, 1);
    }

    #[test]
    fn test_matching_ignores_order() {
        let mut subs = vec![
            subscription("a@x.com", &["B1"], &[], 30),
            subscription("b@x.com", &["F1 (Dropbox)"], &[], 30),
        ];
        let mut records = vec![
            record("CHENNAI VAC", "B1 (Regular)", Some(3)),
            record("MUMBAI VAC", "F1 (Dropbox)", Some(4)),
            record("MUMBAI VAC", "F1 (Regular)", Some(6)),
            record("KOLKATA VAC", "B1 (Dropbox)", Some(29)),
        ];

        let forward = keys(&find_matches(&subs, &records, today()));
        subs.reverse();
        records.reverse();
        let backward = keys(&find_matches(&subs, &records, today()));

        assert_eq!(forward.len(), 3);
        assert_eq!(forward, backward);
    }
}
