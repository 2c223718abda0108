///! HTML rendering for alert emails and the dashboard
///!
///! Templates are compiled into the binary and rendered with minijinja.
use chrono::{DateTime, NaiveDate, Utc};
use minijinja::{Environment, context};
use serde::Serialize;
use visa_common::{Subscription, VisaSlotRecord};

use super::slots::{GroupSummary, ScrapeSnapshot};
use crate::error::Result;

const ALERT_TEMPLATE: &str = "alert.html";
const CONFIRMATION_TEMPLATE: &str = "confirmation.html";
const DASHBOARD_TEMPLATE: &str = "dashboard.html";

/// One table row as the templates see it
#[derive(Debug, Serialize)]
struct RecordView<'a> {
    location: &'a str,
    visa_label: &'a str,
    category: &'static str,
    earliest_date: Option<String>,
    slot_count: u32,
    appointment_count: u32,
    tier: &'static str,
}

impl<'a> From<&'a VisaSlotRecord> for RecordView<'a> {
    fn from(record: &'a VisaSlotRecord) -> Self {
        Self {
            location: &record.location,
            visa_label: &record.visa_label,
            category: record.category().display_name(),
            earliest_date: record.earliest_date.map(format_date),
            slot_count: record.slot_count,
            appointment_count: record.appointment_count,
            tier: record.tier().as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CategoryView {
    name: &'static str,
    summary: GroupSummary,
}

fn format_date(date: NaiveDate) -> String {
    date.format("%d %b %Y").to_string()
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub struct Renderer {
    env: Environment<'static>,
}

impl Renderer {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template(ALERT_TEMPLATE, include_str!("../../resources/templates/alert.html"))?;
        env.add_template(
            CONFIRMATION_TEMPLATE,
            include_str!("../../resources/templates/confirmation.html"),
        )?;
        env.add_template(DASHBOARD_TEMPLATE, include_str!("../../resources/templates/dashboard.html"))?;
        Ok(Self { env })
    }

    /// Body of the alert for one matched record
    pub fn render_alert(
        &self,
        subscription: &Subscription,
        record: &VisaSlotRecord,
        today: NaiveDate,
        is_test: bool,
    ) -> Result<String> {
        let template = self.env.get_template(ALERT_TEMPLATE)?;
        Ok(template.render(context! {
            email => &subscription.email,
            threshold_days => subscription.alert_threshold_days,
            location => &record.location,
            visa_label => &record.visa_label,
            category => record.category().display_name(),
            earliest_date => record.earliest_date.map(format_date),
            days_until => record.days_until(today),
            slot_count => record.slot_count,
            appointment_count => record.appointment_count,
            source_updated_at => record.source_updated_at.map(|t| t.to_string()),
            checked_at => format_time(record.scraped_at),
            is_test,
        })?)
    }

    pub fn render_confirmation(&self, subscription: &Subscription, interval_minutes: u64) -> Result<String> {
        let template = self.env.get_template(CONFIRMATION_TEMPLATE)?;
        Ok(template.render(context! {
            email => &subscription.email,
            visa_types => &subscription.visa_types,
            locations => &subscription.locations,
            threshold_days => subscription.alert_threshold_days,
            interval_minutes,
            created_at => format_time(subscription.created_at),
        })?)
    }

    pub fn render_dashboard(
        &self,
        snapshot: Option<&ScrapeSnapshot>,
        subscriptions_count: usize,
        last_check: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let (records, categories) = match snapshot {
            Some(snapshot) => {
                let records: Vec<RecordView<'_>> = snapshot.records.iter().map(RecordView::from).collect();
                let categories: Vec<CategoryView> = snapshot
                    .by_category()
                    .iter()
                    .map(|(category, group)| CategoryView {
                        name: category.display_name(),
                        summary: GroupSummary::from_records(group),
                    })
                    .collect();
                (records, categories)
            }
            None => (Vec::new(), Vec::new()),
        };

        let total_records = records.len();
        let template = self.env.get_template(DASHBOARD_TEMPLATE)?;
        Ok(template.render(context! {
            total_records,
            total_slots => snapshot.map(ScrapeSnapshot::total_slots).unwrap_or(0),
            total_appointments => snapshot.map(ScrapeSnapshot::total_appointments).unwrap_or(0),
            subscriptions_count,
            last_check => last_check.map(format_time),
            source_url => snapshot.map(|s| s.source_url.as_str()),
            categories,
            records,
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(today: NaiveDate) -> VisaSlotRecord {
        VisaSlotRecord {
            location: "CHENNAI VAC".to_string(),
            visa_type: "B1".to_string(),
            visa_label: "B1 (Regular)".to_string(),
            earliest_date: Some(today + Duration::days(10)),
            slot_count: 4,
            appointment_count: 12,
            source_updated_at: None,
            scraped_at: Utc::now(),
        }
    }

    fn subscription() -> Subscription {
        Subscription {
            email: "a@x.com".to_string(),
            visa_types: ["B1".to_string()].into(),
            locations: Default::default(),
            alert_threshold_days: 30,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_alert_mentions_record() {
        let renderer = Renderer::new().unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 8, 14).unwrap();
        let html = renderer.render_alert(&subscription(), &record(today), today, false).unwrap();
        assert!(html.contains("CHENNAI VAC"));
        assert!(html.contains("24 Aug 2025"));
        assert!(html.contains("10 days from today"));
        assert!(html.contains("B1 (Regular)"));
        assert!(!html.contains("test alert"));
    }

    #[test]
    fn test_confirmation_all_locations() {
        let renderer = Renderer::new().unwrap();
        let html = renderer.render_confirmation(&subscription(), 10).unwrap();
        assert!(html.contains("All locations"));
        assert!(html.contains("every 10 minutes"));
    }

    #[test]
    fn test_dashboard_with_and_without_snapshot() {
        let renderer = Renderer::new().unwrap();
        let empty = renderer.render_dashboard(None, 3, None).unwrap();
        assert!(empty.contains("No availability data yet"));
        assert!(empty.contains("not yet"));

        let today = Utc::now().date_naive();
        let snapshot = ScrapeSnapshot {
            fetched_at: Utc::now(),
            source_url: "https://example.com/feed.json".to_string(),
            records: vec![record(today)],
        };
        let html = renderer.render_dashboard(Some(&snapshot), 3, Some(snapshot.fetched_at)).unwrap();
        assert!(html.contains("CHENNAI VAC"));
        assert!(html.contains("<td>12</td>"));
    }
}
