//! Alert delivery
//!
//! Matches subscriptions against scraped records and sends one email per
//! new (subscriber, record) pair. Delivered alerts are remembered in the
//! notification history so later passes do not repeat them.

pub mod history;
pub mod mailer;
pub mod matcher;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use visa_common::{
    MatchKey, NotificationLogEntry, NotificationStatus, Subscription, VisaSlotRecord,
};

pub use history::{EmailHistory, NotificationHistory};
pub use mailer::{Mailer, OutgoingEmail, SmtpMailer};
pub use matcher::{SlotMatch, find_matches};

use super::renderer::Renderer;
use super::stats::StatsStore;
use crate::error::{Result, TrackerError};

/// What one notification pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotifyReport {
    pub matches: usize,
    pub sent: usize,
    pub failed: usize,
    pub duplicates_skipped: usize,
    /// Matches left unsent because no mailer is configured
    pub unsent: usize,
}

pub struct Notifier {
    mailer: Option<Arc<dyn Mailer>>,
    renderer: Arc<Renderer>,
    history: Arc<NotificationHistory>,
    stats: Arc<StatsStore>,
    interval_minutes: u64,
}

fn alert_subject(record: &VisaSlotRecord) -> String {
    match record.earliest_date {
        Some(date) => format!(
            "US visa slot: {} at {} on {}",
            record.visa_label,
            record.location,
            date.format("%d %b %Y")
        ),
        None => format!("US visa slot: {} at {}", record.visa_label, record.location),
    }
}

impl Notifier {
    pub fn new(
        mailer: Option<Arc<dyn Mailer>>,
        renderer: Arc<Renderer>,
        history: Arc<NotificationHistory>,
        stats: Arc<StatsStore>,
        interval_minutes: u64,
    ) -> Self {
        Self {
            mailer,
            renderer,
            history,
            stats,
            interval_minutes,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.mailer.is_some()
    }

    pub fn history(&self) -> &Arc<NotificationHistory> {
        &self.history
    }

    /// Match and send. Send failures are logged and counted; they never
    /// stop the remaining sends. Each attempt is recorded as soon as it
    /// finishes, so a pass cut short keeps what it already delivered.
    pub async fn notify(
        &self,
        subscriptions: &[Subscription],
        records: &[VisaSlotRecord],
        today: NaiveDate,
    ) -> NotifyReport {
        if let Err(e) = self.history.prune_expired(today).await {
            tracing::warn!("Could not prune sent alerts: {}", e);
        }

        let matches = find_matches(subscriptions, records, today);
        let mut report = NotifyReport {
            matches: matches.len(),
            ..Default::default()
        };
        if matches.is_empty() {
            return report;
        }

        let Some(mailer) = &self.mailer else {
            tracing::warn!("Email is not configured; {} matching alerts not sent", matches.len());
            report.unsent = matches.len();
            return report;
        };

        let mut handled: HashSet<(&str, MatchKey)> = HashSet::new();

        for SlotMatch { subscription, record } in matches {
            let Some(key) = record.match_key() else {
                continue;
            };
            if handled.contains(&(subscription.email.as_str(), key.clone()))
                || self.history.already_sent(&subscription.email, &key).await
            {
                tracing::debug!("Already notified {} about {}", subscription.email, key);
                report.duplicates_skipped += 1;
                continue;
            }

            let result = self.send_alert(mailer.as_ref(), subscription, record, today, false).await;
            let status = match &result {
                Ok(()) => {
                    tracing::info!("Alert sent to {} for {}", subscription.email, key);
                    report.sent += 1;
                    NotificationStatus::Sent
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    report.failed += 1;
                    NotificationStatus::Failed { reason: e.to_string() }
                }
            };

            self.remember(NotificationLogEntry {
                email: subscription.email.clone(),
                matched_record_ref: Some(key.clone()),
                sent_at: Utc::now(),
                status,
            })
            .await;
            handled.insert((subscription.email.as_str(), key));
        }

        report
    }

    async fn send_alert(
        &self,
        mailer: &dyn Mailer,
        subscription: &Subscription,
        record: &VisaSlotRecord,
        today: NaiveDate,
        is_test: bool,
    ) -> Result<()> {
        let html_body = self
            .renderer
            .render_alert(subscription, record, today, is_test)
            .map_err(|e| TrackerError::Notification {
                email: subscription.email.clone(),
                reason: e.to_string(),
            })?;
        let subject = if is_test {
            format!("[Test] {}", alert_subject(record))
        } else {
            alert_subject(record)
        };

        mailer
            .send(&OutgoingEmail {
                to: subscription.email.clone(),
                subject,
                html_body,
            })
            .await
    }

    fn mailer(&self) -> Result<&Arc<dyn Mailer>> {
        self.mailer.as_ref().ok_or_else(|| {
            TrackerError::EmailNotConfigured("set VISA_TRACKER_EMAIL and VISA_TRACKER_PASSWORD".to_string())
        })
    }

    /// Welcome email for a new subscription
    pub async fn send_confirmation(&self, subscription: &Subscription) -> Result<()> {
        let mailer = self.mailer()?;
        let html_body = self.renderer.render_confirmation(subscription, self.interval_minutes)?;
        let result = mailer
            .send(&OutgoingEmail {
                to: subscription.email.clone(),
                subject: "US visa slot alerts enabled".to_string(),
                html_body,
            })
            .await;

        self.log_unmatched(&subscription.email, &result).await;
        result
    }

    /// Send a sample alert to `email` so an operator can check SMTP settings.
    ///
    /// Uses the earliest record of `sample` if there is one.
    pub async fn send_test(&self, email: &str, sample: Option<&VisaSlotRecord>) -> Result<()> {
        let mailer = self.mailer()?;
        let now = Utc::now();
        let today = now.date_naive();

        let record = sample.cloned().unwrap_or_else(|| VisaSlotRecord {
            location: "CHENNAI VAC".to_string(),
            visa_type: "B1".to_string(),
            visa_label: "B1 (Regular)".to_string(),
            earliest_date: today.checked_add_days(chrono::Days::new(10)),
            slot_count: 5,
            appointment_count: 12,
            source_updated_at: None,
            scraped_at: now,
        });
        let subscription = Subscription {
            email: email.to_string(),
            visa_types: [record.visa_type.clone()].into(),
            locations: Default::default(),
            alert_threshold_days: 30,
            created_at: now,
            updated_at: now,
        };

        let result = self.send_alert(mailer.as_ref(), &subscription, &record, today, true).await;
        self.log_unmatched(email, &result).await;
        result
    }

    /// History and counters for emails not tied to a record
    async fn log_unmatched(&self, email: &str, result: &Result<()>) {
        let status = match result {
            Ok(()) => NotificationStatus::Sent,
            Err(e) => NotificationStatus::Failed { reason: e.to_string() },
        };
        self.remember(NotificationLogEntry {
            email: email.to_string(),
            matched_record_ref: None,
            sent_at: Utc::now(),
            status,
        })
        .await;
    }

    /// Write one attempt to the history and the counters.
    async fn remember(&self, entry: NotificationLogEntry) {
        let sent = entry.status.is_sent();
        if let Err(e) = self.history.record(entry).await {
            tracing::warn!("Could not write notification history: {}", e);
        }
        self.stats
            .update(|s| {
                if sent {
                    s.emails_sent += 1;
                } else {
                    s.emails_failed += 1;
                }
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<OutgoingEmail>>,
        fail_for: Option<String>,
        hang_for: Option<String>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &OutgoingEmail) -> Result<()> {
            if self.hang_for.as_deref() == Some(email.to.as_str()) {
                std::future::pending::<()>().await;
            }
            if self.fail_for.as_deref() == Some(email.to.as_str()) {
                return Err(TrackerError::Notification {
                    email: email.to.clone(),
                    reason: "relay refused".to_string(),
                });
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 14).unwrap()
    }

    fn record(location: &str, days: i64) -> VisaSlotRecord {
        VisaSlotRecord {
            location: location.to_string(),
            visa_type: "B1".to_string(),
            visa_label: "B1 (Regular)".to_string(),
            earliest_date: Some(today() + Duration::days(days)),
            slot_count: 2,
            appointment_count: 3,
            source_updated_at: None,
            scraped_at: Utc::now(),
        }
    }

    fn subscription(email: &str) -> Subscription {
        Subscription {
            email: email.to_string(),
            visa_types: ["B1".to_string()].into(),
            locations: Default::default(),
            alert_threshold_days: 30,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn notifier(dir: &TempDir, mailer: Option<Arc<dyn Mailer>>) -> Notifier {
        Notifier::new(
            mailer,
            Arc::new(Renderer::new().unwrap()),
            Arc::new(NotificationHistory::open(dir.path()).await.unwrap()),
            Arc::new(StatsStore::open(dir.path()).await.unwrap()),
            10,
        )
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_sends_and_is_retried() {
        let dir = TempDir::new().unwrap();
        let mailer = Arc::new(RecordingMailer {
            fail_for: Some("bad@x.com".to_string()),
            ..Default::default()
        });
        let notifier = notifier(&dir, Some(mailer.clone())).await;

        let subs = vec![subscription("bad@x.com"), subscription("good@x.com")];
        let records = vec![record("CHENNAI VAC", 5)];

        let report = notifier.notify(&subs, &records, today()).await;
        assert_eq!(report.matches, 2);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);

        // the failed one is attempted again, the delivered one is not
        let again = notifier.notify(&subs, &records, today()).await;
        assert_eq!(again.duplicates_skipped, 1);
        assert_eq!(again.failed, 1);
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);

        let stats = notifier.stats.get().await;
        assert_eq!(stats.emails_sent, 1);
        assert_eq!(stats.emails_failed, 2);
    }

    #[tokio::test]
    async fn test_failing_subscriber_cannot_evict_delivered_alerts() {
        let dir = TempDir::new().unwrap();
        let mailer = Arc::new(RecordingMailer {
            fail_for: Some("bad@x.com".to_string()),
            ..Default::default()
        });
        let notifier = notifier(&dir, Some(mailer.clone())).await;

        let mut good = subscription("good@x.com");
        good.locations = ["CHENNAI VAC".to_string()].into();
        let chennai = vec![record("CHENNAI VAC", 5)];
        assert_eq!(notifier.notify(&[good.clone()], &chennai, today()).await.sent, 1);

        // enough failed attempts to push the first alert out of the log
        let flood: Vec<VisaSlotRecord> = (0..250).map(|i| record(&format!("VAC {}", i), 5)).collect();
        let bad = [subscription("bad@x.com")];
        for _ in 0..5 {
            assert_eq!(notifier.notify(&bad, &flood, today()).await.failed, 250);
        }
        assert_eq!(notifier.history().for_email("good@x.com", 5).await.total_emails, 0);

        let again = notifier.notify(&[good], &chennai, today()).await;
        assert_eq!(again.sent, 0);
        assert_eq!(again.duplicates_skipped, 1);
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_pass_keeps_delivered_alerts() {
        let dir = TempDir::new().unwrap();
        let mailer = Arc::new(RecordingMailer {
            hang_for: Some("slow@x.com".to_string()),
            ..Default::default()
        });
        let notifier = notifier(&dir, Some(mailer.clone())).await;

        let subs = vec![subscription("a@x.com"), subscription("slow@x.com")];
        let records = vec![record("CHENNAI VAC", 5)];
        let cut = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            notifier.notify(&subs, &records, today()),
        )
        .await;
        assert!(cut.is_err());
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);

        let key = records[0].match_key().unwrap();
        assert!(notifier.history().already_sent("a@x.com", &key).await);
        assert_eq!(notifier.stats.get().await.emails_sent, 1);

        // a restart sees it too
        let reopened = NotificationHistory::open(dir.path()).await.unwrap();
        assert!(reopened.already_sent("a@x.com", &key).await);
    }

    #[tokio::test]
    async fn test_identical_rows_in_one_pass_send_once() {
        let dir = TempDir::new().unwrap();
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(&dir, Some(mailer.clone())).await;

        let records = vec![record("CHENNAI VAC", 5), record("CHENNAI VAC", 5)];
        let report = notifier.notify(&[subscription("a@x.com")], &records, today()).await;
        assert_eq!(report.sent, 1);
        assert_eq!(report.duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn test_without_mailer_nothing_is_recorded() {
        let dir = TempDir::new().unwrap();
        let notifier = notifier(&dir, None).await;

        let report = notifier
            .notify(&[subscription("a@x.com")], &[record("CHENNAI VAC", 5)], today())
            .await;
        assert_eq!(report.unsent, 1);
        assert_eq!(notifier.history().len().await, 0);
        assert!(matches!(
            notifier.send_test("a@x.com", None).await,
            Err(TrackerError::EmailNotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_confirmation_and_test_email() {
        let dir = TempDir::new().unwrap();
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = notifier(&dir, Some(mailer.clone())).await;

        notifier.send_confirmation(&subscription("a@x.com")).await.unwrap();
        notifier.send_test("ops@x.com", None).await.unwrap();

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].subject, "US visa slot alerts enabled");
        assert!(sent[1].subject.starts_with("[Test]"));
        assert!(sent[1].html_body.contains("test alert"));
    }
}
