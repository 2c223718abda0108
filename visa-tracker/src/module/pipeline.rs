///! One tracker pass: fetch → parse → match → notify
///!
///! Passes are serialized; a manual refresh that arrives during a
///! scheduled pass waits for it and then runs its own.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::notify::{Notifier, NotifyReport};
use super::slots::SlotUpdater;
use super::stats::StatsStore;
use super::subscription::SubscriptionStore;

#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_url: String,
    /// Records produced by this pass (0 when the content was not understood)
    pub records: usize,
    pub subscriptions: usize,
    pub notifications: NotifyReport,
    /// Set when the fetch failed and the pass was skipped
    pub error: Option<String>,
}

impl PassReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Pipeline {
    updater: Arc<SlotUpdater>,
    subscriptions: Arc<SubscriptionStore>,
    notifier: Arc<Notifier>,
    stats: Arc<StatsStore>,
    pass_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        updater: Arc<SlotUpdater>,
        subscriptions: Arc<SubscriptionStore>,
        notifier: Arc<Notifier>,
        stats: Arc<StatsStore>,
    ) -> Self {
        Self {
            updater,
            subscriptions,
            notifier,
            stats,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn updater(&self) -> &Arc<SlotUpdater> {
        &self.updater
    }

    pub async fn run_pass(&self) -> PassReport {
        let _guard = self.pass_lock.lock().await;
        let started_at = Utc::now();
        tracing::info!("Starting tracker pass");

        let subscriptions = self.subscriptions.list().await;
        let mut report = PassReport {
            started_at,
            finished_at: started_at,
            source_url: self.updater.source_url().to_string(),
            records: 0,
            subscriptions: subscriptions.len(),
            notifications: NotifyReport::default(),
            error: None,
        };

        match self.updater.update().await {
            Ok(snapshot) => {
                report.records = snapshot.records.len();
                report.source_url = snapshot.source_url.clone();
                report.notifications = self
                    .notifier
                    .notify(&subscriptions, &snapshot.records, Utc::now().date_naive())
                    .await;
            }
            Err(e) => {
                tracing::error!("Scrape failed, skipping this pass: {}", e);
                report.error = Some(e.to_string());
            }
        }

        report.finished_at = Utc::now();
        self.stats
            .update(|s| {
                s.checks_performed += 1;
                s.last_check = Some(report.finished_at);
            })
            .await;

        tracing::info!(
            "Pass finished: {} records, {} subscriptions, {} matches, {} sent, {} failed, {} duplicates",
            report.records,
            report.subscriptions,
            report.notifications.matches,
            report.notifications.sent,
            report.notifications.failed,
            report.notifications.duplicates_skipped
        );
        report
    }
}
