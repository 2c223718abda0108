//! Wiring of the tracker components into shared application state

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{EmailConfig, TrackerConfig};
use crate::error::Result;
use crate::module::notify::{Mailer, NotificationHistory, Notifier};
use crate::module::pipeline::Pipeline;
use crate::module::renderer::Renderer;
use crate::module::slots::{PageSource, SlotUpdater, SnapshotHandle};
use crate::module::stats::StatsStore;
use crate::module::subscription::SubscriptionStore;

/// Everything the HTTP handlers and the scheduler share
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub subscriptions: Arc<SubscriptionStore>,
    pub notifier: Arc<Notifier>,
    pub history: Arc<NotificationHistory>,
    pub stats: Arc<StatsStore>,
    pub renderer: Arc<Renderer>,
    pub snapshot: SnapshotHandle,
    pub email: Arc<EmailConfig>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Open the on-disk stores under the configured data directory and
    /// connect them. A corrupt subscriptions file fails here.
    pub async fn build(
        config: &TrackerConfig,
        source: Arc<dyn PageSource>,
        mailer: Option<Arc<dyn Mailer>>,
    ) -> Result<Self> {
        let data_dir = config.storage.data_dir.clone();

        let subscriptions = Arc::new(SubscriptionStore::open(&data_dir).await?);
        let history = Arc::new(NotificationHistory::open(&data_dir).await?);
        let stats = Arc::new(StatsStore::open(&data_dir).await?);
        let renderer = Arc::new(Renderer::new()?);

        let updater = Arc::new(SlotUpdater::new(source, config.scraper.source_url.clone(), data_dir));
        updater.load_cached().await;
        let snapshot = updater.snapshot_handle();

        let notifier = Arc::new(Notifier::new(
            mailer,
            renderer.clone(),
            history.clone(),
            stats.clone(),
            config.scraper.interval_minutes,
        ));
        let pipeline = Arc::new(Pipeline::new(
            updater,
            subscriptions.clone(),
            notifier.clone(),
            stats.clone(),
        ));

        Ok(Self {
            pipeline,
            subscriptions,
            notifier,
            history,
            stats,
            renderer,
            snapshot,
            email: Arc::new(config.email.clone()),
            started_at: Utc::now(),
        })
    }
}
