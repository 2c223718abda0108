///! Visa availability updater
///!
///! Fetches the availability source, parses it, and publishes the result
///! as the latest snapshot. Readers hold an `Arc` to whatever snapshot was
///! current when they looked; publication is a pointer swap.
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use super::cache;
use super::fetcher::PageSource;
use super::parser::{find_feed_url, parse_availability};
use super::types::ScrapeSnapshot;
use crate::error::{Result, TrackerError};

pub type SnapshotHandle = Arc<RwLock<Option<Arc<ScrapeSnapshot>>>>;

pub struct SlotUpdater {
    source: Arc<dyn PageSource>,
    source_url: String,
    data_dir: PathBuf,
    /// Most recent non-empty snapshot (None until the first good pass)
    snapshot: SnapshotHandle,
}

impl SlotUpdater {
    pub fn new(source: Arc<dyn PageSource>, source_url: impl Into<String>, data_dir: PathBuf) -> Self {
        Self {
            source,
            source_url: source_url.into(),
            data_dir,
            snapshot: Arc::new(RwLock::new(None)),
        }
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn snapshot_handle(&self) -> SnapshotHandle {
        self.snapshot.clone()
    }

    pub async fn latest(&self) -> Option<Arc<ScrapeSnapshot>> {
        self.snapshot.read().await.clone()
    }

    /// Publish the on-disk snapshot from a previous run, if any.
    pub async fn load_cached(&self) -> bool {
        match cache::load_snapshot(&self.data_dir).await {
            Some(snapshot) => {
                tracing::info!(
                    "Loaded cached snapshot: {} records from {}",
                    snapshot.records.len(),
                    snapshot.fetched_at
                );
                *self.snapshot.write().await = Some(Arc::new(snapshot));
                true
            }
            None => false,
        }
    }

    /// Fetch → parse one cycle.
    ///
    /// Returns the records of this pass, possibly empty. Only a non-empty
    /// result replaces the published snapshot. A fetch failure is returned
    /// as an error; unrecognized content is logged and yields no records.
    pub async fn update(&self) -> Result<Arc<ScrapeSnapshot>> {
        tracing::info!("Fetching visa availability from {}", self.source_url);
        let content = self.source.fetch(&self.source_url).await?;
        let fetched_at = Utc::now();

        let (records, used_url) = match parse_availability(&content, fetched_at) {
            Ok(records) => (records, self.source_url.clone()),
            Err(TrackerError::Parse(reason)) => match find_feed_url(&content) {
                Some(feed_url) if feed_url != self.source_url => {
                    tracing::info!("Page has no table ({}), following feed link {}", reason, feed_url);
                    let feed = self.source.fetch(&feed_url).await?;
                    match parse_availability(&feed, fetched_at) {
                        Ok(records) => (records, feed_url),
                        Err(e) => {
                            tracing::warn!("Feed at {} not understood: {}", feed_url, e);
                            (Vec::new(), feed_url)
                        }
                    }
                }
                _ => {
                    tracing::warn!("Availability content not understood: {}", reason);
                    (Vec::new(), self.source_url.clone())
                }
            },
            Err(e) => return Err(e),
        };

        let snapshot = Arc::new(ScrapeSnapshot {
            fetched_at,
            source_url: used_url,
            records,
        });

        if snapshot.records.is_empty() {
            tracing::warn!("Scrape produced no records; keeping previous snapshot");
            return Ok(snapshot);
        }

        tracing::info!(
            "Visa snapshot: {} records, {} open dates, fetched at {}",
            snapshot.records.len(),
            snapshot.total_slots(),
            snapshot.fetched_at
        );

        *self.snapshot.write().await = Some(snapshot.clone());

        if let Err(e) = cache::save_snapshot(&self.data_dir, &snapshot).await {
            tracing::warn!("Failed to cache snapshot: {}", e);
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const FEED_URL: &str = "https://cvs-data-public.s3.us-east-1.amazonaws.com/last-availability.json";

    struct CannedSource(HashMap<String, String>);

    #[async_trait]
    impl PageSource for CannedSource {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| TrackerError::Fetch(format!("{} returned HTTP 404", url)))
        }
    }

    fn feed() -> String {
        r#"{"result":{"B1 (Regular)":[{"visa_location":"CHENNAI VAC","createdon":"2025-08-14 06:01:34","no_of_dates":3,"no_of_apnts":9,"earliest_date":"27 Aug, 25"}]}}"#.to_string()
    }

    fn updater(pages: Vec<(&str, String)>, dir: &TempDir) -> SlotUpdater {
        let pages = pages.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        SlotUpdater::new(
            Arc::new(CannedSource(pages)),
            "https://checkvisaslots.com/latest-us-visa-availability.html",
            dir.path().to_path_buf(),
        )
    }

    #[tokio::test]
    async fn test_follows_feed_link_and_publishes() {
        let dir = TempDir::new().unwrap();
        let page = format!(r#"<html><script src="x.js"></script><script>load("{}")</script></html>"#, FEED_URL);
        let updater = updater(
            vec![
                ("https://checkvisaslots.com/latest-us-visa-availability.html", page),
                (FEED_URL, feed()),
            ],
            &dir,
        );

        let snapshot = updater.update().await.unwrap();
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.source_url, FEED_URL);
        assert!(updater.latest().await.is_some());

        // a fresh updater picks the cached copy up
        let restarted = SlotUpdater::new(Arc::new(CannedSource(HashMap::new())), FEED_URL, dir.path().to_path_buf());
        assert!(restarted.load_cached().await);
        assert_eq!(restarted.latest().await.unwrap().records.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_result_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let good = SlotUpdater::new(
            Arc::new(CannedSource(HashMap::from([(FEED_URL.to_string(), feed())]))),
            FEED_URL,
            dir.path().to_path_buf(),
        );
        good.update().await.unwrap();
        let handle = good.snapshot_handle();

        let empty = SlotUpdater {
            source: Arc::new(CannedSource(HashMap::from([(
                FEED_URL.to_string(),
                "<html><body>maintenance</body></html>".to_string(),
            )]))),
            source_url: FEED_URL.to_string(),
            data_dir: dir.path().to_path_buf(),
            snapshot: handle.clone(),
        };
        let pass = empty.update().await.unwrap();
        assert!(pass.records.is_empty());
        assert_eq!(handle.read().await.as_ref().unwrap().records.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let dir = TempDir::new().unwrap();
        let updater = updater(vec![], &dir);
        assert!(matches!(updater.update().await, Err(TrackerError::Fetch(_))));
        assert!(updater.latest().await.is_none());
    }
}
