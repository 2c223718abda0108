//! Service counters persisted to `stats.json`

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::Result;

pub const STATS_FILE: &str = "stats.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerStats {
    pub checks_performed: u64,
    pub emails_sent: u64,
    pub emails_failed: u64,
    pub subscriptions_created: u64,
    pub subscriptions_updated: u64,
    pub subscriptions_deleted: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_startup: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

pub struct StatsStore {
    path: PathBuf,
    stats: Mutex<TrackerStats>,
}

impl StatsStore {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(STATS_FILE);

        let stats = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Resetting malformed stats file {:?}: {}", path, e);
                TrackerStats::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TrackerStats::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            stats: Mutex::new(stats),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self) -> TrackerStats {
        self.stats.lock().await.clone()
    }

    /// Apply `change` and write the file. Write failures are logged only;
    /// counters are informational.
    pub async fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut TrackerStats),
    {
        let mut stats = self.stats.lock().await;
        change(&mut stats);
        stats.last_updated = Some(Utc::now());

        if let Err(e) = self.write(&stats).await {
            tracing::warn!("Could not update stats file {:?}: {}", self.path, e);
        }
    }

    async fn write(&self, stats: &TrackerStats) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(stats)?).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_counters_persist() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::open(dir.path()).await.unwrap();
        store
            .update(|s| {
                s.checks_performed += 1;
                s.emails_sent += 2;
            })
            .await;

        let reopened = StatsStore::open(dir.path()).await.unwrap();
        let stats = reopened.get().await;
        assert_eq!(stats.checks_performed, 1);
        assert_eq!(stats.emails_sent, 2);
        assert!(stats.last_updated.is_some());
    }

    #[tokio::test]
    async fn test_old_stats_file_keeps_unknown_fields_defaulted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(STATS_FILE),
            r#"{"emails_sent": 4, "subscriptions_saved": 2, "app_version": "1.0"}"#,
        )
        .unwrap();
        let stats = StatsStore::open(dir.path()).await.unwrap().get().await;
        assert_eq!(stats.emails_sent, 4);
        assert_eq!(stats.checks_performed, 0);
    }
}
