//! Notification history
//!
//! Two files back this store. `email_log.json` keeps every send attempt,
//! trimmed to the newest [`MAX_LOG_ENTRIES`]. `sent_alerts.json` keeps the
//! (email, match key) pairs that were delivered and is never trimmed by
//! log pressure; a pair only leaves it once its earliest date has passed.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use visa_common::{MatchKey, NotificationLogEntry};

use crate::error::Result;

pub const EMAIL_LOG_FILE: &str = "email_log.json";
pub const SENT_ALERTS_FILE: &str = "sent_alerts.json";
pub const MAX_LOG_ENTRIES: usize = 1000;

/// Per-subscriber summary for `/my-subscription/{email}`
#[derive(Debug, Clone, Serialize)]
pub struct EmailHistory {
    pub total_emails: usize,
    pub successful_emails: usize,
    pub failed_emails: usize,
    pub recent_emails: Vec<NotificationLogEntry>,
}

/// A delivered alert
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SentAlert {
    pub email: String,
    pub key: MatchKey,
}

#[derive(Default)]
struct HistoryState {
    log: VecDeque<NotificationLogEntry>,
    sent: BTreeSet<SentAlert>,
}

pub struct NotificationHistory {
    path: PathBuf,
    sent_path: PathBuf,
    state: Mutex<HistoryState>,
}

/// Read a JSON file; missing or malformed files yield `None`.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!("Ignoring malformed {:?}: {}", path, e);
                Ok(None)
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

fn delivered(entry: &NotificationLogEntry) -> Option<SentAlert> {
    match &entry.matched_record_ref {
        Some(key) if entry.status.is_sent() => Some(SentAlert {
            email: entry.email.clone(),
            key: key.clone(),
        }),
        _ => None,
    }
}

impl NotificationHistory {
    /// Load both files. An unreadable log starts empty. Without a sent-alert
    /// file the set is rebuilt from whatever the log still holds.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(EMAIL_LOG_FILE);
        let sent_path = data_dir.join(SENT_ALERTS_FILE);

        let log: VecDeque<NotificationLogEntry> = read_json(&path).await?.unwrap_or_default();
        let sent = match read_json::<BTreeSet<SentAlert>>(&sent_path).await? {
            Some(sent) => sent,
            None => log.iter().filter_map(delivered).collect(),
        };

        Ok(Self {
            path,
            sent_path,
            state: Mutex::new(HistoryState { log, sent }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sent_path(&self) -> &Path {
        &self.sent_path
    }

    /// Whether `email` was already told about `key`
    pub async fn already_sent(&self, email: &str, key: &MatchKey) -> bool {
        let alert = SentAlert {
            email: email.to_string(),
            key: key.clone(),
        };
        self.state.lock().await.sent.contains(&alert)
    }

    pub async fn record(&self, entry: NotificationLogEntry) -> Result<()> {
        self.record_all(vec![entry]).await
    }

    /// Append a batch and rewrite the files once.
    pub async fn record_all(&self, batch: Vec<NotificationLogEntry>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        let mut new_alerts = false;
        for entry in batch {
            if let Some(alert) = delivered(&entry) {
                new_alerts |= state.sent.insert(alert);
            }
            state.log.push_back(entry);
        }
        while state.log.len() > MAX_LOG_ENTRIES {
            state.log.pop_front();
        }

        if new_alerts {
            write_json(&self.sent_path, &state.sent).await?;
        }
        write_json(&self.path, &state.log).await
    }

    /// Forget delivered alerts whose earliest date is before `today`; such
    /// records can no longer match.
    pub async fn prune_expired(&self, today: NaiveDate) -> Result<usize> {
        let mut state = self.state.lock().await;
        let before = state.sent.len();
        state.sent.retain(|alert| alert.key.earliest_date >= today);
        let removed = before - state.sent.len();
        if removed > 0 {
            write_json(&self.sent_path, &state.sent).await?;
            tracing::debug!("Pruned {} expired sent alerts", removed);
        }
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.log.len()
    }

    pub async fn sent_alerts(&self) -> usize {
        self.state.lock().await.sent.len()
    }

    /// Newest `limit` entries, oldest first
    pub async fn recent(&self, limit: usize) -> Vec<NotificationLogEntry> {
        let state = self.state.lock().await;
        state.log.iter().skip(state.log.len().saturating_sub(limit)).cloned().collect()
    }

    pub async fn for_email(&self, email: &str, recent_limit: usize) -> EmailHistory {
        let state = self.state.lock().await;
        let mine: Vec<&NotificationLogEntry> = state.log.iter().filter(|e| e.email == email).collect();
        let successful_emails = mine.iter().filter(|e| e.status.is_sent()).count();

        EmailHistory {
            total_emails: mine.len(),
            successful_emails,
            failed_emails: mine.len() - successful_emails,
            recent_emails: mine
                .iter()
                .skip(mine.len().saturating_sub(recent_limit))
                .map(|e| (*e).clone())
                .collect(),
        }
    }
}
