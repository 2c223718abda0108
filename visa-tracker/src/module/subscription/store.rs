///! Flat-file subscription store
///!
///! The whole set lives in memory behind one mutex; every mutation rewrites
///! `subscriptions.json` through a temp file and a rename, after copying the
///! previous file to `subscriptions_backup.json`.
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use visa_common::{Subscription, normalize_location, split_visa_label};

use crate::error::{Result, TrackerError};

pub const SUBSCRIPTIONS_FILE: &str = "subscriptions.json";
pub const SUBSCRIPTIONS_BACKUP: &str = "subscriptions_backup.json";
pub const DEFAULT_THRESHOLD_DAYS: u32 = 30;

fn default_threshold_days() -> u32 {
    DEFAULT_THRESHOLD_DAYS
}

/// Body of a create-or-replace request
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionRequest {
    pub email: String,
    pub visa_types: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default = "default_threshold_days")]
    pub alert_threshold_days: u32,
}

/// Partial update; absent fields keep their stored value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionUpdate {
    pub visa_types: Option<Vec<String>>,
    pub locations: Option<Vec<String>>,
    pub alert_threshold_days: Option<u32>,
}

/// Result of a create-or-replace
#[derive(Debug, Clone, Serialize)]
pub struct Upserted {
    pub subscription: Subscription,
    pub created: bool,
}

pub struct SubscriptionStore {
    path: PathBuf,
    backup_path: PathBuf,
    entries: Mutex<BTreeMap<String, Subscription>>,
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Canonical visa entry: `"b-1 (dropbox)"` → `"B1 (Dropbox)"`, `"h1b"` → `"H1B"`
pub fn normalize_visa_entry(raw: &str) -> String {
    match split_visa_label(raw) {
        (token, Some(subtype)) => format!("{} ({})", token, subtype),
        (token, None) => token,
    }
}

fn validate_email(email: &str) -> Result<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(TrackerError::Validation(format!("'{}' is not a valid email address", email))),
    }
}

fn normalize_visa_types(raw: &[String]) -> Result<BTreeSet<String>> {
    let visa_types: BTreeSet<String> = raw
        .iter()
        .map(|v| normalize_visa_entry(v))
        .filter(|v| !v.is_empty())
        .collect();
    if visa_types.is_empty() {
        return Err(TrackerError::Validation("select at least one visa type".to_string()));
    }
    Ok(visa_types)
}

fn normalize_locations(raw: &[String]) -> BTreeSet<String> {
    raw.iter()
        .map(|l| normalize_location(l))
        .filter(|l| !l.is_empty())
        .collect()
}

fn validate_threshold(days: u32) -> Result<u32> {
    if days == 0 {
        return Err(TrackerError::Validation("alert threshold must be at least one day".to_string()));
    }
    Ok(days)
}

impl SubscriptionStore {
    /// Open the store under `data_dir`. A missing file is an empty store;
    /// a file that is not a list of subscriptions is `StoreCorruption`.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(SUBSCRIPTIONS_FILE);
        let backup_path = data_dir.join(SUBSCRIPTIONS_BACKUP);

        let entries = match fs::read_to_string(&path).await {
            Ok(content) => {
                let list: Vec<Subscription> =
                    serde_json::from_str(&content).map_err(|e| TrackerError::StoreCorruption {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                // hand-edited files may carry mixed-case addresses
                list.into_iter()
                    .map(|mut s| {
                        s.email = normalize_email(&s.email);
                        (s.email.clone(), s)
                    })
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!("Loaded {} subscriptions from {:?}", entries.len(), path);

        Ok(Self {
            path,
            backup_path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub async fn list(&self) -> Vec<Subscription> {
        self.entries.lock().await.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn get(&self, email: &str) -> Option<Subscription> {
        self.entries.lock().await.get(&normalize_email(email)).cloned()
    }

    /// Insert a new subscription or replace the preferences of an existing
    /// one, keeping its original `created_at`.
    pub async fn create_or_replace(&self, request: SubscriptionRequest) -> Result<Upserted> {
        let email = normalize_email(&request.email);
        validate_email(&email)?;
        let visa_types = normalize_visa_types(&request.visa_types)?;
        let locations = normalize_locations(&request.locations);
        let alert_threshold_days = validate_threshold(request.alert_threshold_days)?;

        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        let (subscription, created) = match entries.get(&email) {
            Some(existing) => (
                Subscription {
                    visa_types,
                    locations,
                    alert_threshold_days,
                    updated_at: now,
                    ..existing.clone()
                },
                false,
            ),
            None => (
                Subscription {
                    email: email.clone(),
                    visa_types,
                    locations,
                    alert_threshold_days,
                    created_at: now,
                    updated_at: now,
                },
                true,
            ),
        };

        let previous = entries.insert(email, subscription.clone());
        if let Err(e) = self.persist(&entries).await {
            // keep memory in step with disk
            match previous {
                Some(prev) => entries.insert(prev.email.clone(), prev),
                None => entries.remove(&subscription.email),
            };
            return Err(e);
        }

        tracing::info!(
            "{} subscription for {}",
            if created { "Created" } else { "Replaced" },
            subscription.email
        );
        Ok(Upserted { subscription, created })
    }

    pub async fn update(&self, email: &str, update: SubscriptionUpdate) -> Result<Subscription> {
        let email = normalize_email(email);
        let mut entries = self.entries.lock().await;
        let existing = entries
            .get(&email)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(email.clone()))?;

        let mut updated = existing.clone();
        if let Some(visa_types) = &update.visa_types {
            updated.visa_types = normalize_visa_types(visa_types)?;
        }
        if let Some(locations) = &update.locations {
            updated.locations = normalize_locations(locations);
        }
        if let Some(days) = update.alert_threshold_days {
            updated.alert_threshold_days = validate_threshold(days)?;
        }
        updated.updated_at = Utc::now();

        entries.insert(email.clone(), updated.clone());
        if let Err(e) = self.persist(&entries).await {
            entries.insert(email, existing);
            return Err(e);
        }

        tracing::info!("Updated subscription for {}", updated.email);
        Ok(updated)
    }

    pub async fn delete(&self, email: &str) -> Result<Subscription> {
        let email = normalize_email(email);
        let mut entries = self.entries.lock().await;
        let removed = entries
            .remove(&email)
            .ok_or_else(|| TrackerError::NotFound(email.clone()))?;

        if let Err(e) = self.persist(&entries).await {
            entries.insert(email, removed);
            return Err(e);
        }

        tracing::info!("Deleted subscription for {}", removed.email);
        Ok(removed)
    }

    /// Called with the entries lock held, so writers never interleave.
    async fn persist(&self, entries: &BTreeMap<String, Subscription>) -> Result<()> {
        if fs::try_exists(&self.path).await.unwrap_or(false) {
            if let Err(e) = fs::copy(&self.path, &self.backup_path).await {
                tracing::warn!("Could not back up {:?}: {}", self.path, e);
            }
        }

        let list: Vec<&Subscription> = entries.values().collect();
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&list)?).await?;
        fs::rename(&tmp, &self.path).await?;

        tracing::debug!("Saved {} subscriptions to {:?}", list.len(), self.path);
        Ok(())
    }
}
