//! Timestamped copies of the data files, made on operator request

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;

use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub timestamp: String,
    /// Backup path per data file name; files that do not exist yet are left out
    pub files: BTreeMap<String, PathBuf>,
}

/// `stats.json` at 2025-08-14 06:01:34 becomes `stats_backup_20250814_060134.json`
fn backup_path(source: &Path, timestamp: &str) -> PathBuf {
    let stem = source.file_stem().and_then(|s| s.to_str()).unwrap_or("data");
    source.with_file_name(format!("{}_backup_{}.json", stem, timestamp))
}

/// Copy each of `sources` next to itself with a timestamp suffix.
///
/// The stores replace their files by rename, so a copy always sees one
/// complete version of each file.
pub async fn backup_files(sources: &[(&str, &Path)], now: DateTime<Utc>) -> Result<BackupReport> {
    let timestamp = now.format("%Y%m%d_%H%M%S").to_string();
    let mut files = BTreeMap::new();

    for (name, source) in sources {
        if !fs::try_exists(source).await? {
            tracing::debug!("No {} file to back up at {:?}", name, source);
            continue;
        }
        let target = backup_path(source, &timestamp);
        fs::copy(source, &target).await?;
        files.insert(name.to_string(), target);
    }

    tracing::info!("Backup {} written ({} files)", timestamp, files.len());
    Ok(BackupReport { timestamp, files })
}
