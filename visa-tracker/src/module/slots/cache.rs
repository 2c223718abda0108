///! On-disk copy of the last published snapshot
///!
///! Lets the dashboard show the previous scrape right after a restart,
///! before the first pass of the new process completes.
use std::path::{Path, PathBuf};

use tokio::fs;

use super::types::ScrapeSnapshot;
use crate::error::Result;

const SNAPSHOT_FILE: &str = "latest_snapshot.json";

pub fn snapshot_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SNAPSHOT_FILE)
}

/// Load the cached snapshot. Missing or unreadable files yield `None`;
/// a stale cache is never worth failing startup over.
pub async fn load_snapshot(data_dir: &Path) -> Option<ScrapeSnapshot> {
    let path = snapshot_path(data_dir);
    let content = match fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Failed to read snapshot cache {:?}: {}", path, e);
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::warn!("Ignoring malformed snapshot cache {:?}: {}", path, e);
            None
        }
    }
}

pub async fn save_snapshot(data_dir: &Path, snapshot: &ScrapeSnapshot) -> Result<()> {
    fs::create_dir_all(data_dir).await?;
    let path = snapshot_path(data_dir);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?).await?;
    fs::rename(&tmp, &path).await?;
    tracing::debug!("Snapshot cached to {:?}", path);
    Ok(())
}
