#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use tempfile::TempDir;
use visa_tracker::app::AppState;
use visa_tracker::config::TrackerConfig;
use visa_tracker::error::{Result, TrackerError};
use visa_tracker::module::notify::{Mailer, OutgoingEmail};
use visa_tracker::module::slots::PageSource;

pub const FEED_URL: &str = "https://feed.test/last-availability.json";

/// Serves whatever content the test last put in it
#[derive(Default)]
pub struct StubSource {
    content: Mutex<Option<String>>,
}

impl StubSource {
    pub fn set(&self, content: impl Into<String>) {
        *self.content.lock().unwrap() = Some(content.into());
    }

    pub fn fail(&self) {
        *self.content.lock().unwrap() = None;
    }
}

#[async_trait]
impl PageSource for StubSource {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.content
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| TrackerError::Fetch(format!("{} returned HTTP 503", url)))
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingMailer {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub source: Arc<StubSource>,
    pub mailer: Arc<RecordingMailer>,
    pub state: AppState,
}

pub async fn harness(with_mailer: bool) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = TrackerConfig::default();
    config.storage.data_dir = dir.path().to_path_buf();
    config.scraper.source_url = FEED_URL.to_string();

    let source = Arc::new(StubSource::default());
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::build(
        &config,
        source.clone(),
        with_mailer.then(|| mailer.clone() as Arc<dyn Mailer>),
    )
    .await
    .unwrap();

    Harness {
        dir,
        source,
        mailer,
        state,
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// JSON feed with one row per (label, location, days-from-today)
pub fn feed(rows: &[(&str, &str, i64)]) -> String {
    let mut result = serde_json::Map::new();
    for (label, location, days) in rows {
        let date = (today() + Duration::days(*days)).format("%Y-%m-%d").to_string();
        let entry = result
            .entry(label.to_string())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let serde_json::Value::Array(list) = entry {
            list.push(serde_json::json!({
                "visa_location": location,
                "visa_type": label,
                "createdon": "2025-08-14 06:01:34",
                "no_of_dates": 3,
                "no_of_apnts": 9,
                "earliest_date": date,
            }));
        }
    }
    serde_json::json!({ "result": result }).to_string()
}
