//! Availability content parser
//!
//! Understands the JSON availability feed (`{"result": {"<label>": [rows]}}`)
//! and the rendered HTML table. An HTML page without a populated table may
//! still reference the feed URL, which [`find_feed_url`] extracts.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};
use visa_common::{VisaSlotRecord, normalize_location, split_visa_label};

use crate::error::{Result, TrackerError};

static FEED_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https://[^"'\s<>]*\.s3[^"'\s<>]*\.amazonaws\.com/[^"'\s<>]*\.json"#)
        .expect("feed url regex is valid")
});

static DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("digits regex is valid"));

/// Row as published in the JSON feed
#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(default)]
    visa_location: String,
    #[serde(default)]
    createdon: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    no_of_dates: u32,
    #[serde(default, deserialize_with = "lenient_count")]
    no_of_apnts: u32,
    #[serde(default)]
    earliest_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFeed {
    result: BTreeMap<String, Vec<RawRow>>,
}

/// Counts show up both as numbers and as strings like "12"
fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(|n| n.min(u64::from(u32::MAX)) as u32)
            .unwrap_or(0),
        serde_json::Value::String(s) => first_number(&s),
        _ => 0,
    })
}

fn first_number(text: &str) -> u32 {
    DIGITS_RE
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Parse a slot date as shown by the source.
///
/// Accepts "27 Aug, 25", "27 Aug, 2025", "27 Aug 2025" and "2025-08-27".
/// Returns `None` for "No dates", "N/A" and anything unparseable.
pub fn parse_slot_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    // %y must be tried before %Y, otherwise "25" parses as the year 25
    ["%d %b, %y", "%d %b, %Y", "%d %b %Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

fn parse_source_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S").ok()
}

fn build_record(
    location: &str,
    label: &str,
    earliest: Option<&str>,
    slot_count: u32,
    appointment_count: u32,
    updated: Option<&str>,
    scraped_at: DateTime<Utc>,
) -> Option<VisaSlotRecord> {
    let location = normalize_location(location);
    let label = label.trim();
    let (visa_type, _) = split_visa_label(label);
    if location.is_empty() || visa_type.is_empty() {
        return None;
    }

    Some(VisaSlotRecord {
        location,
        visa_type,
        visa_label: label.to_string(),
        earliest_date: earliest.and_then(parse_slot_date),
        slot_count,
        appointment_count,
        source_updated_at: updated.and_then(parse_source_timestamp),
        scraped_at,
    })
}

/// Parse the JSON availability feed. Labels come out in lexical order,
/// rows within a label in feed order.
pub fn parse_feed_json(json: &str, scraped_at: DateTime<Utc>) -> Result<Vec<VisaSlotRecord>> {
    let feed: RawFeed = serde_json::from_str(json)
        .map_err(|e| TrackerError::Parse(format!("availability feed: {}", e)))?;

    let mut records = Vec::new();
    for (label, rows) in &feed.result {
        for row in rows {
            match build_record(
                &row.visa_location,
                label,
                row.earliest_date.as_deref(),
                row.no_of_dates,
                row.no_of_apnts,
                row.createdon.as_deref(),
                scraped_at,
            ) {
                Some(record) => records.push(record),
                None => warn!("Skipping feed row without location under '{}'", label),
            }
        }
    }

    debug!("Parsed {} records from availability feed", records.len());
    Ok(records)
}

/// Parse the rendered availability table.
///
/// Columns: location, visa type, earliest date, appointments, then
/// optional update time. The table lists one earliest date per row, so a
/// dated row counts as one open date.
pub fn parse_table_html(html: &str, scraped_at: DateTime<Utc>) -> Result<Vec<VisaSlotRecord>> {
    let document = Html::parse_document(html);
    let row_sel = Selector::parse("table tbody tr")
        .map_err(|e| TrackerError::Parse(format!("selector error: {}", e)))?;
    let td_sel =
        Selector::parse("td").map_err(|e| TrackerError::Parse(format!("selector error: {}", e)))?;

    let mut records = Vec::new();
    let mut saw_rows = false;

    for tr in document.select(&row_sel) {
        saw_rows = true;
        let cells: Vec<String> = tr.select(&td_sel).map(cell_text).collect();

        if cells.len() < 4 {
            warn!("Skipping malformed availability row ({} columns): {:?}", cells.len(), cells);
            continue;
        }

        let earliest = parse_slot_date(&cells[2]);
        let record = build_record(
            &cells[0],
            &cells[1],
            Some(cells[2].as_str()),
            u32::from(earliest.is_some()),
            first_number(&cells[3]),
            cells.get(4).map(String::as_str),
            scraped_at,
        );
        if let Some(record) = record {
            records.push(record);
        }
    }

    if !saw_rows {
        return Err(TrackerError::Parse("no availability table rows".to_string()));
    }

    debug!("Parsed {} records from availability table", records.len());
    Ok(records)
}

/// Text of a table cell with runs of whitespace collapsed
fn cell_text(td: ElementRef<'_>) -> String {
    td.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse whichever shape `content` has.
pub fn parse_availability(content: &str, scraped_at: DateTime<Utc>) -> Result<Vec<VisaSlotRecord>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('{') {
        parse_feed_json(trimmed, scraped_at)
    } else if trimmed.is_empty() {
        Err(TrackerError::Parse("empty response body".to_string()))
    } else {
        parse_table_html(content, scraped_at)
    }
}

/// Find the JSON feed URL referenced by the availability page's scripts
pub fn find_feed_url(html: &str) -> Option<String> {
    FEED_URL_RE.find(html).map(|m| m.as_str().to_string())
}
