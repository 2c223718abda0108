//! Visa slot availability module
//!
//! Fetches the availability source, parses it into categorized records,
//! and publishes the latest snapshot for the notifier and the web surface.

pub mod cache;
pub mod fetcher;
pub mod parser;
pub mod types;
pub mod updater;

pub use fetcher::{HttpFetcher, PageSource};
pub use types::{GroupSummary, ScrapeSnapshot};
pub use updater::{SlotUpdater, SnapshotHandle};
