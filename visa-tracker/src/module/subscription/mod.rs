//! Subscriber preferences, persisted as a JSON list

pub mod store;

pub use store::{SubscriptionRequest, SubscriptionStore, SubscriptionUpdate, Upserted};
