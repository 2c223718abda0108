//! Shared data model for the visa slot tracker.
//!
//! Everything here is plain data plus the pure lookups that classify it:
//! visa-type tokens to categories and slot counts to availability tiers.

pub mod category;
pub mod types;

pub use category::{
    AvailabilityTier, VisaCategory, VisaSubtype, normalize_location, normalize_visa_token,
    split_visa_label,
};
pub use types::{
    MatchKey, NotificationLogEntry, NotificationStatus, Subscription, VisaSlotRecord,
};
