#![forbid(unsafe_code)]

//! Core domain model and business logic for the meditate practice tracker.
//!
//! This crate provides:
//! - Domain types (sessions, heart-rate samples, journal entries)
//! - A key-value store contract with in-memory and file-backed stores
//! - The session/streak tracker
//! - The trial and entitlement manager
//! - Session and journal logs, history queries
//! - Configuration, logging and timer settings

pub mod types;
pub mod error;
pub mod clock;
pub mod config;
pub mod logging;
pub mod store;
pub mod events;
pub mod streak;
pub mod entitlement;
pub mod catalog;
pub mod jsonl;
pub mod history;
pub mod timer;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use store::{FileStore, KeyValueStore, MemoryStore, Value};
pub use events::{LogNotifier, Notifier, Subscribers};
pub use streak::{LaunchReport, SessionOutcome, StreakStats, StreakTracker, QUALIFYING_SESSIONS};
pub use entitlement::{
    AccessSnapshot, EntitlementManager, PurchaseOutcome, PurchaseResult, RestoreSummary,
    TransactionEvent, TrialStatus, Verification, TRIAL_LENGTH_DAYS,
};
pub use catalog::{load_catalog, CatalogStatus, Product, ProductCatalog, StaticCatalog};
pub use jsonl::{read_records, JsonlSink, RecordSink};
pub use history::{load_recent_sessions, overall_average_heart_rate};
pub use timer::{format_countdown, format_total_time, TimerSettings};
