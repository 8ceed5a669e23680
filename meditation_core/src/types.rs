//! Core domain types for the meditate practice tracker.
//!
//! This module defines the records that outlive a single run:
//! - Completed meditation sessions and their heart-rate samples
//! - Journal entries written after a sit

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Heart Rate
// ============================================================================

/// A single heart-rate reading from the sample source
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct HeartRateSample {
    pub timestamp: DateTime<Utc>,
    pub bpm: f64,
}

/// Mean beats-per-minute over a set of samples, `None` when empty.
pub fn average_heart_rate(samples: &[HeartRateSample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let total: f64 = samples.iter().map(|s| s.bpm).sum();
    Some(total / samples.len() as f64)
}

// ============================================================================
// Session and Journal Types
// ============================================================================

/// A recorded meditation session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeditationSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub average_heart_rate: Option<f64>,
    #[serde(default)]
    pub heart_rate: Vec<HeartRateSample>,
}

impl MeditationSession {
    /// Build a session record, deriving the average from the samples
    pub fn new(
        started_at: DateTime<Utc>,
        duration_secs: f64,
        heart_rate: Vec<HeartRateSample>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            duration_secs,
            average_heart_rate: average_heart_rate(&heart_rate),
            heart_rate,
        }
    }
}

/// A free-form note written after meditating
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub written_at: DateTime<Utc>,
    pub content: String,
    pub meditation_duration_secs: f64,
}

impl JournalEntry {
    pub fn new(written_at: DateTime<Utc>, content: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            written_at,
            content: content.into(),
            meditation_duration_secs: duration_secs,
        }
    }
}
