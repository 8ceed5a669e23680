//! Session history queries over the session log.

use crate::{MeditationSession, Result};
use chrono::{DateTime, Duration, Utc};
use std::path::Path;

/// Load sessions from the last N days, newest first
pub fn load_recent_sessions(
    path: &Path,
    now: DateTime<Utc>,
    days: i64,
) -> Result<Vec<MeditationSession>> {
    let cutoff = now - Duration::days(days);
    let mut sessions: Vec<MeditationSession> = crate::jsonl::read_records(path)?
        .into_iter()
        .filter(|s: &MeditationSession| s.started_at >= cutoff)
        .collect();

    sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    tracing::debug!(
        "Loaded {} sessions from last {} days",
        sessions.len(),
        days
    );
    Ok(sessions)
}

/// Mean of the per-session heart-rate averages, ignoring sessions without samples
pub fn overall_average_heart_rate(sessions: &[MeditationSession]) -> Option<f64> {
    let averages: Vec<f64> = sessions.iter().filter_map(|s| s.average_heart_rate).collect();
    if averages.is_empty() {
        return None;
    }
    Some(averages.iter().sum::<f64>() / averages.len() as f64)
}
