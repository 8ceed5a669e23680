//! Timer length preference and duration formatting.

use crate::config::TimerConfig;
use crate::store::{keys, KeyValueStore, Value};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// The persisted sitting length
pub struct TimerSettings {
    store: Arc<dyn KeyValueStore>,
    config: TimerConfig,
}

impl TimerSettings {
    pub fn new(store: Arc<dyn KeyValueStore>, config: TimerConfig) -> Self {
        Self { store, config }
    }

    /// Stored duration, or the configured default when nothing valid is stored
    pub fn duration(&self) -> Duration {
        let default = Duration::from_secs(u64::from(self.config.default_duration_minutes) * 60);
        let stored = self.store.float(keys::TIMER_DURATION);
        if stored > 0.0 {
            Duration::try_from_secs_f64(stored).unwrap_or(default)
        } else {
            default
        }
    }

    pub fn available_minutes(&self) -> &[u32] {
        &self.config.available_minutes
    }

    /// Persist a new sitting length; must be one of the available durations
    pub fn set_minutes(&self, minutes: u32) -> Result<Duration> {
        if !self.config.available_minutes.contains(&minutes) {
            return Err(Error::Config(format!(
                "{} minutes is not one of the available durations {:?}",
                minutes, self.config.available_minutes
            )));
        }
        let duration = Duration::from_secs(u64::from(minutes) * 60);
        self.store
            .set(keys::TIMER_DURATION, Value::Float(duration.as_secs_f64()))?;
        tracing::debug!("Timer duration set to {} minutes", minutes);
        Ok(duration)
    }
}

/// Countdown display, `MM:SS`
pub fn format_countdown(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Cumulative time display: `"2 hr 5 min"`, or `"45 min"` under an hour
pub fn format_total_time(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    if hours > 0 {
        format!("{} hr {} min", hours, minutes)
    } else {
        format!("{} min", minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_default_duration() {
        let settings = TimerSettings::new(Arc::new(MemoryStore::new()), TimerConfig::default());
        assert_eq!(settings.duration(), Duration::from_secs(20 * 60));
    }

    #[test]
    fn test_set_minutes_validates() {
        let store = Arc::new(MemoryStore::new());
        let settings = TimerSettings::new(store.clone(), TimerConfig::default());

        settings.set_minutes(15).unwrap();
        assert_eq!(settings.duration(), Duration::from_secs(900));
        assert_eq!(store.float(keys::TIMER_DURATION), 900.0);

        assert!(matches!(settings.set_minutes(7), Err(Error::Config(_))));
        assert_eq!(settings.duration(), Duration::from_secs(900));
    }

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(1200), "20:00");
        assert_eq!(format_countdown(65), "01:05");
        assert_eq!(format_countdown(0), "00:00");
    }

    #[test]
    fn test_format_total_time() {
        assert_eq!(format_total_time(Duration::from_secs(2400)), "40 min");
        assert_eq!(format_total_time(Duration::from_secs(7500)), "2 hr 5 min");
        assert_eq!(format_total_time(Duration::ZERO), "0 min");
    }
}
