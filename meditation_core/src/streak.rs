//! Session and streak bookkeeping.
//!
//! Rules:
//! - A day qualifies the first time its session count reaches
//!   [`QUALIFYING_SESSIONS`]; only then does the streak grow.
//! - The daily count is capped at the threshold and zeroed lazily, the
//!   first time a new calendar day is observed.
//! - On launch the streak survives if today or yesterday qualified,
//!   otherwise it drops to zero.

use crate::clock::{local_day, start_of_day, Clock};
use crate::events::Subscribers;
use crate::store::{keys, write_all, KeyValueStore, Value};
use crate::Result;
use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Sessions needed in one day for it to count toward the streak
pub const QUALIFYING_SESSIONS: u32 = 2;

/// Snapshot of every persisted practice counter
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StreakStats {
    pub completed_dates: BTreeSet<NaiveDate>,
    pub daily_session_count: u32,
    pub current_streak: u32,
    pub best_streak: u32,
    /// Seconds
    pub total_meditation_time: f64,
    pub last_reset_date: Option<NaiveDate>,
}

impl StreakStats {
    /// Read all counters, defaulting anything absent
    pub fn load(store: &dyn KeyValueStore) -> Self {
        Self {
            completed_dates: store
                .timestamps(keys::MEDITATION_DATES)
                .into_iter()
                .map(local_day)
                .collect(),
            daily_session_count: clamp_count(store.int(keys::DAILY_SESSION_COUNT)),
            current_streak: non_negative(store.int(keys::CURRENT_STREAK)),
            best_streak: non_negative(store.int(keys::BEST_STREAK)),
            total_meditation_time: store.float(keys::TOTAL_MEDITATION_TIME).max(0.0),
            last_reset_date: store.timestamp(keys::LAST_RESET_DATE).map(local_day),
        }
    }

    fn dates_value(&self) -> Value {
        Value::TimestampList(self.completed_dates.iter().copied().map(start_of_day).collect())
    }
}

fn non_negative(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

fn clamp_count(v: i64) -> u32 {
    non_negative(v).min(QUALIFYING_SESSIONS)
}

/// Result of recording one finished session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionOutcome {
    pub daily_session_count: u32,
    /// True only for the session that made today a qualifying day
    pub day_qualified: bool,
    pub current_streak: u32,
    pub best_streak: u32,
}

/// What the launch checks changed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LaunchReport {
    pub daily_count_reset: bool,
    pub streak_reset: bool,
}

/// Turns "a session finished" events into durable streak statistics
///
/// Mutations update the in-memory snapshot before persisting. When the
/// store rejects a write the error is returned, the snapshot keeps the
/// change and storage lags behind until a later write succeeds.
pub struct StreakTracker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    stats: StreakStats,
    subscribers: Subscribers<StreakStats>,
}

impl StreakTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let stats = StreakStats::load(store.as_ref());
        tracing::debug!(
            "Loaded streak stats: current={}, best={}, today={}",
            stats.current_streak,
            stats.best_streak,
            stats.daily_session_count
        );
        Self {
            store,
            clock,
            stats,
            subscribers: Subscribers::new(),
        }
    }

    /// Discard the in-memory snapshot and re-read the store
    pub fn reload(&mut self) {
        self.stats = StreakStats::load(self.store.as_ref());
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&StreakStats) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback);
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Record a finished session of the given length
    pub fn record_session_completed(
        &mut self,
        duration: std::time::Duration,
    ) -> Result<SessionOutcome> {
        let now = self.clock.now();
        let today = now.date_naive();
        let mut writes = Vec::new();

        if self.roll_over(today) {
            writes.push((keys::LAST_RESET_DATE, Value::Timestamp(now.with_timezone(&Utc))));
        }
        // No launch check may have run since the last qualifying day
        if self.lapse_streak(today) {
            writes.push((keys::CURRENT_STREAK, Value::Int(0)));
        }

        let previous = self.stats.daily_session_count;
        self.stats.daily_session_count = (previous + 1).min(QUALIFYING_SESSIONS);
        self.stats.total_meditation_time += duration.as_secs_f64();
        writes.push((
            keys::DAILY_SESSION_COUNT,
            Value::Int(self.stats.daily_session_count.into()),
        ));
        writes.push((
            keys::TOTAL_MEDITATION_TIME,
            Value::Float(self.stats.total_meditation_time),
        ));

        let reached_threshold =
            previous < QUALIFYING_SESSIONS && self.stats.daily_session_count == QUALIFYING_SESSIONS;
        let day_qualified = reached_threshold && self.stats.completed_dates.insert(today);

        if day_qualified {
            self.stats.current_streak += 1;
            self.stats.best_streak = self.stats.best_streak.max(self.stats.current_streak);
            tracing::info!(
                "{} qualified, streak now {} (best {})",
                today,
                self.stats.current_streak,
                self.stats.best_streak
            );
            writes.push((keys::MEDITATION_DATES, self.stats.dates_value()));
            writes.push((keys::CURRENT_STREAK, Value::Int(self.stats.current_streak.into())));
            writes.push((keys::BEST_STREAK, Value::Int(self.stats.best_streak.into())));
        } else {
            tracing::debug!(
                "Session recorded ({} of {} today)",
                self.stats.daily_session_count,
                QUALIFYING_SESSIONS
            );
        }

        let outcome = SessionOutcome {
            daily_session_count: self.stats.daily_session_count,
            day_qualified,
            current_streak: self.stats.current_streak,
            best_streak: self.stats.best_streak,
        };
        self.persist(writes)?;
        Ok(outcome)
    }

    /// Zero the streak unless today or yesterday qualified
    ///
    /// Returns true when a live streak was reset.
    pub fn check_and_reset_streak_on_launch(&mut self) -> Result<bool> {
        if !self.lapse_streak(self.clock.today()) {
            return Ok(false);
        }
        self.persist(vec![(keys::CURRENT_STREAK, Value::Int(0))])?;
        Ok(true)
    }

    /// Zero the daily count the first time a new calendar day is seen
    ///
    /// Returns true when the count was reset.
    pub fn reset_daily_count_if_new_day(&mut self) -> Result<bool> {
        let now = self.clock.now();
        if !self.roll_over(now.date_naive()) {
            return Ok(false);
        }
        self.persist(vec![
            (keys::DAILY_SESSION_COUNT, Value::Int(0)),
            (keys::LAST_RESET_DATE, Value::Timestamp(now.with_timezone(&Utc))),
        ])?;
        Ok(true)
    }

    /// Run the foreground checks: daily reset first, then the streak check
    ///
    /// Both checks always run; the first persistence error is returned.
    pub fn on_launch(&mut self) -> Result<LaunchReport> {
        let daily = self.reset_daily_count_if_new_day();
        let streak = self.check_and_reset_streak_on_launch();
        Ok(LaunchReport {
            daily_count_reset: daily?,
            streak_reset: streak?,
        })
    }

    /// Clear every counter, in memory and in the store
    pub fn reset_all(&mut self) -> Result<()> {
        tracing::info!("Resetting all practice statistics");
        self.stats = StreakStats::default();
        let mut first_error = None;
        for key in [
            keys::DAILY_SESSION_COUNT,
            keys::MEDITATION_DATES,
            keys::CURRENT_STREAK,
            keys::BEST_STREAK,
            keys::TOTAL_MEDITATION_TIME,
            keys::LAST_RESET_DATE,
        ] {
            if let Err(e) = self.store.remove(key) {
                first_error.get_or_insert(e);
            }
        }
        self.subscribers.publish(&self.stats);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn stats(&self) -> &StreakStats {
        &self.stats
    }

    pub fn current_streak(&self) -> u32 {
        self.stats.current_streak
    }

    pub fn best_streak(&self) -> u32 {
        self.stats.best_streak
    }

    /// Sessions counted today; zero if the stored count belongs to an earlier day
    pub fn daily_session_count(&self) -> u32 {
        if self.stats.last_reset_date == Some(self.clock.today()) {
            self.stats.daily_session_count
        } else {
            0
        }
    }

    pub fn total_meditation_time(&self) -> std::time::Duration {
        std::time::Duration::try_from_secs_f64(self.stats.total_meditation_time).unwrap_or_default()
    }

    pub fn completed_dates(&self) -> &BTreeSet<NaiveDate> {
        &self.stats.completed_dates
    }

    pub fn is_completed(&self, day: NaiveDate) -> bool {
        self.stats.completed_dates.contains(&day)
    }

    /// Qualifying days in the current Monday-started week
    pub fn meditations_this_week(&self) -> usize {
        let today = self.clock.today();
        let monday = today - Duration::days(today.weekday().num_days_from_monday().into());
        let next_monday = monday + Duration::days(7);
        self.stats
            .completed_dates
            .range(monday..next_monday)
            .count()
    }

    // ------------------------------------------------------------------

    fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.stats.last_reset_date == Some(today) {
            return false;
        }
        tracing::debug!("New day {} observed, zeroing daily session count", today);
        self.stats.daily_session_count = 0;
        self.stats.last_reset_date = Some(today);
        true
    }

    /// Zero a live streak when neither `today` nor the day before qualified
    fn lapse_streak(&mut self, today: NaiveDate) -> bool {
        let yesterday = today.pred_opt().unwrap_or(today);
        let alive = self.stats.completed_dates.contains(&today)
            || self.stats.completed_dates.contains(&yesterday);
        if alive || self.stats.current_streak == 0 {
            return false;
        }

        tracing::info!(
            "No qualifying day on {} or {}, resetting streak of {}",
            yesterday,
            today,
            self.stats.current_streak
        );
        self.stats.current_streak = 0;
        true
    }

    fn persist(&self, writes: Vec<(&str, Value)>) -> Result<()> {
        self.subscribers.publish(&self.stats);
        write_all(self.store.as_ref(), writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::MemoryStore;
    use crate::Error;
    use std::time::Duration as StdDuration;

    const SIT: StdDuration = StdDuration::from_secs(1200);

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup(start: NaiveDate) -> (Arc<MemoryStore>, Arc<FixedClock>, StreakTracker) {
        crate::logging::init_test();
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::at_noon(start));
        let tracker = StreakTracker::new(store.clone(), clock.clone());
        (store, clock, tracker)
    }

    #[test]
    fn test_two_sessions_qualify_the_day() {
        let (_store, _clock, mut tracker) = setup(day(2024, 5, 6));
        tracker.on_launch().unwrap();

        let first = tracker.record_session_completed(SIT).unwrap();
        assert_eq!(first.daily_session_count, 1);
        assert!(!first.day_qualified);
        assert_eq!(first.current_streak, 0);

        let second = tracker.record_session_completed(SIT).unwrap();
        assert_eq!(second.daily_session_count, 2);
        assert!(second.day_qualified);
        assert_eq!(second.current_streak, 1);
        assert_eq!(second.best_streak, 1);
        assert!(tracker.is_completed(day(2024, 5, 6)));
    }

    #[test]
    fn test_third_session_only_adds_time() {
        let (_store, _clock, mut tracker) = setup(day(2024, 5, 6));
        tracker.record_session_completed(SIT).unwrap();
        tracker.record_session_completed(SIT).unwrap();
        let before = tracker.stats().clone();

        let third = tracker.record_session_completed(StdDuration::from_secs(600)).unwrap();
        assert!(!third.day_qualified);
        assert_eq!(third.daily_session_count, 2);
        assert_eq!(tracker.current_streak(), before.current_streak);
        assert_eq!(tracker.best_streak(), before.best_streak);
        assert_eq!(tracker.completed_dates(), &before.completed_dates);
        assert_eq!(tracker.total_meditation_time(), StdDuration::from_secs(3000));
    }

    #[test]
    fn test_grace_window_scenario() {
        let (store, clock, mut tracker) = setup(day(2024, 5, 6));

        // Day 1: two sittings
        tracker.on_launch().unwrap();
        tracker.record_session_completed(SIT).unwrap();
        tracker.record_session_completed(SIT).unwrap();
        assert_eq!(tracker.current_streak(), 1);
        assert_eq!(tracker.best_streak(), 1);
        assert_eq!(tracker.total_meditation_time(), StdDuration::from_secs(2400));

        // Day 2: no sessions, yesterday still counts
        clock.advance(Duration::days(1));
        let report = tracker.on_launch().unwrap();
        assert!(report.daily_count_reset);
        assert!(!report.streak_reset);
        assert_eq!(tracker.current_streak(), 1);

        // Day 3: neither day 2 nor day 3 qualified
        clock.advance(Duration::days(1));
        let report = tracker.on_launch().unwrap();
        assert!(report.streak_reset);
        assert_eq!(tracker.current_streak(), 0);
        assert_eq!(tracker.best_streak(), 1);
        assert_eq!(store.int(keys::CURRENT_STREAK), 0);
    }

    #[test]
    fn test_consecutive_days_extend_streak() {
        let (_store, clock, mut tracker) = setup(day(2024, 5, 6));
        for _ in 0..3 {
            tracker.on_launch().unwrap();
            tracker.record_session_completed(SIT).unwrap();
            tracker.record_session_completed(SIT).unwrap();
            clock.advance(Duration::days(1));
        }
        assert_eq!(tracker.current_streak(), 3);
        assert_eq!(tracker.best_streak(), 3);
        assert_eq!(tracker.completed_dates().len(), 3);
    }

    #[test]
    fn test_best_streak_survives_reset() {
        let (_store, clock, mut tracker) = setup(day(2024, 5, 6));
        for _ in 0..2 {
            tracker.record_session_completed(SIT).unwrap();
            tracker.record_session_completed(SIT).unwrap();
            clock.advance(Duration::days(1));
        }
        clock.advance(Duration::days(2));
        tracker.on_launch().unwrap();
        assert_eq!(tracker.current_streak(), 0);

        tracker.record_session_completed(SIT).unwrap();
        tracker.record_session_completed(SIT).unwrap();
        assert_eq!(tracker.current_streak(), 1);
        assert_eq!(tracker.best_streak(), 2);
    }

    #[test]
    fn test_session_after_midnight_without_launch_check() {
        let (_store, clock, mut tracker) = setup(day(2024, 5, 6));
        tracker.record_session_completed(SIT).unwrap();
        tracker.record_session_completed(SIT).unwrap();

        // App left open overnight
        clock.advance(Duration::days(1));
        let outcome = tracker.record_session_completed(SIT).unwrap();
        assert_eq!(outcome.daily_session_count, 1);
        let outcome = tracker.record_session_completed(SIT).unwrap();
        assert!(outcome.day_qualified);
        assert_eq!(outcome.current_streak, 2);
    }

    #[test]
    fn test_gap_while_open_restarts_streak() {
        let (store, clock, mut tracker) = setup(day(2024, 5, 6));
        tracker.record_session_completed(SIT).unwrap();
        tracker.record_session_completed(SIT).unwrap();
        assert_eq!(tracker.current_streak(), 1);

        // App left open for three days, no launch check in between
        clock.advance(Duration::days(3));
        let first = tracker.record_session_completed(SIT).unwrap();
        assert_eq!(first.current_streak, 0);
        assert_eq!(store.int(keys::CURRENT_STREAK), 0);

        let second = tracker.record_session_completed(SIT).unwrap();
        assert!(second.day_qualified);
        assert_eq!(second.current_streak, 1);
        assert_eq!(second.best_streak, 1);
        assert_eq!(
            tracker.completed_dates().iter().copied().collect::<Vec<_>>(),
            vec![day(2024, 5, 6), day(2024, 5, 9)]
        );
    }

    #[test]
    fn test_daily_reset_only_once_per_day() {
        let (_store, _clock, mut tracker) = setup(day(2024, 5, 6));
        assert!(tracker.reset_daily_count_if_new_day().unwrap());
        tracker.record_session_completed(SIT).unwrap();
        assert!(!tracker.reset_daily_count_if_new_day().unwrap());
        assert_eq!(tracker.daily_session_count(), 1);
    }

    #[test]
    fn test_daily_count_query_is_zero_on_new_day() {
        let (_store, clock, mut tracker) = setup(day(2024, 5, 6));
        tracker.record_session_completed(SIT).unwrap();
        clock.advance(Duration::days(1));
        assert_eq!(tracker.daily_session_count(), 0);
    }

    #[test]
    fn test_state_persists_across_trackers() {
        let (store, clock, mut tracker) = setup(day(2024, 5, 6));
        tracker.record_session_completed(SIT).unwrap();
        tracker.record_session_completed(SIT).unwrap();

        let reopened = StreakTracker::new(store.clone(), clock.clone());
        assert_eq!(reopened.stats(), tracker.stats());
    }

    #[test]
    fn test_meditations_this_week() {
        // 2024-05-06 is a Monday
        let (_store, clock, mut tracker) = setup(day(2024, 5, 4));
        for _ in 0..4 {
            tracker.record_session_completed(SIT).unwrap();
            tracker.record_session_completed(SIT).unwrap();
            clock.advance(Duration::days(1));
        }
        // Qualified Sat, Sun, Mon, Tue; now Wednesday
        assert_eq!(tracker.meditations_this_week(), 2);
    }

    #[test]
    fn test_denied_write_diverges_from_storage() {
        let (store, clock, mut tracker) = setup(day(2024, 5, 6));
        tracker.record_session_completed(SIT).unwrap();

        store.set_deny_writes(true);
        let err = tracker.record_session_completed(SIT).unwrap_err();
        assert!(matches!(err, Error::WriteDenied { .. }));

        // In memory the day qualified...
        assert_eq!(tracker.current_streak(), 1);
        assert!(tracker.is_completed(day(2024, 5, 6)));

        // ...but the store never saw it
        let fresh = StreakTracker::new(store.clone(), clock.clone());
        assert_eq!(fresh.current_streak(), 0);
        assert_eq!(fresh.stats().daily_session_count, 1);
        assert!(fresh.completed_dates().is_empty());

        // Reloading adopts the stale stored view
        tracker.reload();
        assert_eq!(tracker.current_streak(), 0);
    }

    #[test]
    fn test_subscribers_see_each_mutation() {
        use std::sync::Mutex;

        let (_store, _clock, mut tracker) = setup(day(2024, 5, 6));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tracker.subscribe(move |stats| sink.lock().unwrap().push(stats.current_streak));

        tracker.record_session_completed(SIT).unwrap();
        tracker.record_session_completed(SIT).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_reset_all() {
        let (store, _clock, mut tracker) = setup(day(2024, 5, 6));
        tracker.record_session_completed(SIT).unwrap();
        tracker.record_session_completed(SIT).unwrap();

        tracker.reset_all().unwrap();
        assert_eq!(tracker.stats(), &StreakStats::default());
        assert!(store.is_empty());
    }

    #[test]
    fn test_stored_count_above_threshold_is_clamped() {
        let store = Arc::new(MemoryStore::new());
        store.set(keys::DAILY_SESSION_COUNT, Value::Int(9)).unwrap();
        store.set(keys::CURRENT_STREAK, Value::Int(-3)).unwrap();

        let stats = StreakStats::load(store.as_ref());
        assert_eq!(stats.daily_session_count, QUALIFYING_SESSIONS);
        assert_eq!(stats.current_streak, 0);
    }
}
