//! Resumable date cursor persisted between runs.
//!
//! One date is attempted per run. A success moves the cursor forward, a
//! failure leaves it in place so the next run retries the same date, and a
//! run of consecutive failures trips the breaker.

use crate::client::Outcome;
use crate::date::{BatchDate, DateRange};
use crate::error::TriggerError;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

pub const DEFAULT_HALT_THRESHOLD: NonZeroU32 = NonZeroU32::new(3).unwrap();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPhase {
    NotStarted,
    InProgress,
    Exhausted,
}

/// Result of recording one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    pub halted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CursorState {
    pub start_date: BatchDate,
    pub end_date: BatchDate,
    pub current_date: BatchDate,
    pub processed_dates: Vec<BatchDate>,
    pub failed_attempts: BTreeMap<BatchDate, u32>,
    pub consecutive_failures: u32,
    pub last_run: Option<DateTime<Utc>>,
}

impl CursorState {
    /// Fresh cursor at the start of `range`.
    pub fn new(range: DateRange) -> Self {
        Self {
            start_date: range.start(),
            end_date: range.end(),
            current_date: range.start(),
            processed_dates: Vec::new(),
            failed_attempts: BTreeMap::new(),
            consecutive_failures: 0,
            last_run: None,
        }
    }

    pub fn range(&self) -> Result<DateRange, TriggerError> {
        DateRange::new(self.start_date, self.end_date)
    }

    /// The cursor while it is inside the range.
    pub fn next_pending_date(&self) -> Option<BatchDate> {
        (self.current_date <= self.end_date).then_some(self.current_date)
    }

    pub fn phase(&self) -> CursorPhase {
        if self.current_date > self.end_date {
            CursorPhase::Exhausted
        } else if self.processed_dates.is_empty() {
            CursorPhase::NotStarted
        } else {
            CursorPhase::InProgress
        }
    }

    /// Breaker state; a zero threshold cannot be expressed.
    pub fn is_halted(&self, threshold: NonZeroU32) -> bool {
        self.consecutive_failures >= threshold.get()
    }

    pub fn is_processed(&self, date: BatchDate) -> bool {
        self.processed_dates.contains(&date)
    }

    /// Record the outcome of attempting `date`. Dates outside the range are
    /// ignored, leaving the state untouched.
    pub fn advance(
        &mut self,
        date: BatchDate,
        outcome: &Outcome,
        threshold: NonZeroU32,
    ) -> Advance {
        if date < self.start_date || date > self.end_date {
            warn!(
                "Ignoring outcome for {} outside {} to {}",
                date, self.start_date, self.end_date
            );
        } else if outcome.is_success() {
            if !self.is_processed(date) {
                self.processed_dates.push(date);
            }
            let next = date.succ();
            if next > self.current_date {
                self.current_date = next;
            }
            self.consecutive_failures = 0;
        } else {
            *self.failed_attempts.entry(date).or_insert(0) += 1;
            self.consecutive_failures += 1;
        }

        Advance {
            halted: self.is_halted(threshold),
        }
    }

    /// Operator reset of the consecutive-failure breaker.
    pub fn reset_breaker(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn validate(&self) -> Result<(), TriggerError> {
        let range = self.range()?;
        if self.current_date < self.start_date {
            return Err(invalid(format!(
                "current_date {} precedes start_date {}",
                self.current_date, self.start_date
            )));
        }
        if self.current_date > self.end_date.succ() {
            return Err(invalid(format!(
                "current_date {} is past end_date {}",
                self.current_date, self.end_date
            )));
        }

        let mut seen = BTreeSet::new();
        for date in &self.processed_dates {
            if !range.contains(*date) {
                return Err(invalid(format!("processed date {date} is outside {range}")));
            }
            if *date >= self.current_date {
                return Err(invalid(format!(
                    "processed date {date} is not before current_date {}",
                    self.current_date
                )));
            }
            if !seen.insert(*date) {
                return Err(invalid(format!("processed date {date} appears twice")));
            }
        }
        Ok(())
    }
}

fn invalid(reason: String) -> TriggerError {
    TriggerError::InvalidState(reason)
}

/// File-backed home of the [`CursorState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state for `range`, falling back to a fresh state when the
    /// file is missing, unreadable, malformed or written for another range.
    pub fn load(&self, range: DateRange) -> CursorState {
        match self.try_load(range) {
            Ok(Some(state)) => {
                debug!(
                    "Loaded state from {}: current_date={} processed={}",
                    self.path.display(),
                    state.current_date,
                    state.processed_dates.len()
                );
                state
            }
            Ok(None) => {
                info!(
                    "No state file at {}, starting at {}",
                    self.path.display(),
                    range.start()
                );
                CursorState::new(range)
            }
            Err(err) => {
                warn!(
                    "Discarding state file {}: {}; starting at {}",
                    self.path.display(),
                    err,
                    range.start()
                );
                CursorState::new(range)
            }
        }
    }

    /// Typed load: `Ok(None)` when there is no file, an error when the
    /// record cannot be trusted for `range`.
    pub fn try_load(&self, range: DateRange) -> Result<Option<CursorState>, TriggerError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let state: CursorState = serde_json::from_str(&raw)?;
        state.validate()?;
        if state.start_date != range.start() || state.end_date != range.end() {
            return Err(invalid(format!(
                "recorded range {} to {} differs from requested {}",
                state.start_date, state.end_date, range
            )));
        }
        Ok(Some(state))
    }

    /// Write the state atomically: temp file first, then rename.
    pub fn save(&self, state: &CursorState) -> Result<(), TriggerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut body = serde_json::to_string_pretty(state)?;
        body.push('\n');

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn date(raw: &str) -> BatchDate {
        raw.parse().unwrap()
    }

    fn range(start: &str, end: &str) -> DateRange {
        DateRange::new(date(start), date(end)).unwrap()
    }

    fn ok() -> Outcome {
        Outcome::Success {
            response_body: "{}".into(),
        }
    }

    fn api_err() -> Outcome {
        Outcome::ApiError {
            status: StatusCode::UNAUTHORIZED,
            response_body: "expired".into(),
            diagnostic: "401 Unauthorized".into(),
        }
    }

    fn transport_err() -> Outcome {
        Outcome::TransportError {
            message: "connection refused".into(),
        }
    }

    #[test]
    fn fresh_state_starts_at_range_start() {
        let state = CursorState::new(range("20240101", "20240103"));
        assert_eq!(state.current_date, date("20240101"));
        assert!(state.processed_dates.is_empty());
        assert_eq!(state.phase(), CursorPhase::NotStarted);
        assert_eq!(state.next_pending_date(), Some(date("20240101")));
    }

    #[test]
    fn three_day_scenario() {
        let mut state = CursorState::new(range("20240101", "20240103"));

        let step = state.advance(date("20240101"), &ok(), DEFAULT_HALT_THRESHOLD);
        assert!(!step.halted);
        assert_eq!(state.processed_dates, vec![date("20240101")]);
        assert_eq!(state.current_date, date("20240102"));
        assert_eq!(state.phase(), CursorPhase::InProgress);

        let step = state.advance(date("20240102"), &api_err(), DEFAULT_HALT_THRESHOLD);
        assert!(!step.halted);
        assert_eq!(state.processed_dates, vec![date("20240101")]);
        assert_eq!(state.current_date, date("20240102"));
        assert_eq!(state.failed_attempts.get(&date("20240102")), Some(&1));
        assert_eq!(state.consecutive_failures, 1);

        state.advance(date("20240102"), &transport_err(), DEFAULT_HALT_THRESHOLD);
        let step = state.advance(date("20240102"), &api_err(), DEFAULT_HALT_THRESHOLD);
        assert!(step.halted);
        assert_eq!(state.consecutive_failures, 3);
        assert_eq!(state.failed_attempts.get(&date("20240102")), Some(&3));
        assert_eq!(state.current_date, date("20240102"));
        assert!(state.is_halted(DEFAULT_HALT_THRESHOLD));
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let mut state = CursorState::new(range("20240101", "20240110"));
        state.advance(date("20240101"), &api_err(), DEFAULT_HALT_THRESHOLD);
        state.advance(date("20240101"), &transport_err(), DEFAULT_HALT_THRESHOLD);
        assert_eq!(state.consecutive_failures, 2);

        state.advance(date("20240101"), &ok(), DEFAULT_HALT_THRESHOLD);
        assert_eq!(state.consecutive_failures, 0);
        // per-date history survives the success
        assert_eq!(state.failed_attempts.get(&date("20240101")), Some(&2));
    }

    #[test]
    fn consecutive_failures_count_across_dates() {
        let mut state = CursorState::new(range("20240101", "20240110"));
        for (n, raw) in ["20240101", "20240105", "20240107", "20240101"].iter().enumerate() {
            state.advance(date(raw), &api_err(), NonZeroU32::new(10).unwrap());
            assert_eq!(state.consecutive_failures, n as u32 + 1);
        }
        assert_eq!(state.failed_attempts.get(&date("20240101")), Some(&2));
    }

    #[test]
    fn success_never_regresses_or_duplicates() {
        let mut state = CursorState::new(range("20240101", "20240110"));
        state.advance(date("20240105"), &ok(), DEFAULT_HALT_THRESHOLD);
        assert_eq!(state.current_date, date("20240106"));

        state.advance(date("20240102"), &ok(), DEFAULT_HALT_THRESHOLD);
        assert_eq!(state.current_date, date("20240106"));

        state.advance(date("20240105"), &ok(), DEFAULT_HALT_THRESHOLD);
        assert_eq!(
            state.processed_dates,
            vec![date("20240105"), date("20240102")]
        );
    }

    #[test]
    fn advance_ignores_dates_outside_the_range() {
        let mut state = CursorState::new(range("20240101", "20240103"));
        let before = state.clone();

        let step = state.advance(date("20240104"), &ok(), DEFAULT_HALT_THRESHOLD);
        assert!(!step.halted);
        state.advance(date("20231231"), &api_err(), DEFAULT_HALT_THRESHOLD);
        assert_eq!(state, before);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn threshold_of_one_halts_on_first_failure_only() {
        let one = NonZeroU32::new(1).unwrap();
        let mut state = CursorState::new(range("20240101", "20240103"));
        assert!(!state.is_halted(one));
        assert!(!state.advance(date("20240101"), &ok(), one).halted);
        assert!(state.advance(date("20240102"), &api_err(), one).halted);
    }

    #[test]
    fn exhausted_once_cursor_passes_end() {
        let mut state = CursorState::new(range("20240101", "20240102"));
        state.advance(date("20240101"), &ok(), DEFAULT_HALT_THRESHOLD);
        assert_eq!(state.next_pending_date(), Some(date("20240102")));
        state.advance(date("20240102"), &ok(), DEFAULT_HALT_THRESHOLD);
        assert_eq!(state.next_pending_date(), None);
        assert_eq!(state.phase(), CursorPhase::Exhausted);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn reset_breaker_clears_only_the_counter() {
        let mut state = CursorState::new(range("20240101", "20240110"));
        for _ in 0..3 {
            state.advance(date("20240101"), &api_err(), DEFAULT_HALT_THRESHOLD);
        }
        state.reset_breaker();
        assert!(!state.is_halted(DEFAULT_HALT_THRESHOLD));
        assert_eq!(state.failed_attempts.get(&date("20240101")), Some(&3));
        assert_eq!(state.current_date, date("20240101"));
    }

    #[test]
    fn validate_rejects_inconsistent_records() {
        let base = CursorState::new(range("20240101", "20240110"));

        let mut before_start = base.clone();
        before_start.current_date = date("20231231");
        assert!(before_start.validate().is_err());

        let mut past_end = base.clone();
        past_end.current_date = date("20240112");
        assert!(past_end.validate().is_err());

        let mut duplicated = base.clone();
        duplicated.current_date = date("20240103");
        duplicated.processed_dates = vec![date("20240101"), date("20240101")];
        assert!(duplicated.validate().is_err());

        let mut ahead_of_cursor = base.clone();
        ahead_of_cursor.processed_dates = vec![date("20240101")];
        assert!(ahead_of_cursor.validate().is_err());

        let mut reversed = base;
        reversed.start_date = date("20240111");
        assert!(reversed.validate().is_err());
    }

    #[test]
    fn load_missing_file_yields_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let r = range("20240101", "20240103");
        assert!(store.try_load(r).unwrap().is_none());
        assert_eq!(store.load(r), CursorState::new(r));
    }

    #[test]
    fn load_corrupt_file_yields_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::new(&path);
        let r = range("20240101", "20240103");

        for body in [
            "not json",
            r#"{"start_date":"20240101","end_date":"20240103"}"#,
            r#"{"start_date":"20240101","end_date":"20240103","current_date":"2024-01-02","processed_dates":[],"failed_attempts":{},"consecutive_failures":0,"last_run":null}"#,
        ] {
            fs::write(&path, body).unwrap();
            assert!(store.try_load(r).is_err());
            let state = store.load(r);
            assert_eq!(state.current_date, date("20240101"));
            assert!(state.processed_dates.is_empty());
        }
    }

    #[test]
    fn load_reseeds_when_range_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let mut state = CursorState::new(range("20240101", "20240103"));
        state.advance(date("20240101"), &ok(), DEFAULT_HALT_THRESHOLD);
        store.save(&state).unwrap();

        let other = range("20240201", "20240203");
        let loaded = store.load(other);
        assert_eq!(loaded, CursorState::new(other));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested").join("state.json"));
        let r = range("20240101", "20240103");
        let mut state = CursorState::new(r);
        state.advance(date("20240101"), &ok(), DEFAULT_HALT_THRESHOLD);
        state.advance(date("20240102"), &api_err(), DEFAULT_HALT_THRESHOLD);
        state.last_run = Some(Utc::now());

        store.save(&state).unwrap();
        assert_eq!(store.try_load(r).unwrap(), Some(state));
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }

    #[test]
    fn saved_file_is_readable_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::new(&path);
        let mut state = CursorState::new(range("20240101", "20240103"));
        state.advance(date("20240101"), &api_err(), DEFAULT_HALT_THRESHOLD);
        store.save(&state).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["current_date"], "20240101");
        assert_eq!(raw["failed_attempts"]["20240101"], 1);
        assert_eq!(raw["last_run"], serde_json::Value::Null);
    }
}
