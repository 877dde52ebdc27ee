use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// Whether a login attempt is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AttemptPhase {
    #[default]
    Idle,
    Attempting,
}

#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) phase: AttemptPhase,
    pub(crate) login_attempts: u32,
    pub(crate) is_logged_in: bool,
    /// Monotonic start of the latest attempt, for the re-login cooldown.
    pub(crate) last_attempt_at: Option<Instant>,
    pub(crate) last_login_time: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Back to defaults, except that an in-flight attempt keeps its phase.
    /// Only the attempt's guard may return the session to `Idle`.
    pub(crate) fn reset(&mut self) {
        *self = Self {
            phase: self.phase,
            ..Self::default()
        };
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            is_processing: self.phase == AttemptPhase::Attempting,
            login_attempts: self.login_attempts,
            is_logged_in: self.is_logged_in,
            last_login_time: self.last_login_time,
        }
    }
}

/// Point-in-time copy of the session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: AttemptPhase,
    pub is_processing: bool,
    pub login_attempts: u32,
    pub is_logged_in: bool,
    pub last_login_time: Option<DateTime<Utc>>,
}

pub(crate) fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds the session in `Attempting` and returns it to `Idle` when dropped,
/// whichever way the attempt ends.
pub(crate) struct AttemptGuard<'a> {
    state: &'a Mutex<SessionState>,
    attempt: u32,
}

impl<'a> AttemptGuard<'a> {
    /// Enter `Attempting`, recording the attempt. Returns `None` if another
    /// attempt already holds the session.
    pub(crate) fn begin(state: &'a Mutex<SessionState>) -> Option<Self> {
        let mut session = lock(state);
        if session.phase == AttemptPhase::Attempting {
            return None;
        }
        session.phase = AttemptPhase::Attempting;
        session.login_attempts += 1;
        session.last_attempt_at = Some(Instant::now());
        session.last_login_time = Some(Utc::now());

        Some(Self {
            state,
            attempt: session.login_attempts,
        })
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn set_logged_in(&self, logged_in: bool) {
        lock(self.state).is_logged_in = logged_in;
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        lock(self.state).phase = AttemptPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_records_attempt() {
        let state = Mutex::new(SessionState::default());
        let guard = AttemptGuard::begin(&state).expect("idle session should admit an attempt");

        assert_eq!(guard.attempt(), 1);
        let snapshot = lock(&state).snapshot();
        assert!(snapshot.is_processing);
        assert_eq!(snapshot.phase, AttemptPhase::Attempting);
        assert_eq!(snapshot.login_attempts, 1);
        assert!(snapshot.last_login_time.is_some());
    }

    #[test]
    fn second_entry_is_rejected_without_counting() {
        let state = Mutex::new(SessionState::default());
        let _guard = AttemptGuard::begin(&state).unwrap();

        assert!(AttemptGuard::begin(&state).is_none());
        assert_eq!(lock(&state).login_attempts, 1);
    }

    #[test]
    fn drop_returns_to_idle() {
        let state = Mutex::new(SessionState::default());
        {
            let guard = AttemptGuard::begin(&state).unwrap();
            guard.set_logged_in(true);
        }

        let snapshot = lock(&state).snapshot();
        assert!(!snapshot.is_processing);
        assert!(snapshot.is_logged_in);

        let guard = AttemptGuard::begin(&state).unwrap();
        assert_eq!(guard.attempt(), 2);
    }

    #[test]
    fn reset_keeps_in_flight_attempt() {
        let state = Mutex::new(SessionState::default());
        let _guard = AttemptGuard::begin(&state).unwrap();

        lock(&state).reset();

        let snapshot = lock(&state).snapshot();
        assert_eq!(snapshot.phase, AttemptPhase::Attempting);
        assert_eq!(snapshot.login_attempts, 0);
        assert!(snapshot.last_login_time.is_none());
        assert!(AttemptGuard::begin(&state).is_none());
    }

    #[test]
    fn reset_clears_idle_session() {
        let state = Mutex::new(SessionState::default());
        {
            let guard = AttemptGuard::begin(&state).unwrap();
            guard.set_logged_in(true);
        }

        lock(&state).reset();

        let snapshot = lock(&state).snapshot();
        assert_eq!(snapshot.phase, AttemptPhase::Idle);
        assert_eq!(snapshot.login_attempts, 0);
        assert!(!snapshot.is_logged_in);
    }

    #[test]
    fn panic_inside_attempt_still_returns_to_idle() {
        let state = Mutex::new(SessionState::default());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = AttemptGuard::begin(&state).unwrap();
            panic!("presence client exploded");
        }));

        assert!(result.is_err());
        assert_eq!(lock(&state).phase, AttemptPhase::Idle);
    }
}
