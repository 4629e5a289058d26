//! Failed-attempt tracking with temporary lockout.
//!
//! Counts failed redemptions per user. Reaching the configured threshold
//! locks the user out until `now + lockout_duration`; while locked, the
//! engine rejects redemptions without touching the key store.

use crate::config::deadline;
use crate::registry::UserId;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::Duration;

/// Per-user failure tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockoutState {
    /// Failures since the last success, clear or lockout.
    pub fail_count: u32,

    /// Attempts admitted but not yet settled.
    pub in_flight: u32,

    /// End of the current lockout, if any.
    pub locked_until: Option<DateTime<Utc>>,

    /// Time of the most recent failure.
    pub last_failure: Option<DateTime<Utc>>,
}

impl LockoutState {
    fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// Forget an elapsed lockout and its failures. In-flight attempts stay.
    fn reset_failures(&mut self) {
        self.fail_count = 0;
        self.locked_until = None;
        self.last_failure = None;
    }

    fn is_idle(&self) -> bool {
        self.in_flight == 0 && self.fail_count == 0 && self.locked_until.is_none()
    }
}

/// Result of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Failures left before lockout.
    Remaining(u32),
    /// The user is locked out until the given time.
    Locked {
        /// End of the lockout.
        until: DateTime<Utc>,
    },
}

/// Tracks failed redemption attempts per user.
///
/// Every redemption first reserves a slot with [`AttemptLimiter::begin`].
/// Settled failures plus reserved slots never exceed the failure budget, so
/// a burst of concurrent guesses gets no more tries than a sequential one.
#[derive(Debug, Default)]
pub struct AttemptLimiter {
    states: Mutex<HashMap<UserId, LockoutState>>,
    settled: Condvar,
}

/// A reserved redemption attempt.
///
/// Settle it with [`Attempt::fail`] or [`Attempt::succeed`]. Dropping it
/// unsettled releases the slot without counting a failure.
#[derive(Debug)]
#[must_use = "an attempt holds a slot of the user's failure budget until settled"]
pub struct Attempt<'a> {
    limiter: &'a AttemptLimiter,
    user: UserId,
    settled: bool,
}

impl Attempt<'_> {
    /// Count the attempt as a failure.
    ///
    /// Reaching `max_failures` locks the user out until
    /// `now + lockout_duration`.
    pub fn fail(
        mut self,
        now: DateTime<Utc>,
        max_failures: u32,
        lockout_duration: Duration,
    ) -> FailureOutcome {
        self.settled = true;
        self.limiter
            .settle(self.user, |state| {
                if let Some(until) = state.locked_until {
                    if now < until {
                        return FailureOutcome::Locked { until };
                    }
                    state.reset_failures();
                }

                state.fail_count = state.fail_count.saturating_add(1);
                state.last_failure = Some(now);

                if state.fail_count >= max_failures {
                    let until = deadline(now, lockout_duration);
                    state.locked_until = Some(until);
                    FailureOutcome::Locked { until }
                } else {
                    FailureOutcome::Remaining(max_failures - state.fail_count)
                }
            })
    }

    /// Count the attempt as a success, resetting the user's failures.
    pub fn succeed(mut self) {
        self.settled = true;
        self.limiter.settle(self.user, LockoutState::reset_failures);
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.limiter.settle(self.user, |_| ());
        }
    }
}

impl AttemptLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an attempt for `user`.
    ///
    /// Waits while the user's remaining budget is fully held by attempts
    /// still in flight; those settle within one key-store lookup.
    ///
    /// # Errors
    /// Returns the end of the lockout if the user is locked out at `now`.
    pub fn begin(
        &self,
        user: UserId,
        now: DateTime<Utc>,
        max_failures: u32,
    ) -> Result<Attempt<'_>, DateTime<Utc>> {
        let mut states = self.states.lock();
        loop {
            let state = states.entry(user).or_default();
            if let Some(until) = state.locked_until {
                if now < until {
                    return Err(until);
                }
                state.reset_failures();
            }

            let reserved = state.fail_count.saturating_add(state.in_flight);
            if state.in_flight == 0 || reserved < max_failures {
                state.in_flight += 1;
                return Ok(Attempt {
                    limiter: self,
                    user,
                    settled: false,
                });
            }

            self.settled.wait(&mut states);
        }
    }

    /// Release one in-flight slot after applying `apply` to the user's state.
    fn settle<T>(&self, user: UserId, apply: impl FnOnce(&mut LockoutState) -> T) -> T {
        let mut states = self.states.lock();
        let state = states.entry(user).or_default();
        state.in_flight = state.in_flight.saturating_sub(1);
        let result = apply(state);
        if state.is_idle() {
            states.remove(&user);
        }
        drop(states);

        self.settled.notify_all();
        result
    }

    /// Whether `user` is locked out at `now`.
    pub fn is_locked(&self, user: UserId, now: DateTime<Utc>) -> bool {
        self.locked_until(user, now).is_some()
    }

    /// Reset the user's failures and lockout.
    ///
    /// Returns whether there was anything to reset. Attempts in flight are
    /// unaffected.
    pub fn clear(&self, user: UserId) -> bool {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(&user) else {
            return false;
        };
        let had_failures = state.fail_count > 0 || state.locked_until.is_some();
        state.reset_failures();
        if state.is_idle() {
            states.remove(&user);
        }
        drop(states);

        self.settled.notify_all();
        had_failures
    }

    /// End of the user's active lockout, if locked at `now`.
    pub fn locked_until(&self, user: UserId, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.states
            .lock()
            .get(&user)
            .filter(|state| state.is_locked(now))
            .and_then(|state| state.locked_until)
    }

    /// Current failure state of a user.
    pub fn state(&self, user: UserId) -> Option<LockoutState> {
        self.states.lock().get(&user).cloned()
    }

    /// Drop elapsed lockouts and failure counts idle for longer than
    /// `window`. Returns the number of entries removed.
    pub fn sweep(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let mut states = self.states.lock();
        let before = states.len();
        states.retain(|_, state| {
            state.in_flight > 0
                || match state.locked_until {
                    Some(until) => now < until,
                    None => state
                        .last_failure
                        .is_some_and(|last| now < deadline(last, window)),
                }
        });
        before - states.len()
    }

    /// Number of tracked users.
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    /// Whether no user is tracked.
    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Barrier;

    const LOCKOUT: Duration = Duration::from_secs(15 * 60);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    fn user() -> UserId {
        UserId::new(77)
    }

    fn fail(limiter: &AttemptLimiter, user: UserId, now: DateTime<Utc>, max: u32) -> FailureOutcome {
        limiter
            .begin(user, now, max)
            .expect("not locked")
            .fail(now, max, LOCKOUT)
    }

    #[test]
    fn test_counts_down_then_locks() {
        let limiter = AttemptLimiter::new();

        for remaining in (1..5).rev() {
            assert_eq!(fail(&limiter, user(), t0(), 5), FailureOutcome::Remaining(remaining));
        }

        let until = t0() + chrono::Duration::minutes(15);
        assert_eq!(fail(&limiter, user(), t0(), 5), FailureOutcome::Locked { until });
        assert_eq!(limiter.locked_until(user(), t0()), Some(until));
        assert_eq!(limiter.begin(user(), t0(), 5).map(|_| ()), Err(until));
    }

    #[test]
    fn test_lockout_elapses() {
        let limiter = AttemptLimiter::new();
        for _ in 0..3 {
            fail(&limiter, user(), t0(), 3);
        }

        let until = t0() + chrono::Duration::minutes(15);
        assert!(limiter
            .locked_until(user(), until - chrono::Duration::seconds(1))
            .is_some());
        assert!(limiter.locked_until(user(), until).is_none());

        // A failure after the lockout starts a fresh count
        assert_eq!(fail(&limiter, user(), until, 3), FailureOutcome::Remaining(2));
    }

    #[test]
    fn test_success_resets() {
        let limiter = AttemptLimiter::new();
        for _ in 0..4 {
            fail(&limiter, user(), t0(), 5);
        }
        limiter.begin(user(), t0(), 5).unwrap().succeed();

        assert!(limiter.state(user()).is_none());
        assert_eq!(fail(&limiter, user(), t0(), 5), FailureOutcome::Remaining(4));
    }

    #[test]
    fn test_clear_lifts_lockout() {
        let limiter = AttemptLimiter::new();
        for _ in 0..5 {
            fail(&limiter, user(), t0(), 5);
        }
        assert!(limiter.is_locked(user(), t0()));

        assert!(limiter.clear(user()));
        assert!(!limiter.is_locked(user(), t0()));
        assert!(limiter.state(user()).is_none());
        assert!(!limiter.clear(user()));
        assert_eq!(fail(&limiter, user(), t0(), 5), FailureOutcome::Remaining(4));
    }

    #[test]
    fn test_dropped_attempt_releases_slot() {
        let limiter = AttemptLimiter::new();
        {
            let _attempt = limiter.begin(user(), t0(), 1).unwrap();
            assert_eq!(limiter.state(user()).map(|s| s.in_flight), Some(1));
        }
        assert!(limiter.state(user()).is_none());
        assert!(limiter.begin(user(), t0(), 1).is_ok());
    }

    #[test]
    fn test_users_are_independent() {
        let limiter = AttemptLimiter::new();
        for _ in 0..5 {
            fail(&limiter, user(), t0(), 5);
        }
        assert!(limiter.locked_until(UserId::new(78), t0()).is_none());
    }

    #[test]
    fn test_concurrent_burst_respects_budget() {
        let limiter = AttemptLimiter::new();
        let threads = 64;
        let barrier = Barrier::new(threads);

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let limiter = &limiter;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        match limiter.begin(user(), t0(), 5) {
                            Ok(attempt) => {
                                attempt.fail(t0(), 5, LOCKOUT);
                                1
                            }
                            Err(_) => 0,
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 5);
        assert!(limiter.locked_until(user(), t0()).is_some());
    }

    #[test]
    fn test_sweep_drops_stale_entries() {
        let limiter = AttemptLimiter::new();
        let locked = UserId::new(1);
        let idle = UserId::new(2);
        let recent = UserId::new(3);

        fail(&limiter, locked, t0(), 1);
        fail(&limiter, idle, t0(), 5);
        fail(&limiter, recent, t0() + chrono::Duration::minutes(10), 5);

        assert_eq!(limiter.sweep(t0() + chrono::Duration::minutes(5), LOCKOUT), 0);

        let removed = limiter.sweep(t0() + chrono::Duration::minutes(15), LOCKOUT);
        assert_eq!(removed, 2);
        assert!(limiter.state(locked).is_none());
        assert!(limiter.state(idle).is_none());
        assert!(limiter.state(recent).is_some());
    }

    #[test]
    fn test_sweep_keeps_in_flight_attempts() {
        let limiter = AttemptLimiter::new();
        let attempt = limiter.begin(user(), t0(), 5).unwrap();
        assert_eq!(limiter.sweep(t0() + chrono::Duration::days(1), LOCKOUT), 0);
        attempt.succeed();
        assert!(limiter.is_empty());
    }
}
