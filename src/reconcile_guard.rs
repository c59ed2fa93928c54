// src/reconcile_guard.rs

use chrono::NaiveDate;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Why a reconciliation run was refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ConcurrentExecutionPrevented,
    AlreadyProcessed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ConcurrentExecutionPrevented => "concurrent_execution_prevented",
            SkipReason::AlreadyProcessed => "already_processed",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct GuardState {
    busy: bool,
    last_completed: Option<NaiveDate>,
}

/// Process-local admission control for the reconciliation engine.
///
/// At most one run executes at a time, and at most one run completes per
/// calendar day. The busy flag wins over the date check, so a concurrent
/// caller is told about the in-flight run rather than yesterday's result.
/// State lives in memory only; a restart forgets the completed date and the
/// durable store's idempotency keys absorb the replay.
#[derive(Debug, Clone, Default)]
pub struct ReconcileGuard {
    state: Arc<Mutex<GuardState>>,
}

impl ReconcileGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a run for `today`, or report why it must not start. An admitted
    /// caller holds the guard until it calls `finish`.
    pub fn try_begin(&self, today: NaiveDate) -> Result<(), SkipReason> {
        let mut state = self.state.lock().unwrap();
        if state.busy {
            return Err(SkipReason::ConcurrentExecutionPrevented);
        }
        if state.last_completed == Some(today) {
            return Err(SkipReason::AlreadyProcessed);
        }
        state.busy = true;
        Ok(())
    }

    /// Release the guard. Only a successful run marks the day as processed;
    /// after a failure the same date may be retried.
    pub fn finish(&self, today: NaiveDate, succeeded: bool) {
        let mut state = self.state.lock().unwrap();
        if succeeded {
            state.last_completed = Some(today);
        }
        state.busy = false;
    }

    pub fn last_completed(&self) -> Option<NaiveDate> {
        self.state.lock().unwrap().last_completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d").expect("valid test date")
    }

    #[test]
    fn admits_a_fresh_day_and_blocks_reruns() {
        let guard = ReconcileGuard::new();
        let today = d("2025-10-16");

        assert!(guard.try_begin(today).is_ok());
        guard.finish(today, true);

        assert_eq!(guard.try_begin(today), Err(SkipReason::AlreadyProcessed));
        assert_eq!(guard.last_completed(), Some(today));
    }

    #[test]
    fn busy_guard_reports_concurrent_execution_first() {
        let guard = ReconcileGuard::new();
        let today = d("2025-10-16");
        guard.try_begin(today).expect("first caller admitted");
        guard.finish(today, true);
        guard.try_begin(d("2025-10-17")).expect("next day admitted");

        // Busy wins even though today was already completed.
        assert_eq!(
            guard.try_begin(today),
            Err(SkipReason::ConcurrentExecutionPrevented)
        );
    }

    #[test]
    fn failed_run_leaves_the_day_retryable() {
        let guard = ReconcileGuard::new();
        let today = d("2025-10-16");

        guard.try_begin(today).expect("admitted");
        guard.finish(today, false);

        assert_eq!(guard.last_completed(), None);
        assert!(guard.try_begin(today).is_ok());
    }

    #[test]
    fn next_day_is_admitted_after_completion() {
        let guard = ReconcileGuard::new();
        guard.try_begin(d("2025-10-16")).expect("admitted");
        guard.finish(d("2025-10-16"), true);

        assert!(guard.try_begin(d("2025-10-17")).is_ok());
    }

    #[test]
    fn exactly_one_of_many_concurrent_callers_is_admitted() {
        let guard = ReconcileGuard::new();
        let today = d("2025-10-16");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                std::thread::spawn(move || guard.try_begin(today).is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().expect("thread joined"))
            .filter(|admitted| *admitted)
            .count();

        assert_eq!(admitted, 1);
    }
}
