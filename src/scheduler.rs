// src/scheduler.rs

use crate::reconcile::{RunSummary, WorklogReconciler};
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct Schedule {
    pub run_at: NaiveTime,
    pub utc_offset: FixedOffset,
}

/// First instant strictly after `now` whose wall-clock time in the
/// schedule's offset equals `run_at`. Fixed offsets have no gaps or folds,
/// so the conversion is exact.
pub fn next_run_after(now: DateTime<Utc>, schedule: &Schedule) -> DateTime<Utc> {
    let offset_secs = i64::from(schedule.utc_offset.local_minus_utc());
    let local_today = now.with_timezone(&schedule.utc_offset).date_naive();
    let naive_utc = local_today.and_time(schedule.run_at) - ChronoDuration::seconds(offset_secs);
    let mut candidate = DateTime::<Utc>::from_naive_utc_and_offset(naive_utc, Utc);
    if candidate <= now {
        candidate += ChronoDuration::days(1);
    }
    candidate
}

/// Daily trigger loop. Sleeps until the next scheduled mark, runs the
/// reconciler for the current UTC date, logs the summary, repeats.
pub async fn run_reconcile_scheduler(reconciler: Arc<WorklogReconciler>, schedule: Schedule) {
    info!(
        "Scheduling daily auto-submit at {} (UTC offset {})",
        schedule.run_at, schedule.utc_offset
    );

    loop {
        let now = Utc::now();
        let next_run = next_run_after(now, &schedule);
        let wait = (next_run - now).to_std().unwrap_or_default();
        info!("Next auto-submit run at {next_run} (in {}s)", wait.as_secs());
        sleep(wait).await;

        info!("Auto-submit job triggered by the daily schedule");
        let today = Utc::now().date_naive();
        let summary = reconciler.run(today).await;
        log_run_summary(&summary);
    }
}

pub fn log_run_summary(summary: &RunSummary) {
    if summary.success {
        info!(
            "Auto-submit job completed: processed={} submitted={} leaveAssigned={}",
            summary.processed, summary.submitted, summary.leave_assigned
        );
        for user in &summary.per_user_log {
            match user.entries_count {
                Some(count) => {
                    info!("   - {}: {} ({} entries)", user.name, user.action.as_str(), count);
                }
                None => {
                    info!(
                        "   - {}: {} ({} hours)",
                        user.name,
                        user.action.as_str(),
                        user.hours.unwrap_or_default()
                    );
                }
            }
        }
    } else if summary.skipped {
        info!(
            "Auto-submit job skipped: {}",
            summary.reason.as_deref().unwrap_or("unknown")
        );
    } else {
        error!(
            "Auto-submit job failed: {}",
            summary.error.as_deref().unwrap_or("unknown error")
        );
    }
}

/// Debug heartbeat. Logs the schedule-local time every two minutes so a
/// deployment's clock and offset can be eyeballed from the logs.
pub async fn run_heartbeat_job(utc_offset: FixedOffset) {
    info!(
        "Test job enabled - logging every {} seconds",
        HEARTBEAT_INTERVAL.as_secs()
    );
    loop {
        sleep(HEARTBEAT_INTERVAL).await;
        let local = Utc::now().with_timezone(&utc_offset);
        info!(
            "Test job heartbeat - current schedule-local time: {}",
            local.format("%d/%m/%Y, %I:%M:%S %p")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(330 * 60).expect("valid test offset")
    }

    fn utc(y: i32, mo: u32, day: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, day, h, mi, s)
            .single()
            .expect("valid test instant")
    }

    fn ist_schedule() -> Schedule {
        Schedule {
            run_at: NaiveTime::from_hms_opt(22, 30, 0).expect("valid test time"),
            utc_offset: ist(),
        }
    }

    #[test]
    fn next_run_is_today_before_the_mark() {
        // 10:00 UTC is 15:30 IST; 22:30 IST is 17:00 UTC.
        let next = next_run_after(utc(2025, 10, 16, 10, 0, 0), &ist_schedule());
        assert_eq!(next, utc(2025, 10, 16, 17, 0, 0));
    }

    #[test]
    fn next_run_rolls_to_tomorrow_at_or_after_the_mark() {
        let schedule = ist_schedule();
        assert_eq!(
            next_run_after(utc(2025, 10, 16, 17, 0, 0), &schedule),
            utc(2025, 10, 17, 17, 0, 0)
        );
        assert_eq!(
            next_run_after(utc(2025, 10, 16, 17, 0, 1), &schedule),
            utc(2025, 10, 17, 17, 0, 0)
        );
    }

    #[test]
    fn next_run_handles_the_local_date_being_ahead_of_utc() {
        // 18:45 UTC on the 16th is already 00:15 IST on the 17th.
        let next = next_run_after(utc(2025, 10, 16, 18, 45, 0), &ist_schedule());
        assert_eq!(next, utc(2025, 10, 17, 17, 0, 0));
    }

    #[test]
    fn next_run_works_for_negative_offsets() {
        let schedule = Schedule {
            run_at: NaiveTime::from_hms_opt(22, 30, 0).expect("valid test time"),
            utc_offset: FixedOffset::west_opt(5 * 3600).expect("valid test offset"),
        };
        // 12:00 UTC is 07:00 local; 22:30 local is 03:30 UTC the next day.
        let next = next_run_after(utc(2025, 10, 16, 12, 0, 0), &schedule);
        assert_eq!(next, utc(2025, 10, 17, 3, 30, 0));
    }
}
