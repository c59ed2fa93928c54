// src/shift_window.rs
#![allow(dead_code)] // Self-contained predicate; its consumers (the shift endpoints) live outside this service

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShiftKind {
    Night,
    Sunday,
}

impl ShiftKind {
    /// Moment the shift stops being editable: the day after the shift date
    /// at 02:30 UTC. A Sunday shift's date is already normalized to the
    /// Sunday, so its cutoff lands on Monday 02:30 UTC.
    pub fn cutoff(self, shift_date: NaiveDate) -> Option<NaiveDateTime> {
        shift_date.succ_opt()?.and_hms_opt(2, 30, 0)
    }
}

/// Normalize a date to the upcoming Sunday. A date that already is a Sunday
/// maps to itself.
pub fn next_sunday_utc(from: NaiveDate) -> NaiveDate {
    let days_ahead = (7 - from.weekday().num_days_from_sunday()) % 7;
    from + Duration::days(i64::from(days_ahead))
}

/// Whether a shift may still be deleted or modified. Strictly before the
/// cutoff only; at the cutoff instant the shift is already historical.
pub fn is_shift_active(kind: ShiftKind, shift_date: NaiveDate, now: NaiveDateTime) -> bool {
    match kind.cutoff(shift_date) {
        Some(cutoff) => now < cutoff,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d").expect("valid test date")
    }

    fn at(date_str: &str, h: u32, m: u32, s: u32) -> NaiveDateTime {
        d(date_str).and_hms_opt(h, m, s).expect("valid test time")
    }

    #[test]
    fn night_shift_is_active_strictly_before_the_next_day_cutoff() {
        let shift = d("2025-10-16");
        assert!(is_shift_active(ShiftKind::Night, shift, at("2025-10-16", 23, 0, 0)));
        assert!(is_shift_active(ShiftKind::Night, shift, at("2025-10-17", 2, 29, 59)));
        assert!(!is_shift_active(ShiftKind::Night, shift, at("2025-10-17", 2, 30, 0)));
        assert!(!is_shift_active(ShiftKind::Night, shift, at("2025-10-17", 8, 0, 0)));
    }

    #[test]
    fn sunday_shift_closes_monday_at_the_cutoff() {
        // 2025-10-19 is a Sunday.
        let shift = d("2025-10-19");
        assert!(is_shift_active(ShiftKind::Sunday, shift, at("2025-10-19", 12, 0, 0)));
        assert!(is_shift_active(ShiftKind::Sunday, shift, at("2025-10-20", 2, 29, 59)));
        assert!(!is_shift_active(ShiftKind::Sunday, shift, at("2025-10-20", 2, 30, 0)));
    }

    #[test]
    fn next_sunday_lands_on_the_upcoming_sunday() {
        assert_eq!(next_sunday_utc(d("2025-10-13")), d("2025-10-19")); // Monday
        assert_eq!(next_sunday_utc(d("2025-10-16")), d("2025-10-19")); // Thursday
        assert_eq!(next_sunday_utc(d("2025-10-18")), d("2025-10-19")); // Saturday
        // A Sunday already is the upcoming Sunday.
        assert_eq!(next_sunday_utc(d("2025-10-19")), d("2025-10-19"));
        assert_eq!(next_sunday_utc(d("2025-10-26")), d("2025-10-26"));
    }

    #[test]
    fn unrepresentable_cutoff_means_inactive() {
        assert!(!is_shift_active(
            ShiftKind::Night,
            NaiveDate::MAX,
            at("2025-10-17", 0, 0, 0)
        ));
    }
}
