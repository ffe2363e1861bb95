//! Calendar period computation for the monthly invoice run.
//!
//! Period start/end derive from calendar rules, never from wall-clock
//! elapsed time — a 31-day month and a 28-day month both produce exactly
//! one run, and the run's boundaries never drift with when the job
//! actually executes.

use chrono::{DateTime, Datelike, TimeZone, Utc};

use grant_core::error::GrantError;

/// `[start, end)` bounds for a calendar month, in UTC.
pub fn month_bounds(year: i32, month: u32) -> Result<(DateTime<Utc>, DateTime<Utc>), GrantError> {
    if !(1..=12).contains(&month) {
        return Err(GrantError::InvalidField { field: "month", reason: format!("month {month} out of range") });
    }
    let start = Utc
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or(GrantError::InvalidField { field: "year", reason: format!("invalid year {year}") })?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let end = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .ok_or(GrantError::InvalidField { field: "year", reason: format!("invalid year {next_year}") })?;
    Ok((start, end))
}

/// The calendar month immediately preceding `(year, month)`.
pub fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// One scheduled monthly invoice run: a target period plus the watermark
/// that bounds claim selection to what had settled by the time the run
/// was kicked off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlyRunWindow {
    pub year: i32,
    pub month: u32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub watermark_ingested_at: DateTime<Utc>,
}

impl MonthlyRunWindow {
    /// The run that should fire for the calendar month prior to `now` —
    /// the natural cadence for a batch job that runs at the start of each
    /// month to invoice everything approved during the one just closed.
    pub fn for_previous_month(now: DateTime<Utc>) -> Result<Self, GrantError> {
        let (year, month) = previous_month(now.year(), now.month());
        let (period_start, period_end) = month_bounds(year, month)?;
        Ok(MonthlyRunWindow { year, month, period_start, period_end, watermark_ingested_at: now })
    }

    pub fn for_month(year: i32, month: u32, watermark_ingested_at: DateTime<Utc>) -> Result<Self, GrantError> {
        let (period_start, period_end) = month_bounds(year, month)?;
        Ok(MonthlyRunWindow { year, month, period_start, period_end, watermark_ingested_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_bounds_span_exactly_one_calendar_month() {
        let (start, end) = month_bounds(2026, 2).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn december_rolls_into_next_year() {
        let (start, end) = month_bounds(2026, 12).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn previous_month_wraps_january_to_prior_december() {
        assert_eq!(previous_month(2026, 1), (2025, 12));
        assert_eq!(previous_month(2026, 6), (2026, 5));
    }

    #[test]
    fn invalid_month_is_rejected() {
        assert!(month_bounds(2026, 13).is_err());
        assert!(month_bounds(2026, 0).is_err());
    }

    #[test]
    fn run_window_for_previous_month_targets_prior_calendar_month() {
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 0).unwrap();
        let window = MonthlyRunWindow::for_previous_month(now).unwrap();
        assert_eq!((window.year, window.month), (2026, 2));
        assert_eq!(window.watermark_ingested_at, now);
    }
}
