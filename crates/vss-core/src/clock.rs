//! Date provider and calendar arithmetic.
//!
//! Every rule that looks at "today" takes the date from a [`Clock`], so tests
//! and the CLI's `--today` flag can pin it.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Months, NaiveDate, NaiveTime, Utc};

/// Format of every calendar date in the engine (`YYYY-MM-DD`).
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;

    /// The current UTC calendar date.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    /// A clock frozen at `instant`.
    #[must_use]
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(instant.timestamp_millis()),
        }
    }

    /// A clock frozen at midnight UTC of `date`.
    #[must_use]
    pub fn on(date: NaiveDate) -> Self {
        Self::new(midnight(date))
    }

    /// Move the clock to midnight UTC of `date`.
    pub fn set_date(&self, date: NaiveDate) {
        self.millis
            .store(midnight(date).timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::default()).and_utc()
}

/// Advance `date` by `months` calendar months.
///
/// The day of month is clamped to the length of the target month, so
/// `2026-01-31 + 1` is `2026-02-28` and `2024-01-31 + 1` is `2024-02-29`.
/// Saturates at the maximum representable date.
#[must_use]
pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

/// Parse a `YYYY-MM-DD` date.
///
/// # Errors
///
/// Returns the chrono parse error for anything else.
pub fn parse_date(input: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn add_months_clamps_to_short_month() {
        assert_eq!(add_months(date("2026-01-31"), 1), date("2026-02-28"));
        assert_eq!(add_months(date("2024-01-31"), 1), date("2024-02-29"));
        assert_eq!(add_months(date("2026-03-31"), 1), date("2026-04-30"));
    }

    #[test]
    fn add_months_keeps_day_when_it_fits() {
        assert_eq!(add_months(date("2026-01-15"), 1), date("2026-02-15"));
        assert_eq!(add_months(date("2026-02-28"), 12), date("2027-02-28"));
        assert_eq!(add_months(date("2025-11-30"), 3), date("2026-02-28"));
    }

    #[test]
    fn add_zero_months_is_identity() {
        assert_eq!(add_months(date("2026-05-31"), 0), date("2026-05-31"));
    }

    #[test]
    fn date_order_matches_iso_string_order() {
        let a = date("2026-02-01");
        let b = date("2026-10-01");
        assert!(a < b);
        assert!("2026-02-01" < "2026-10-01");
    }

    #[test]
    fn parse_date_rejects_other_formats() {
        assert!(parse_date("02/01/2026").is_err());
        assert!(parse_date("2026-2-1x").is_err());
        assert_eq!(parse_date(" 2026-02-01 ").unwrap(), date("2026-02-01"));
    }

    #[test]
    fn fixed_clock_reports_pinned_date() {
        let clock = FixedClock::on(date("2026-02-01"));
        assert_eq!(clock.today(), date("2026-02-01"));
        clock.set_date(date("2026-03-15"));
        assert_eq!(clock.today(), date("2026-03-15"));
    }
}
