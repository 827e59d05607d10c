//! Wall-clock access and local-date resolution.
//!
//! Every component that stamps or compares time goes through a [`Clock`] so
//! tests can pin "now" and advance it deterministically. Ticket dates are
//! always resolved in the dispatch time zone, never in UTC.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::Mutex;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually driven clock with freeze and advance controls.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += by;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Calendar date of `at` in the dispatch time zone.
#[must_use]
pub fn local_date(at: DateTime<Utc>, tz: Tz) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

/// Warning emitted when a client-supplied timestamp is far from server time.
#[derive(Debug, Clone)]
pub struct ClockSkewWarning {
    /// The client timestamp that triggered the warning.
    pub client_ts: DateTime<Utc>,
    /// The server wall-clock time.
    pub server_ts: DateTime<Utc>,
    /// Detected skew in seconds (positive = client is ahead of the server).
    pub skew_secs: i64,
    /// Human-readable warning message.
    pub message: String,
}

/// Default skew threshold in seconds (5 minutes).
pub const DEFAULT_SKEW_THRESHOLD_SECS: i64 = 300;

/// Check for skew between a client timestamp and server time.
///
/// Offline clients legitimately submit old timestamps, so only a client clock
/// running ahead of the server is reported. Updates are never rejected for
/// skew; the warning is advisory.
#[must_use]
pub fn check_client_skew(
    client_ts: DateTime<Utc>,
    server_ts: DateTime<Utc>,
    threshold_secs: i64,
) -> Option<ClockSkewWarning> {
    let skew_secs = (client_ts - server_ts).num_seconds();
    if skew_secs <= threshold_secs {
        return None;
    }

    Some(ClockSkewWarning {
        client_ts,
        server_ts,
        skew_secs,
        message: format!(
            "client clock is {skew_secs} seconds ahead of the server, threshold is {threshold_secs} seconds"
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::minutes(90));
        assert_eq!(clock.now(), start + Duration::minutes(90));
    }

    #[test]
    fn local_date_respects_dispatch_zone() {
        // 03:30 UTC on Jan 2 is still Jan 1 in Edmonton (UTC-7).
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 30, 0).unwrap();
        let tz: Tz = "America/Edmonton".parse().unwrap();
        assert_eq!(local_date(at, tz), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert_eq!(local_date(at, Tz::UTC), NaiveDate::from_ymd_opt(2026, 1, 2).unwrap());
    }

    #[test]
    fn skew_only_flags_clients_ahead() {
        let server = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let behind = server - Duration::hours(6);
        assert!(check_client_skew(behind, server, 300).is_none());

        let ahead = server + Duration::minutes(10);
        let warning = check_client_skew(ahead, server, 300).unwrap();
        assert_eq!(warning.skew_secs, 600);
        assert!(warning.message.contains("ahead"));
    }
}
