//! Wall-clock access.
//!
//! Monotonic time comes from `embassy-time`; calendar time is only known
//! once the host has synced it (SNTP or similar), so every consumer has to
//! cope with [`WallClock::now_utc`] returning `None`.

use alloc::string::{String, ToString};

use chrono::{DateTime, Duration as TimeDelta, FixedOffset, NaiveTime, Utc};
use embassy_time::Duration;

pub trait WallClock {
    /// Current UTC time, or `None` if the clock has not been set.
    fn now_utc(&self) -> Option<DateTime<Utc>>;
}

/// A clock that is never set. Timestamps go out empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsynced;

impl WallClock for Unsynced {
    fn now_utc(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// ISO-8601 UTC timestamp with second precision, or an empty string.
pub fn iso_timestamp(clock: &impl WallClock) -> String {
    match clock.now_utc() {
        Some(now) => now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => String::new(),
    }
}

/// Time from `now` until the next local 00:00:05 at `utc_offset_secs`.
pub fn until_rollover(now: DateTime<Utc>, utc_offset_secs: i32) -> Option<Duration> {
    let offset = FixedOffset::east_opt(utc_offset_secs)?;
    let local = now.with_timezone(&offset).naive_local();
    // The day's roster is refreshed five seconds past local midnight.
    let mut next = local.date().and_time(NaiveTime::from_hms_opt(0, 0, 5)?);
    if next <= local {
        next += TimeDelta::days(1);
    }
    let millis = (next - local).num_milliseconds();
    Some(Duration::from_millis(u64::try_from(millis).ok()?))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    struct Fixed(DateTime<Utc>);

    impl WallClock for Fixed {
        fn now_utc(&self) -> Option<DateTime<Utc>> {
            Some(self.0)
        }
    }

    #[test]
    fn timestamps() {
        let clock = Fixed(Utc.with_ymd_and_hms(2026, 3, 2, 7, 5, 9).unwrap());
        assert_eq!(iso_timestamp(&clock), "2026-03-02T07:05:09Z");
        assert_eq!(iso_timestamp(&Unsynced), "");
    }

    #[test]
    fn rollover_uses_local_date() {
        // 14:59:55 UTC is 23:59:55 in UTC+9.
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 14, 59, 55).unwrap();
        assert_eq!(until_rollover(now, 9 * 3600), Some(Duration::from_secs(10)));
        // Same instant in UTC: next rollover is the following midnight.
        assert_eq!(
            until_rollover(now, 0),
            Some(Duration::from_secs(9 * 3600 + 5 + 5))
        );
    }

    #[test]
    fn rollover_just_after_midnight_is_same_day() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 1).unwrap();
        assert_eq!(until_rollover(now, 9 * 3600), Some(Duration::from_secs(4)));
    }
}
