//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Reference time zone and clock helpers for reading synthesis."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, FixedOffset, Timelike, Utc};

/// Asia/Jakarta offset. The zone observes no daylight saving, so a fixed offset is exact.
pub const REFERENCE_UTC_OFFSET_SECS: i32 = 7 * 3600;

/// First hour (inclusive) of the daytime window in the reference zone.
pub const DAYTIME_START_HOUR: u32 = 6;
/// Last hour (inclusive) of the daytime window in the reference zone.
pub const DAYTIME_END_HOUR: u32 = 18;

/// Zone used for the solar day/night rule.
pub fn reference_zone() -> FixedOffset {
    FixedOffset::east_opt(REFERENCE_UTC_OFFSET_SECS).expect("reference offset within one day")
}

/// Hour of day (0..=23) of `instant` as observed in `zone`.
pub fn local_hour(zone: FixedOffset, instant: DateTime<Utc>) -> u32 {
    instant.with_timezone(&zone).hour()
}

/// Whether `hour` falls inside the inclusive daytime window.
pub fn is_daytime(hour: u32) -> bool {
    (DAYTIME_START_HOUR..=DAYTIME_END_HOUR).contains(&hour)
}

/// Source of wall-clock time for the simulator.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn local_hour_applies_reference_offset() {
        let zone = reference_zone();
        assert_eq!(local_hour(zone, utc(0, 0)), 7);
        assert_eq!(local_hour(zone, utc(16, 59)), 23);
        assert_eq!(local_hour(zone, utc(17, 0)), 0);
        assert_eq!(local_hour(zone, utc(23, 30)), 6);
    }

    #[test]
    fn daytime_window_is_inclusive() {
        assert!(!is_daytime(5));
        assert!(is_daytime(6));
        assert!(is_daytime(12));
        assert!(is_daytime(18));
        assert!(!is_daytime(19));
        assert!(!is_daytime(0));
    }

    #[test]
    fn fixed_clock_returns_its_instant() {
        let instant = utc(9, 15);
        assert_eq!(FixedClock(instant).now(), instant);
    }
}
