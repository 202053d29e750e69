//! Completeness Oracle
//!
//! Maps a local calendar day onto the exact set of canonical UTC slots it
//! covers. Ordinary days have 96 slots; a spring-forward day loses one local
//! hour (92 slots) and a fall-back day repeats one (100 slots).
//!
//! Everything here is pure and total: an unrecognized date still resolves
//! through the general DST rule of the configured zone, and the first and
//! last representable dates resolve without overflow.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::series::{TimeSlot, SLOTS_PER_DAY};

// =============================================================================
// TIMEZONE RULES
// =============================================================================

/// Daylight-saving rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DstRule {
    /// Fixed offset all year.
    None,
    /// Last Sunday of March 01:00 UTC until last Sunday of October 01:00 UTC.
    EuropeanUnion { save_minutes: i32 },
    /// Second Sunday of March 02:00 local standard time until first Sunday of
    /// November 02:00 local daylight time.
    UnitedStates { save_minutes: i32 },
}

/// The timezone-transition calendar used to build promotion windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimezoneRules {
    /// Standard (winter) offset from UTC, minutes east.
    pub standard_offset_minutes: i32,
    pub dst: DstRule,
}

impl Default for TimezoneRules {
    fn default() -> Self {
        Self::europe_dublin()
    }
}

impl TimezoneRules {
    /// GMT in winter, IST (UTC+1) in summer.
    pub const fn europe_dublin() -> Self {
        Self {
            standard_offset_minutes: 0,
            dst: DstRule::EuropeanUnion { save_minutes: 60 },
        }
    }

    pub const fn fixed(offset_minutes: i32) -> Self {
        Self {
            standard_offset_minutes: offset_minutes,
            dst: DstRule::None,
        }
    }

    fn save_minutes(&self) -> i32 {
        match self.dst {
            DstRule::None => 0,
            DstRule::EuropeanUnion { save_minutes } | DstRule::UnitedStates { save_minutes } => {
                save_minutes
            }
        }
    }

    /// DST interval `[start, end)` in UTC for a year, if the rule observes one.
    fn dst_interval(&self, year: i32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let std = Duration::minutes(self.standard_offset_minutes as i64);
        match self.dst {
            DstRule::None => None,
            DstRule::EuropeanUnion { .. } => {
                let start = utc_at(last_sunday(year, 3)?, 1);
                let end = utc_at(last_sunday(year, 10)?, 1);
                Some((start, end))
            }
            DstRule::UnitedStates { save_minutes } => {
                let save = Duration::minutes(save_minutes as i64);
                let start = utc_at(nth_sunday(year, 3, 2)?, 2) - std;
                let end = utc_at(nth_sunday(year, 11, 1)?, 2) - std - save;
                Some((start, end))
            }
        }
    }

    /// Offset from UTC in minutes in force at a UTC instant.
    pub fn offset_minutes_at(&self, utc: DateTime<Utc>) -> i32 {
        match self.dst_interval(utc.year()) {
            Some((start, end)) if utc >= start && utc < end => {
                self.standard_offset_minutes + self.save_minutes()
            }
            _ => self.standard_offset_minutes,
        }
    }

    /// Resolve a local wall-clock time to UTC.
    ///
    /// A repeated local time resolves to its earliest occurrence; a local time
    /// inside a spring-forward gap resolves as if the clock had not moved yet.
    pub fn local_to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let std = self.standard_offset_minutes;
        let dst = std + self.save_minutes();

        // Larger offset first: it yields the earlier UTC instant.
        let mut candidates = [dst, std];
        candidates.sort_unstable_by(|a, b| b.cmp(a));

        for offset in candidates {
            if let Some(naive) = shift_minutes(local, -offset) {
                let utc = Utc.from_utc_datetime(&naive);
                if self.offset_minutes_at(utc) == offset {
                    return utc;
                }
            }
        }

        Utc.from_utc_datetime(&saturating_shift(local, -std))
    }

    /// Local wall-clock time of a slot.
    pub fn local_time_of(&self, slot: TimeSlot) -> NaiveDateTime {
        let utc = slot.to_datetime();
        saturating_shift(utc.naive_utc(), self.offset_minutes_at(utc))
    }

    /// Local calendar date a slot belongs to.
    pub fn local_date_of(&self, slot: TimeSlot) -> NaiveDate {
        self.local_time_of(slot).date()
    }

    /// UTC instant of local midnight starting `date`.
    pub fn day_start_utc(&self, date: NaiveDate) -> DateTime<Utc> {
        self.local_to_utc(date.and_time(NaiveTime::MIN))
    }
}

fn shift_minutes(ts: NaiveDateTime, minutes: i32) -> Option<NaiveDateTime> {
    ts.checked_add_signed(Duration::minutes(minutes as i64))
}

/// Shift by an offset, clamping at the ends of the representable range.
fn saturating_shift(ts: NaiveDateTime, minutes: i32) -> NaiveDateTime {
    shift_minutes(ts, minutes).unwrap_or(if minutes < 0 {
        NaiveDateTime::MIN
    } else {
        NaiveDateTime::MAX
    })
}

fn utc_at(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
    Utc.from_utc_datetime(&date.and_time(time))
}

fn last_sunday(year: i32, month: u32) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last = first_of_next.pred_opt()?;
    let back = last.weekday().num_days_from_sunday() as i64;
    Some(last - Duration::days(back))
}

fn nth_sunday(year: i32, month: u32, n: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let ahead = (7 - first.weekday().num_days_from_sunday()) % 7;
    let day = first + Duration::days(ahead as i64 + 7 * (n as i64 - 1));
    debug_assert_eq!(day.weekday(), Weekday::Sun);
    Some(day)
}

// =============================================================================
// EXPECTED SLOTS
// =============================================================================

/// Sorted, unique canonical slots covered by a local calendar day.
pub fn expected_slots(local_date: NaiveDate, rules: &TimezoneRules) -> Vec<TimeSlot> {
    let (start, end) = day_bounds(local_date, rules);
    let mut slots = Vec::with_capacity(start.slots_until(end));
    let mut slot = start;
    while slot < end {
        slots.push(slot);
        slot = slot.next();
    }
    slots
}

/// `[start, end)` slot bounds of a local calendar day.
///
/// Defined for every `NaiveDate`. The last representable date has no
/// following midnight and spans an ordinary 96-slot day. At the first and
/// last dates, local instants that fall outside the UTC range clamp to it.
pub fn day_bounds(local_date: NaiveDate, rules: &TimezoneRules) -> (TimeSlot, TimeSlot) {
    let start = TimeSlot::floor(rules.day_start_utc(local_date));
    let end = match local_date.succ_opt() {
        Some(next) => TimeSlot::floor(rules.day_start_utc(next)),
        None => start.add_slots(SLOTS_PER_DAY as i64),
    };
    (start, end)
}

/// A local calendar day as a contiguous UTC window plus its expected slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionWindow {
    pub local_date: NaiveDate,
    pub start: TimeSlot,
    pub end: TimeSlot,
    pub expected: Vec<TimeSlot>,
}

impl PromotionWindow {
    pub fn for_date(local_date: NaiveDate, rules: &TimezoneRules) -> Self {
        let (start, end) = day_bounds(local_date, rules);
        Self {
            local_date,
            start,
            end,
            expected: expected_slots(local_date, rules),
        }
    }

    #[inline]
    pub fn contains(&self, slot: TimeSlot) -> bool {
        slot >= self.start && slot < self.end
    }

    #[inline]
    pub fn expected_count(&self) -> usize {
        self.expected.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_dublin_ordinary_day() {
        let rules = TimezoneRules::europe_dublin();
        let slots = expected_slots(d(2025, 10, 24), &rules);
        assert_eq!(slots.len(), 96);
        // IST: local midnight is 23:00 UTC the previous day.
        assert_eq!(slots[0].to_ts_utc(), "2025-10-23T23:00:00Z");
        assert_eq!(slots[95].to_ts_utc(), "2025-10-24T22:45:00Z");
    }

    #[test]
    fn test_dublin_spring_forward_has_92_slots() {
        let rules = TimezoneRules::europe_dublin();
        let slots = expected_slots(d(2025, 3, 30), &rules);
        assert_eq!(slots.len(), 92);
        assert_eq!(slots[0].to_ts_utc(), "2025-03-30T00:00:00Z");
        assert_eq!(slots[91].to_ts_utc(), "2025-03-30T22:45:00Z");
    }

    #[test]
    fn test_dublin_fall_back_has_100_slots() {
        let rules = TimezoneRules::europe_dublin();
        let slots = expected_slots(d(2025, 10, 26), &rules);
        assert_eq!(slots.len(), 100);
        assert_eq!(slots[0].to_ts_utc(), "2025-10-25T23:00:00Z");
        assert_eq!(slots[99].to_ts_utc(), "2025-10-26T23:45:00Z");
    }

    #[test]
    fn test_every_day_of_two_years() {
        let rules = TimezoneRules::europe_dublin();
        let spring = [d(2024, 3, 31), d(2025, 3, 30)];
        let fall = [d(2024, 10, 27), d(2025, 10, 26)];

        let mut day = d(2024, 1, 1);
        while day <= d(2025, 12, 31) {
            let slots = expected_slots(day, &rules);
            let expected = if spring.contains(&day) {
                92
            } else if fall.contains(&day) {
                100
            } else {
                SLOTS_PER_DAY
            };
            assert_eq!(slots.len(), expected, "slot count for {}", day);
            assert!(slots.windows(2).all(|w| w[0] < w[1]), "sorted-unique for {}", day);

            // Consecutive days tile the axis without gaps or overlap.
            let next = expected_slots(day.succ_opt().unwrap(), &rules);
            assert_eq!(slots.last().unwrap().next(), next[0]);

            day = day.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_united_states_rule() {
        let rules = TimezoneRules {
            standard_offset_minutes: -5 * 60,
            dst: DstRule::UnitedStates { save_minutes: 60 },
        };
        assert_eq!(expected_slots(d(2025, 3, 9), &rules).len(), 92);
        assert_eq!(expected_slots(d(2025, 11, 2), &rules).len(), 100);
        assert_eq!(expected_slots(d(2025, 7, 4), &rules).len(), 96);
        assert_eq!(
            expected_slots(d(2025, 7, 4), &rules)[0].to_ts_utc(),
            "2025-07-04T04:00:00Z"
        );
    }

    #[test]
    fn test_fixed_offset_is_always_96() {
        let rules = TimezoneRules::fixed(330);
        for day in [d(2025, 3, 30), d(2025, 10, 26), d(2024, 2, 29)] {
            assert_eq!(expected_slots(day, &rules).len(), 96);
        }
    }

    #[test]
    fn test_calendar_extremes_do_not_overflow() {
        let dublin = TimezoneRules::europe_dublin();
        assert_eq!(expected_slots(NaiveDate::MIN, &dublin).len(), SLOTS_PER_DAY);
        assert_eq!(expected_slots(NaiveDate::MAX, &dublin).len(), SLOTS_PER_DAY);

        for rules in [TimezoneRules::fixed(330), TimezoneRules::fixed(-600)] {
            for day in [NaiveDate::MIN, NaiveDate::MAX] {
                let window = PromotionWindow::for_date(day, &rules);
                assert!(!window.expected.is_empty(), "{} at {:?}", day, rules);
                assert!(window.expected.len() <= SLOTS_PER_DAY);
                assert!(window.expected.windows(2).all(|w| w[0] < w[1]));
                let _ = rules.local_time_of(window.start);
            }
        }
    }

    #[test]
    fn test_local_time_round_trip() {
        let rules = TimezoneRules::europe_dublin();
        let window = PromotionWindow::for_date(d(2025, 10, 26), &rules);
        for slot in &window.expected {
            assert_eq!(rules.local_date_of(*slot), d(2025, 10, 26));
        }
        // The repeated 01:00 local hour shows up twice.
        let one_am = window
            .expected
            .iter()
            .filter(|s| rules.local_time_of(**s).time() == NaiveTime::from_hms_opt(1, 0, 0).unwrap())
            .count();
        assert_eq!(one_am, 2);
        assert!(!window.contains(window.end));
        assert!(window.contains(window.start));
    }
}
