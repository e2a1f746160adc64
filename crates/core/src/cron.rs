// crates/core/src/cron.rs
//! Five-field cron expressions (minute hour day month weekday).
//!
//! Supports `*`, lists, ranges, and `/step` in each field. Weekday 0 and 7
//! both denote Sunday. When both day-of-month and day-of-week are
//! restricted, a time matches if either field matches (standard cron
//! behavior). Matching is at minute resolution.

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use std::fmt;
use std::str::FromStr;

use crate::error::CronError;

/// A parsed 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    expr: String,
    minutes: u64,
    hours: u32,
    days: u32,
    months: u16,
    weekdays: u8,
    days_restricted: bool,
    weekdays_restricted: bool,
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY: FieldSpec = FieldSpec { name: "day", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
const WEEKDAY: FieldSpec = FieldSpec { name: "weekday", min: 0, max: 7 };

impl CronExpression {
    /// Whether the expression matches the given minute.
    pub fn matches(&self, t: NaiveDateTime) -> bool {
        let minute_ok = self.minutes & (1u64 << t.minute()) != 0;
        let hour_ok = self.hours & (1u32 << t.hour()) != 0;
        let month_ok = self.months & (1u16 << t.month()) != 0;
        if !(minute_ok && hour_ok && month_ok) {
            return false;
        }

        let day_ok = self.days & (1u32 << t.day()) != 0;
        // Sunday is 0 in our bitmask; chrono numbers Sunday as 7.
        let wd = t.weekday().num_days_from_sunday() as u8;
        let weekday_ok = self.weekdays & (1u8 << wd) != 0;

        match (self.days_restricted, self.weekdays_restricted) {
            // Both restricted: either may match (vixie cron rule).
            (true, true) => day_ok || weekday_ok,
            (true, false) => day_ok,
            (false, true) => weekday_ok,
            (false, false) => true,
        }
    }

    /// The next matching minute strictly after `t`, if any within the
    /// next four years (enough to cover Feb 29 schedules).
    pub fn next_after(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut cursor = t
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(t)
            + Duration::minutes(1);
        let horizon = t + Duration::days(4 * 366);
        while cursor <= horizon {
            if self.matches(cursor) {
                return Some(cursor);
            }
            cursor += Duration::minutes(1);
        }
        None
    }

    /// The original expression text.
    pub fn as_str(&self) -> &str {
        &self.expr
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let minutes = parse_field(fields[0], &MINUTE)?;
        let hours = parse_field(fields[1], &HOUR)? as u32;
        let days = parse_field(fields[2], &DAY)? as u32;
        let months = parse_field(fields[3], &MONTH)? as u16;
        let mut weekdays = parse_field(fields[4], &WEEKDAY)? as u8;
        // 7 is an alias for Sunday.
        if weekdays & (1u8 << 7) != 0 {
            weekdays = (weekdays & !(1u8 << 7)) | 1;
        }

        Ok(CronExpression {
            expr: fields.join(" "),
            minutes,
            hours,
            days,
            months,
            weekdays,
            days_restricted: fields[2] != "*",
            weekdays_restricted: fields[4] != "*",
        })
    }
}

/// Parse one field into a bitmask of matching values.
fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, CronError> {
    let mut mask: u64 = 0;
    for atom in field.split(',') {
        mask |= parse_atom(atom, spec)?;
    }
    if mask == 0 {
        return Err(CronError::InvalidField {
            field: spec.name,
            value: field.to_string(),
        });
    }
    Ok(mask)
}

fn parse_atom(atom: &str, spec: &FieldSpec) -> Result<u64, CronError> {
    let invalid = || CronError::InvalidField {
        field: spec.name,
        value: atom.to_string(),
    };

    let (range_part, step) = match atom.split_once('/') {
        Some((r, s)) => {
            let step: u32 = s.parse().map_err(|_| invalid())?;
            if step == 0 {
                return Err(invalid());
            }
            (r, step)
        }
        None => (atom, 1),
    };

    let (lo, hi) = if range_part == "*" {
        (spec.min, spec.max)
    } else if let Some((a, b)) = range_part.split_once('-') {
        let lo: u32 = a.parse().map_err(|_| invalid())?;
        let hi: u32 = b.parse().map_err(|_| invalid())?;
        if lo > hi {
            return Err(invalid());
        }
        (lo, hi)
    } else {
        let v: u32 = range_part.parse().map_err(|_| invalid())?;
        // A bare value with a step ("N/step") extends to the field max.
        if step > 1 {
            (v, spec.max)
        } else {
            (v, v)
        }
    };

    for bound in [lo, hi] {
        if bound < spec.min || bound > spec.max {
            return Err(CronError::OutOfRange {
                field: spec.name,
                value: bound,
                min: spec.min,
                max: spec.max,
            });
        }
    }

    let mut mask: u64 = 0;
    let mut v = lo;
    while v <= hi {
        mask |= 1u64 << v;
        v += step;
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn test_daily_at_two() {
        let expr: CronExpression = "0 2 * * *".parse().unwrap();
        assert!(expr.matches(at(2026, 8, 6, 2, 0)));
        assert!(!expr.matches(at(2026, 8, 6, 2, 1)));
        assert!(!expr.matches(at(2026, 8, 6, 3, 0)));
        assert!(!expr.matches(at(2026, 8, 6, 1, 59)));
    }

    #[test]
    fn test_every_fifteen_minutes() {
        let expr: CronExpression = "*/15 * * * *".parse().unwrap();
        for minute in [0, 15, 30, 45] {
            assert!(expr.matches(at(2026, 8, 6, 9, minute)));
        }
        assert!(!expr.matches(at(2026, 8, 6, 9, 20)));
    }

    #[test]
    fn test_lists_and_ranges() {
        let expr: CronExpression = "5,35 9-17 * * 1-5".parse().unwrap();
        // 2026-08-06 is a Thursday.
        assert!(expr.matches(at(2026, 8, 6, 9, 5)));
        assert!(expr.matches(at(2026, 8, 6, 17, 35)));
        assert!(!expr.matches(at(2026, 8, 6, 18, 5)));
        // 2026-08-09 is a Sunday.
        assert!(!expr.matches(at(2026, 8, 9, 9, 5)));
    }

    #[test]
    fn test_weekday_seven_is_sunday() {
        let with_seven: CronExpression = "0 0 * * 7".parse().unwrap();
        let with_zero: CronExpression = "0 0 * * 0".parse().unwrap();
        let sunday = at(2026, 8, 9, 0, 0);
        assert!(with_seven.matches(sunday));
        assert!(with_zero.matches(sunday));
        let monday = at(2026, 8, 10, 0, 0);
        assert!(!with_seven.matches(monday));
    }

    #[test]
    fn test_dom_dow_or_rule() {
        // Both restricted: fires on the 13th OR on Fridays.
        let expr: CronExpression = "0 0 13 * 5".parse().unwrap();
        // 2026-08-13 is a Thursday — matches via day-of-month.
        assert!(expr.matches(at(2026, 8, 13, 0, 0)));
        // 2026-08-14 is a Friday — matches via weekday.
        assert!(expr.matches(at(2026, 8, 14, 0, 0)));
        // 2026-08-12 is a Wednesday — neither.
        assert!(!expr.matches(at(2026, 8, 12, 0, 0)));
    }

    #[test]
    fn test_next_after() {
        let expr: CronExpression = "0 2 * * *".parse().unwrap();
        let next = expr.next_after(at(2026, 8, 6, 1, 59)).unwrap();
        assert_eq!(next, at(2026, 8, 6, 2, 0));

        // Strictly after: from 02:00 the next fire is tomorrow.
        let next = expr.next_after(at(2026, 8, 6, 2, 0)).unwrap();
        assert_eq!(next, at(2026, 8, 7, 2, 0));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "0 2 * *".parse::<CronExpression>(),
            Err(CronError::FieldCount(4))
        ));
        assert!(matches!(
            "61 * * * *".parse::<CronExpression>(),
            Err(CronError::OutOfRange { field: "minute", value: 61, .. })
        ));
        assert!(matches!(
            "x * * * *".parse::<CronExpression>(),
            Err(CronError::InvalidField { field: "minute", .. })
        ));
        assert!(matches!(
            "*/0 * * * *".parse::<CronExpression>(),
            Err(CronError::InvalidField { .. })
        ));
        assert!(matches!(
            "* * * 13 *".parse::<CronExpression>(),
            Err(CronError::OutOfRange { field: "month", .. })
        ));
    }

    #[test]
    fn test_display_round_trip() {
        let expr: CronExpression = "0  2 * * *".parse().unwrap();
        assert_eq!(expr.to_string(), "0 2 * * *");
        assert_eq!(expr.to_string().parse::<CronExpression>().unwrap(), expr);
    }
}
