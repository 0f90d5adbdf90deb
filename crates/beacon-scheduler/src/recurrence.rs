use std::fmt;
use std::ops::RangeInclusive;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use beacon_core::types::RepetitionUnit;

/// Farthest ahead `next_after` looks. A yearly Feb 29 schedule can go eight
/// years between fire times (2096 → 2104).
const SEARCH_HORIZON_DAYS: i64 = 366 * 8;

/// One field of a recurrence: a wildcard or a single literal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CronField {
    Any,
    At(u32),
}

impl CronField {
    fn pin(pinned: bool, value: u32) -> Self {
        if pinned {
            CronField::At(value)
        } else {
            CronField::Any
        }
    }

    fn matches(self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::At(v) => v == value,
        }
    }

    fn values(self, min: u32, max: u32) -> RangeInclusive<u32> {
        match self {
            CronField::Any => min..=max,
            CronField::At(v) => v..=v,
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CronField::Any => write!(f, "*"),
            CronField::At(v) => write!(f, "{v}"),
        }
    }
}

/// A five-field `minute hour day-of-month month day-of-week` expression.
///
/// Day-of-week uses the cron convention, 0 = Sunday … 6 = Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Recurrence {
    pub minute: CronField,
    pub hour: CronField,
    pub day_of_month: CronField,
    pub month: CronField,
    pub day_of_week: CronField,
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month, self.day_of_week
        )
    }
}

/// Convert a Monday = 1 … Sunday = 7 weekday number to Sunday = 0 … Saturday = 6.
pub fn to_cron_day_of_week(monday_based: u32) -> u32 {
    monday_based % 7
}

/// Build the recurrence that fires once per `unit`, anchored on `start`.
///
/// Each unit pins the fields at or below its own granularity to the start
/// time's values and leaves the rest as wildcards; weeks pin the weekday
/// instead of a calendar day.
pub fn recurrence_for<Tz: TimeZone>(unit: RepetitionUnit, start: &DateTime<Tz>) -> Recurrence {
    let (minute, hour, day_of_month, month, day_of_week) = match unit {
        RepetitionUnit::Minutes => (false, false, false, false, false),
        RepetitionUnit::Hours => (true, false, false, false, false),
        RepetitionUnit::Days => (true, true, false, false, false),
        RepetitionUnit::Weeks => (true, true, false, false, true),
        RepetitionUnit::Months => (true, true, true, false, false),
        RepetitionUnit::Years => (true, true, true, true, false),
    };

    Recurrence {
        minute: CronField::pin(minute, start.minute()),
        hour: CronField::pin(hour, start.hour()),
        day_of_month: CronField::pin(day_of_month, start.day()),
        month: CronField::pin(month, start.month()),
        day_of_week: CronField::pin(
            day_of_week,
            to_cron_day_of_week(start.weekday().number_from_monday()),
        ),
    }
}

impl Recurrence {
    /// First fire time strictly after `after`, at whole-minute precision.
    ///
    /// Returns `None` when nothing matches within the search horizon
    /// (e.g. day-of-month 31 pinned together with month 2).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut date = after.date_naive();
        let last = date + Duration::days(SEARCH_HORIZON_DAYS);

        while date <= last {
            if self.matches_date(date) {
                for hour in self.hour.values(0, 23) {
                    for minute in self.minute.values(0, 59) {
                        let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                            continue;
                        };
                        let candidate = Utc.from_utc_datetime(&naive);
                        if candidate > after {
                            return Some(candidate);
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        self.day_of_month.matches(date.day())
            && self.month.matches(date.month())
            && self
                .day_of_week
                .matches(date.weekday().num_days_from_sunday())
    }
}
