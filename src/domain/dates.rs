//! Publication date filters.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month, OffsetDateTime};

use crate::util::timezone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelativePeriod {
    #[serde(rename = "today")]
    Today,
    #[serde(rename = "yesterday")]
    Yesterday,
    #[serde(rename = "this_week")]
    ThisWeek,
    #[serde(rename = "last_week")]
    LastWeek,
    #[serde(rename = "this_month")]
    ThisMonth,
    #[serde(rename = "last_month")]
    LastMonth,
    #[serde(rename = "this_year")]
    ThisYear,
    #[serde(rename = "last_year")]
    LastYear,
    #[serde(rename = "last_7_days")]
    Last7Days,
    #[serde(rename = "last_30_days")]
    Last30Days,
    #[serde(rename = "last_90_days")]
    Last90Days,
    #[serde(rename = "last_365_days")]
    Last365Days,
}

impl RelativePeriod {
    /// Resolve the period against `now` on the wall clock of `tz`.
    ///
    /// Open periods (`today`, `this_*`, `last_N_days`) only bound the start and
    /// run up to now. Closed past periods (`yesterday`, `last_week`,
    /// `last_month`, `last_year`) end where the current period starts. Period
    /// starts are local midnights carrying the offset in effect at that
    /// midnight.
    pub fn resolve(self, now: OffsetDateTime, tz: Tz) -> DateBounds {
        let now = timezone::localize(now, tz);
        let today = now.date();
        let midnight = |date: Date| timezone::local_midnight(date, tz);

        match self {
            RelativePeriod::Today => DateBounds::after(midnight(today)),
            RelativePeriod::Yesterday => DateBounds::between(
                midnight(today.saturating_sub(Duration::days(1))),
                midnight(today),
            ),
            RelativePeriod::ThisWeek => DateBounds::after(midnight(start_of_week(today))),
            RelativePeriod::LastWeek => {
                let this_week = start_of_week(today);
                DateBounds::between(
                    midnight(this_week.saturating_sub(Duration::weeks(1))),
                    midnight(this_week),
                )
            }
            RelativePeriod::ThisMonth => DateBounds::after(midnight(start_of_month(today))),
            RelativePeriod::LastMonth => DateBounds::between(
                midnight(start_of_previous_month(today)),
                midnight(start_of_month(today)),
            ),
            RelativePeriod::ThisYear => DateBounds::after(midnight(start_of_year(today, 0))),
            RelativePeriod::LastYear => DateBounds::between(
                midnight(start_of_year(today, 1)),
                midnight(start_of_year(today, 0)),
            ),
            RelativePeriod::Last7Days => DateBounds::after(now - Duration::days(7)),
            RelativePeriod::Last30Days => DateBounds::after(now - Duration::days(30)),
            RelativePeriod::Last90Days => DateBounds::after(now - Duration::days(90)),
            RelativePeriod::Last365Days => DateBounds::after(now - Duration::days(365)),
        }
    }
}

fn start_of_week(today: Date) -> Date {
    let back = i64::from(today.weekday().number_days_from_monday());
    today.saturating_sub(Duration::days(back))
}

fn start_of_month(today: Date) -> Date {
    today.replace_day(1).unwrap_or(today)
}

fn start_of_previous_month(today: Date) -> Date {
    let (year, month) = match today.month() {
        Month::January => (today.year() - 1, Month::December),
        month => (today.year(), month.previous()),
    };
    Date::from_calendar_date(year, month, 1).unwrap_or_else(|_| start_of_month(today))
}

/// January 1st, `years_back` years before `today`'s year.
fn start_of_year(today: Date, years_back: i32) -> Date {
    Date::from_ordinal_date(today.year() - years_back, 1).unwrap_or(today)
}

/// Resolved publication window. Both bounds are exclusive, matching the
/// content API's `after`/`before` semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateBounds {
    pub after: Option<OffsetDateTime>,
    pub before: Option<OffsetDateTime>,
}

impl DateBounds {
    pub fn after(after: OffsetDateTime) -> Self {
        Self {
            after: Some(after),
            before: None,
        }
    }

    pub fn between(after: OffsetDateTime, before: OffsetDateTime) -> Self {
        Self {
            after: Some(after),
            before: Some(before),
        }
    }

    pub fn contains(&self, instant: OffsetDateTime) -> bool {
        self.after.is_none_or(|after| instant > after)
            && self.before.is_none_or(|before| instant < before)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DateFilter {
    #[default]
    None,
    Relative {
        #[serde(default)]
        relative: Option<RelativePeriod>,
    },
    /// Already-resolved ISO-8601 instants, passed through verbatim.
    #[serde(rename_all = "camelCase")]
    Absolute {
        #[serde(default)]
        start_date: Option<String>,
        #[serde(default)]
        end_date: Option<String>,
        /// Editor display hint only.
        #[serde(default)]
        include_time: bool,
    },
}

impl DateFilter {
    pub fn relative(period: RelativePeriod) -> Self {
        DateFilter::Relative {
            relative: Some(period),
        }
    }

    pub fn absolute(start_date: Option<&str>, end_date: Option<&str>) -> Self {
        DateFilter::Absolute {
            start_date: start_date.map(str::to_string),
            end_date: end_date.map(str::to_string),
            include_time: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    // A Wednesday.
    const NOW: OffsetDateTime = datetime!(2024-03-13 15:30:00 +9);
    const TOKYO: Tz = chrono_tz::Asia::Tokyo;

    #[test]
    fn today_starts_at_local_midnight() {
        let bounds = RelativePeriod::Today.resolve(NOW, TOKYO);
        assert_eq!(bounds.after, Some(datetime!(2024-03-13 00:00:00 +9)));
        assert_eq!(bounds.before, None);
    }

    #[test]
    fn yesterday_is_closed_at_today() {
        let bounds = RelativePeriod::Yesterday.resolve(NOW, TOKYO);
        assert_eq!(bounds.after, Some(datetime!(2024-03-12 00:00:00 +9)));
        assert_eq!(bounds.before, Some(datetime!(2024-03-13 00:00:00 +9)));
    }

    #[test]
    fn weeks_start_on_monday() {
        assert_eq!(
            RelativePeriod::ThisWeek.resolve(NOW, TOKYO).after,
            Some(datetime!(2024-03-11 00:00:00 +9))
        );
        let last = RelativePeriod::LastWeek.resolve(NOW, TOKYO);
        assert_eq!(last.after, Some(datetime!(2024-03-04 00:00:00 +9)));
        assert_eq!(last.before, Some(datetime!(2024-03-11 00:00:00 +9)));
    }

    #[test]
    fn last_month_wraps_year() {
        let now = datetime!(2024-01-20 08:00:00 UTC);
        let bounds = RelativePeriod::LastMonth.resolve(now, Tz::UTC);
        assert_eq!(bounds.after, Some(datetime!(2023-12-01 00:00:00 UTC)));
        assert_eq!(bounds.before, Some(datetime!(2024-01-01 00:00:00 UTC)));
    }

    #[test]
    fn year_periods() {
        assert_eq!(
            RelativePeriod::ThisYear.resolve(NOW, TOKYO).after,
            Some(datetime!(2024-01-01 00:00:00 +9))
        );
        let last = RelativePeriod::LastYear.resolve(NOW, TOKYO);
        assert_eq!(last.after, Some(datetime!(2023-01-01 00:00:00 +9)));
        assert_eq!(last.before, Some(datetime!(2024-01-01 00:00:00 +9)));
    }

    #[test]
    fn now_is_read_on_the_zone_wall_clock() {
        // 23:30 UTC on the 12th is already the 13th in Tokyo.
        let bounds = RelativePeriod::Today.resolve(datetime!(2024-03-12 23:30:00 UTC), TOKYO);
        assert_eq!(bounds.after, Some(datetime!(2024-03-13 00:00:00 +9)));
    }

    #[test]
    fn period_starts_follow_daylight_saving() {
        let berlin = chrono_tz::Europe::Berlin;

        // Afternoon of the spring-forward day: midnight was still winter time.
        let today = RelativePeriod::Today.resolve(datetime!(2024-03-31 15:00:00 +2), berlin);
        assert_eq!(today.after, Some(datetime!(2024-03-31 00:00:00 +1)));

        // The week before the switch starts in winter time, ends in summer time.
        let last_week = RelativePeriod::LastWeek.resolve(datetime!(2024-04-03 12:00:00 +2), berlin);
        assert_eq!(last_week.after, Some(datetime!(2024-03-25 00:00:00 +1)));
        assert_eq!(last_week.before, Some(datetime!(2024-04-01 00:00:00 +2)));
    }

    #[test]
    fn last_n_days_is_exact_instant_without_upper_bound() {
        let bounds = RelativePeriod::Last90Days.resolve(NOW, TOKYO);
        assert_eq!(bounds.after, Some(NOW - Duration::days(90)));
        assert_eq!(bounds.before, None);
    }

    #[test]
    fn bounds_are_exclusive() {
        let bounds = RelativePeriod::Last7Days.resolve(NOW, TOKYO);
        let edge = NOW - Duration::days(7);

        assert!(!bounds.contains(edge));
        assert!(bounds.contains(edge + Duration::seconds(1)));
        assert!(!bounds.contains(edge - Duration::seconds(1)));

        let closed = RelativePeriod::Yesterday.resolve(NOW, TOKYO);
        assert!(!closed.contains(datetime!(2024-03-13 00:00:00 +9)));
        assert!(closed.contains(datetime!(2024-03-12 23:59:59 +9)));
    }

    #[test]
    fn date_filter_wire_format() {
        let relative: DateFilter =
            serde_json::from_value(json!({ "type": "relative", "relative": "last_30_days" }))
                .expect("relative");
        assert_eq!(relative, DateFilter::relative(RelativePeriod::Last30Days));

        let absolute: DateFilter = serde_json::from_value(json!({
            "type": "absolute",
            "startDate": "2024-01-01T00:00:00Z",
            "includeTime": true
        }))
        .expect("absolute");
        assert_eq!(
            absolute,
            DateFilter::Absolute {
                start_date: Some("2024-01-01T00:00:00Z".to_string()),
                end_date: None,
                include_time: true,
            }
        );

        let missing: DateFilter =
            serde_json::from_value(json!({ "type": "relative" })).expect("missing period");
        assert_eq!(missing, DateFilter::Relative { relative: None });
    }
}
