//! Date-window and cohort retention math, kept free of I/O so handlers only
//! load rows and hand them here.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::types::{CohortRow, DayCount};

/// Day offsets after signup at which retention is measured.
pub const RETENTION_DAYS: [i64; 4] = [0, 1, 7, 30];

pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// `now - (days - 1)` days, same time of day.
pub fn window_start(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - Duration::days(days - 1)
}

/// Midnight UTC of the given instant's calendar day.
pub fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&at.date_naive().and_time(NaiveTime::MIN))
}

/// First instant of the month `months - 1` months before the current one.
pub fn month_window_start(now: DateTime<Utc>, months: i64) -> DateTime<Utc> {
    let back = u32::try_from(months.saturating_sub(1)).unwrap_or(0);
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|d| d.checked_sub_months(Months::new(back)))
        .unwrap_or(NaiveDate::MIN);
    Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN))
}

/// Every calendar day from `start` to `end` inclusive, as `YYYY-MM-DD`.
pub fn days_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<String> {
    start
        .date_naive()
        .iter_days()
        .take_while(|d| *d <= end.date_naive())
        .map(|d| d.format(DAY_FORMAT).to_string())
        .collect()
}

/// Zero-fill `counts` so that every day of the window is present, in order.
pub fn fill_days(days: &[String], counts: &HashMap<String, i64>) -> Vec<DayCount> {
    days.iter()
        .map(|day| DayCount {
            day: day.clone(),
            count: counts.get(day).copied().unwrap_or(0),
        })
        .collect()
}

/// Mean over days with activity; zero when there were none.
pub fn average_active(daily: &[i64]) -> f64 {
    let total: i64 = daily.iter().sum();
    total as f64 / daily.len().max(1) as f64
}

pub fn stickiness(avg_dau: f64, mau: i64) -> f64 {
    if mau == 0 {
        0.0
    } else {
        avg_dau / mau as f64
    }
}

/// Percentage rounded to two decimals; an empty cohort yields 0.
pub fn retention_pct(returned: usize, size: usize) -> f64 {
    if size == 0 {
        return 0.0;
    }
    (returned as f64 / size as f64 * 10_000.0).round() / 100.0
}

/// Build cohort rows from signup days and per-user activity days.
///
/// `members` holds `(user_id, signup_day)`; `activity` maps a user to the set
/// of UTC days on which they had at least one event. Rows come back in
/// ascending cohort order.
pub fn build_cohorts(
    members: &[(String, NaiveDate)],
    activity: &HashMap<String, HashSet<NaiveDate>>,
) -> Vec<CohortRow> {
    let mut cohorts: BTreeMap<NaiveDate, Vec<&str>> = BTreeMap::new();
    for (user_id, day) in members {
        cohorts.entry(*day).or_default().push(user_id.as_str());
    }

    cohorts
        .into_iter()
        .map(|(day, users)| {
            let returned_on = |offset: i64| {
                let target = day + Duration::days(offset);
                let returned = users
                    .iter()
                    .filter(|u| activity.get(**u).is_some_and(|days| days.contains(&target)))
                    .count();
                retention_pct(returned, users.len())
            };
            CohortRow {
                cohort_day: day.format(DAY_FORMAT).to_string(),
                size: users.len(),
                day_0: returned_on(RETENTION_DAYS[0]),
                day_1: returned_on(RETENTION_DAYS[1]),
                day_7: returned_on(RETENTION_DAYS[2]),
                day_30: returned_on(RETENTION_DAYS[3]),
            }
        })
        .collect()
}
