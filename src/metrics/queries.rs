//! SQL for the metrics endpoints. Timestamps are unix milliseconds; days are
//! UTC calendar days rendered as `YYYY-MM-DD`.

/// Distinct users per day.
/// Parameters: ?1 = start_ms, ?2 = end_ms (both inclusive)
pub const DAILY_ACTIVE_SQL: &str = r#"
SELECT
    strftime('%Y-%m-%d', created_at / 1000, 'unixepoch') AS day,
    COUNT(DISTINCT user_id) AS users
FROM usage_events
WHERE user_id IS NOT NULL
    AND created_at >= ?1
    AND created_at <= ?2
GROUP BY day
ORDER BY day
"#;

/// Distinct users over the whole window.
/// Parameters: ?1 = start_ms, ?2 = end_ms (both inclusive)
pub const ACTIVE_USERS_SQL: &str = r#"
SELECT COUNT(DISTINCT user_id)
FROM usage_events
WHERE user_id IS NOT NULL
    AND created_at >= ?1
    AND created_at <= ?2
"#;

/// Per event type: summed value and event count, largest total first.
pub const FEATURE_USAGE_SQL: &str = r#"
SELECT
    event_type,
    SUM(value) AS total,
    COUNT(*) AS events
FROM usage_events
GROUP BY event_type
ORDER BY total DESC, event_type
"#;

/// Users who signed up inside the cohort window, with their signup day.
/// Parameters: ?1 = start_ms, ?2 = end_ms (both inclusive)
pub const COHORT_MEMBERS_SQL: &str = r#"
SELECT
    id,
    strftime('%Y-%m-%d', created_at / 1000, 'unixepoch') AS cohort_day
FROM users
WHERE created_at >= ?1
    AND created_at <= ?2
"#;

/// Distinct (user, day) activity pairs for cohort members.
/// Parameters: ?1 = signup start_ms, ?2 = signup end_ms,
///             ?3 = activity from_ms (inclusive), ?4 = activity to_ms (exclusive)
pub const COHORT_ACTIVITY_SQL: &str = r#"
SELECT DISTINCT
    e.user_id,
    strftime('%Y-%m-%d', e.created_at / 1000, 'unixepoch') AS day
FROM usage_events e
JOIN users u ON u.id = e.user_id
WHERE u.created_at >= ?1
    AND u.created_at <= ?2
    AND e.created_at >= ?3
    AND e.created_at < ?4
"#;
