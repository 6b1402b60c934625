use serde::{Deserialize, Serialize};

pub const DEFAULT_DAU_DAYS: i64 = 14;
pub const DEFAULT_COHORT_DAYS: i64 = 30;
pub const MAX_WINDOW_DAYS: i64 = 365;
pub const DEFAULT_MAU_MONTHS: i64 = 1;
pub const MAX_MAU_MONTHS: i64 = 24;
pub const STICKINESS_WINDOW_DAYS: i64 = 30;

/// Query parameters shared by the metrics endpoints. Values are read the
/// way dashboards send them: a leading integer, anything else ignored.
#[derive(Debug, Default, Deserialize)]
pub struct MetricsQueryParams {
    pub days: Option<String>,
    pub months: Option<String>,
}

impl MetricsQueryParams {
    pub fn dau_days(&self) -> i64 {
        window(self.days.as_deref(), DEFAULT_DAU_DAYS, MAX_WINDOW_DAYS)
    }

    pub fn cohort_days(&self) -> i64 {
        window(self.days.as_deref(), DEFAULT_COHORT_DAYS, MAX_WINDOW_DAYS)
    }

    pub fn months(&self) -> i64 {
        window(self.months.as_deref(), DEFAULT_MAU_MONTHS, MAX_MAU_MONTHS)
    }
}

/// Missing, unparsable or non-positive values fall back to `default`.
fn window(raw: Option<&str>, default: i64, max: i64) -> i64 {
    match raw.and_then(leading_int) {
        Some(n) if n > 0 => n.min(max),
        _ => default,
    }
}

/// Parse an optional sign followed by digits, ignoring any trailing text.
/// Digit runs beyond the `i64` range saturate.
fn leading_int(raw: &str) -> Option<i64> {
    let raw = raw.trim_start();
    let (negative, digits) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let digits = &digits[..end];
    if digits.is_empty() {
        return None;
    }
    // Only overflow can fail once the run is all ASCII digits
    let value = digits.parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -value } else { value })
}

// ── DAU ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayCount {
    pub day: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct DauResponse {
    pub data: Vec<DayCount>,
}

// ── MAU / stickiness ──

#[derive(Debug, Serialize)]
pub struct MauResponse {
    pub mau: i64,
}

#[derive(Debug, Serialize)]
pub struct StickinessResponse {
    #[serde(rename = "avgDAU")]
    pub avg_dau: f64,
    pub mau: i64,
    pub stickiness: f64,
}

// ── Feature usage ──

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureUsage {
    pub event_type: String,
    pub total: f64,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct FeatureUsageResponse {
    pub features: Vec<FeatureUsage>,
}

// ── Cohorts ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortRow {
    #[serde(rename = "cohortDay")]
    pub cohort_day: String,
    pub size: usize,
    pub day_0: f64,
    pub day_1: f64,
    pub day_7: f64,
    pub day_30: f64,
}

#[derive(Debug, Serialize)]
pub struct CohortResponse {
    pub cohorts: Vec<CohortRow>,
    #[serde(rename = "retentionDays")]
    pub retention_days: Vec<i64>,
}
