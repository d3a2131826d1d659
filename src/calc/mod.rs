pub mod aggregate;
pub mod cache;
pub mod collation;
pub mod completeness;
pub mod period_final;
pub mod risk;
pub mod snapshot;
pub mod weighted;

use serde::Serialize;
use std::fmt;

pub use snapshot::Snapshot;

/// Tunable engine thresholds, persisted under the `analysis` setup section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub risk: risk::RiskThresholds,
    pub completeness_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            risk: risk::RiskThresholds::default(),
            completeness_cap: completeness::DEFAULT_DETAIL_CAP,
        }
    }
}

/// Round-half-up to 2 decimals: `Int(100*x + 0.5) / 100`.
/// Applied once to final ratios, never to intermediate terms.
pub fn round2(x: f64) -> f64 {
    // The nudge absorbs representation error: 2.675 * 100 == 267.49999...
    ((100.0 * x) + 0.5 + ROUND_EPSILON).floor() / 100.0
}

const ROUND_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for CalcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeriodFilter {
    Term(i64),
    #[default]
    Annual,
}

impl PeriodFilter {
    pub fn periods(self) -> Vec<i64> {
        match self {
            PeriodFilter::Term(p) => vec![p],
            PeriodFilter::Annual => snapshot::PERIODS.to_vec(),
        }
    }
}

impl Serialize for PeriodFilter {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            PeriodFilter::Term(p) => s.serialize_i64(*p),
            PeriodFilter::Annual => s.serialize_str("annual"),
        }
    }
}

/// Scope of a query. `None` on any axis means "do not filter on this axis".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeFilters {
    pub period: PeriodFilter,
    pub grade_level: Option<String>,
    pub classroom: Option<String>,
    pub subject: Option<String>,
    pub student_code: Option<String>,
}

impl ScopeFilters {
    pub fn with_period(&self, period: PeriodFilter) -> Self {
        Self {
            period,
            ..self.clone()
        }
    }

    pub fn includes_student(&self, s: &snapshot::Student) -> bool {
        self.grade_level.as_deref().map(|v| v == s.grade_level).unwrap_or(true)
            && self.classroom.as_deref().map(|v| v == s.classroom).unwrap_or(true)
            && self.student_code.as_deref().map(|v| v == s.code).unwrap_or(true)
    }

    pub fn includes_subject(&self, subject: &str) -> bool {
        self.subject.as_deref().map(|v| v == subject).unwrap_or(true)
    }
}

fn parse_optional_axis(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<String>, CalcError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(CalcError::new(
                    "bad_params",
                    format!("filters.{} must be string or null", key),
                ));
            };
            let t = s.trim();
            if t.is_empty() || t.eq_ignore_ascii_case("ALL") {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
    }
}

pub fn parse_period(v: &serde_json::Value) -> Result<PeriodFilter, CalcError> {
    if v.is_null() {
        return Ok(PeriodFilter::Annual);
    }
    if let Some(s) = v.as_str() {
        if s.eq_ignore_ascii_case("annual") {
            return Ok(PeriodFilter::Annual);
        }
    }
    match v.as_i64() {
        Some(p) if (1..=4).contains(&p) => Ok(PeriodFilter::Term(p)),
        _ => Err(CalcError::new(
            "bad_params",
            "period must be an integer 1..4 or 'annual'",
        )
        .with_details(serde_json::json!({ "period": v }))),
    }
}

pub fn parse_scope_filters(raw: Option<&serde_json::Value>) -> Result<ScopeFilters, CalcError> {
    let Some(raw) = raw else {
        return Ok(ScopeFilters::default());
    };
    if raw.is_null() {
        return Ok(ScopeFilters::default());
    }
    let Some(obj) = raw.as_object() else {
        return Err(CalcError::new("bad_params", "filters must be an object"));
    };

    let period = match obj.get("period") {
        None => PeriodFilter::Annual,
        Some(v) => parse_period(v)?,
    };

    Ok(ScopeFilters {
        period,
        grade_level: parse_optional_axis(obj, "gradeLevel")?,
        classroom: parse_optional_axis(obj, "classroom")?,
        subject: parse_optional_axis(obj, "subject")?,
        student_code: parse_optional_axis(obj, "studentCode")?,
    })
}
