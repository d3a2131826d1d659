use crate::calc::{self, ScopeFilters};
use crate::ipc::error::{calc_err, err};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing/invalid {}", key), None))
}

pub fn required_period(req: &Request) -> Result<i64, serde_json::Value> {
    match req.params.get("period").and_then(|v| v.as_i64()) {
        Some(p) if (1..=4).contains(&p) => Ok(p),
        _ => Err(err(
            &req.id,
            "bad_params",
            "period must be an integer 1..4",
            None,
        )),
    }
}

pub fn parse_filters(req: &Request) -> Result<ScopeFilters, serde_json::Value> {
    calc::parse_scope_filters(req.params.get("filters")).map_err(|e| calc_err(&req.id, e))
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Grades live on a 0..5 scale with two decimals.
pub fn check_grade_value(v: f64) -> Result<(), String> {
    if !v.is_finite() || !(0.0..=5.0).contains(&v) {
        return Err(format!("grade must be within 0..=5 (got {})", v));
    }
    Ok(())
}

pub fn check_percentage(v: Option<f64>) -> Result<(), String> {
    match v {
        Some(p) if !p.is_finite() || !(0.0..=100.0).contains(&p) => {
            Err(format!("percentage must be within 0..=100 (got {})", p))
        }
        _ => Ok(()),
    }
}
