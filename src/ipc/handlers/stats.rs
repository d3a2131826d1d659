use crate::calc::aggregate::{
    distribution, evolution_with, group_averages, overview, scope_average, subject_average,
    students_in_scope, subject_averages, GroupLevel, Reading, StudentAverage,
};
use crate::calc::completeness::check_completeness;
use crate::calc::risk::has_sufficient_data_for_risk_view;
use crate::calc::{PeriodFilter, ScopeFilters};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{parse_filters, required_str};
use crate::ipc::types::{AppState, Request};
use serde::Serialize;
use serde_json::json;
use std::rc::Rc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RankedStudent<'a> {
    position: usize,
    #[serde(flatten)]
    row: &'a StudentAverage,
}

fn rows_for(state: &mut AppState, filters: &ScopeFilters) -> Rc<Vec<StudentAverage>> {
    state
        .cache
        .student_averages(&state.snapshot, filters, &state.config.risk)
}

fn handle_ranking(state: &mut AppState, req: &Request) -> serde_json::Value {
    let filters = match parse_filters(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let limit = match req.params.get("limit") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_u64() {
            Some(n) if n > 0 => Some(n as usize),
            _ => return err(&req.id, "bad_params", "limit must be a positive integer", None),
        },
    };
    let rows = rows_for(state, &filters);
    let ranked: Vec<RankedStudent<'_>> = rows
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(i, row)| RankedStudent {
            position: i + 1,
            row,
        })
        .collect();
    ok(
        &req.id,
        json!({
            "filters": filters,
            "total": rows.len(),
            "students": ranked
        }),
    )
}

fn handle_scope_average(state: &mut AppState, req: &Request) -> serde_json::Value {
    let filters = match parse_filters(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let rows = rows_for(state, &filters);
    let in_scope = students_in_scope(&state.snapshot, &filters).len();
    ok(
        &req.id,
        json!({
            "filters": filters,
            "average": Reading::from_option(scope_average(&rows)),
            "includedStudents": rows.len(),
            "excludedStudents": in_scope.saturating_sub(rows.len())
        }),
    )
}

fn handle_group_averages(state: &mut AppState, req: &Request) -> serde_json::Value {
    let filters = match parse_filters(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let level_raw = req
        .params
        .get("level")
        .and_then(|v| v.as_str())
        .unwrap_or("classroom");
    let Some(level) = GroupLevel::parse(level_raw) else {
        return err(
            &req.id,
            "bad_params",
            "level must be one of: classroom, gradeLevel",
            None,
        );
    };
    let rows = rows_for(state, &filters);
    ok(
        &req.id,
        json!({
            "filters": filters,
            "level": level_raw,
            "groups": group_averages(&rows, level)
        }),
    )
}

fn handle_subject_average(state: &mut AppState, req: &Request) -> serde_json::Value {
    let filters = match parse_filters(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    ok(
        &req.id,
        json!(subject_average(&state.snapshot, &filters, &subject)),
    )
}

fn handle_subject_averages(state: &mut AppState, req: &Request) -> serde_json::Value {
    let filters = match parse_filters(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    ok(
        &req.id,
        json!({
            "filters": filters,
            "subjects": subject_averages(&state.snapshot, &filters)
        }),
    )
}

fn handle_distribution(state: &mut AppState, req: &Request) -> serde_json::Value {
    let filters = match parse_filters(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let rows = rows_for(state, &filters);
    ok(
        &req.id,
        json!({
            "filters": filters,
            "distribution": distribution(rows.iter().map(|r| &r.average))
        }),
    )
}

fn handle_evolution(state: &mut AppState, req: &Request) -> serde_json::Value {
    let filters = match parse_filters(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let points = evolution_with(|p| {
        let rows = rows_for(state, &filters.with_period(PeriodFilter::Term(p)));
        scope_average(&rows)
    });
    ok(&req.id, json!({ "filters": filters, "points": points }))
}

fn handle_at_risk(state: &mut AppState, req: &Request) -> serde_json::Value {
    let filters = match parse_filters(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let rows = rows_for(state, &filters);
    let flagged: Vec<&StudentAverage> = rows.iter().filter(|r| r.at_risk).collect();
    ok(
        &req.id,
        json!({
            "filters": filters,
            "thresholds": state.config.risk,
            "hasSufficientData": has_sufficient_data_for_risk_view(rows.iter(), &state.config.risk),
            "students": flagged
        }),
    )
}

fn handle_completeness(state: &mut AppState, req: &Request) -> serde_json::Value {
    let filters = match parse_filters(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let report = check_completeness(&state.snapshot, &filters, state.config.completeness_cap);
    if report.truncated {
        tracing::debug!(cap = report.cap, "completeness scan truncated");
    }
    ok(&req.id, json!(report))
}

fn handle_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let filters = match parse_filters(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let rows = rows_for(state, &filters);
    let o = overview(&state.snapshot, &filters, &rows, &state.config.risk);
    ok(&req.id, json!({ "filters": filters, "overview": o }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.ranking" => Some(handle_ranking(state, req)),
        "stats.scopeAverage" => Some(handle_scope_average(state, req)),
        "stats.groupAverages" => Some(handle_group_averages(state, req)),
        "stats.subjectAverage" => Some(handle_subject_average(state, req)),
        "stats.subjectAverages" => Some(handle_subject_averages(state, req)),
        "stats.distribution" => Some(handle_distribution(state, req)),
        "stats.evolution" => Some(handle_evolution(state, req)),
        "stats.atRisk" => Some(handle_at_risk(state, req)),
        "stats.completeness" => Some(handle_completeness(state, req)),
        "stats.overview" => Some(handle_overview(state, req)),
        _ => None,
    }
}
