use crate::calc::period_final::{annual_final, period_final, period_final_detail, period_finals};
use crate::calc::snapshot::{is_reserved_activity, DerivedKind, Grade, Snapshot, Student};
use crate::calc::weighted::{relative_average, WeightedItem};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    check_grade_value, check_percentage, db_conn, parse_filters, required_f64, required_period,
    required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const RELATIVE_AVERAGE_MAX_ITEMS: usize = 10_000;

/// Recomputes the period final and the annual final of one student/subject
/// from the snapshot and persists both derived rows (a `None` clears one).
fn refresh_finals(
    conn: &Connection,
    snapshot: &mut Snapshot,
    student: &Student,
    subject: &str,
    periods: &[i64],
) -> anyhow::Result<(Vec<(i64, Option<f64>)>, Option<f64>)> {
    let mut written = Vec::with_capacity(periods.len());
    for &p in periods {
        let value = period_final(snapshot, &student.code, subject, p);
        db::upsert_derived(conn, student, subject, DerivedKind::PeriodFinal, p, value)?;
        snapshot.set_derived(student, subject, DerivedKind::PeriodFinal, p, value);
        written.push((p, value));
    }
    let annual = annual_final(snapshot, &student.code, subject);
    db::upsert_derived(conn, student, subject, DerivedKind::AnnualFinal, 0, annual)?;
    snapshot.set_derived(student, subject, DerivedKind::AnnualFinal, 0, annual);
    Ok((written, annual))
}

/// Reloads the snapshot after a failed write, since the in-memory copy may be
/// ahead of the store.
fn resync_snapshot(state: &mut AppState) {
    if let Some(conn) = state.db.as_ref() {
        match db::load_snapshot(conn) {
            Ok(snapshot) => state.snapshot = snapshot,
            Err(e) => tracing::error!("failed to reload snapshot: {e:#}"),
        }
    }
    state.invalidate();
}

fn handle_grades_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = db_conn(state, req) {
        return e;
    }
    let student_code = match required_str(req, "studentCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let activity_name = match required_str(req, "activityName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = match required_period(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let value = match required_f64(req, "grade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if is_reserved_activity(&activity_name) {
        return err(
            &req.id,
            "bad_params",
            format!("'{}' is derived and cannot be edited", activity_name),
            None,
        );
    }
    if let Err(msg) = check_grade_value(value) {
        return err(&req.id, "bad_params", msg, Some(json!({ "grade": value })));
    }
    let comment_param = req
        .params
        .get("comment")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let Some(student) = state.snapshot.student(&student_code).cloned() else {
        return err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "studentCode": student_code })),
        );
    };

    let percentage = state
        .snapshot
        .activities_for(&subject, &student.grade_level, &student.classroom, period)
        .find(|a| a.name == activity_name)
        .and_then(|a| a.percentage)
        .or_else(|| req.params.get("percentage").and_then(|v| v.as_f64()));
    if let Err(msg) = check_percentage(percentage) {
        return err(&req.id, "bad_params", msg, None);
    }
    // A mark-only edit keeps the stored comment.
    let comment = comment_param.or_else(|| {
        state
            .snapshot
            .grade_for(&student.code, &subject, period, &activity_name)
            .and_then(|g| g.comment.clone())
    });

    let grade = Grade {
        student_code: student.code.clone(),
        subject: subject.clone(),
        grade_level: student.grade_level.clone(),
        classroom: student.classroom.clone(),
        period,
        activity_name,
        percentage,
        grade: value,
        comment,
        notified: false,
    };

    // Persist the mark, patch the snapshot, then recompute and persist finals.
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = db::upsert_grade(conn, &grade) {
        return err(&req.id, "db_insert_failed", e.to_string(), Some(json!({ "table": "grades" })));
    }
    state.snapshot.apply_grade(grade);
    let refreshed = refresh_finals(conn, &mut state.snapshot, &student, &subject, &[period]);
    state.invalidate();
    let (periods, annual) = match refreshed {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "derived_grades" })),
            )
        }
    };
    let period_value = periods.first().and_then(|(_, v)| *v);
    tracing::info!(
        student = %student.code,
        subject = %subject,
        period,
        period_final = ?period_value,
        annual_final = ?annual,
        "grade updated"
    );

    ok(
        &req.id,
        json!({
            "periodFinal": period_value,
            "annualFinal": annual
        }),
    )
}

fn handle_finals_recompute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let filters = match parse_filters(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    if let Err(e) = db_conn(state, req) {
        return e;
    }
    let targets: Vec<(Student, Vec<String>)> = state
        .snapshot
        .students()
        .iter()
        .filter(|s| filters.includes_student(s))
        .map(|s| {
            let subjects = state
                .snapshot
                .subjects_for_student(s)
                .into_iter()
                .filter(|sub| filters.includes_subject(sub))
                .collect();
            (s.clone(), subjects)
        })
        .collect();
    let periods = filters.period.periods();

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };
    let mut written = 0_usize;
    let mut cleared = 0_usize;
    for (student, subjects) in &targets {
        for subject in subjects {
            match refresh_finals(&tx, &mut state.snapshot, student, subject, &periods) {
                Ok((values, annual)) => {
                    for v in values.iter().map(|(_, v)| v).chain(std::iter::once(&annual)) {
                        if v.is_some() {
                            written += 1;
                        } else {
                            cleared += 1;
                        }
                    }
                }
                Err(e) => {
                    drop(tx);
                    resync_snapshot(state);
                    return err(&req.id, "db_insert_failed", e.to_string(), None);
                }
            }
        }
    }
    if let Err(e) = tx.commit() {
        resync_snapshot(state);
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    state.invalidate();
    tracing::info!(written, cleared, students = targets.len(), "finals recomputed");

    ok(
        &req.id,
        json!({
            "students": targets.len(),
            "written": written,
            "cleared": cleared
        }),
    )
}

fn handle_calc_relative_average(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw) = req.params.get("activities").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing activities[]", None);
    };
    if raw.len() > RELATIVE_AVERAGE_MAX_ITEMS {
        return err(
            &req.id,
            "bad_params",
            "too many activities",
            Some(json!({ "count": raw.len(), "max": RELATIVE_AVERAGE_MAX_ITEMS })),
        );
    }
    let mut items: Vec<WeightedItem> = Vec::with_capacity(raw.len());
    for (i, v) in raw.iter().enumerate() {
        match serde_json::from_value::<WeightedItem>(v.clone()) {
            Ok(item) => items.push(item),
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("activity at index {}: {}", i, e),
                    None,
                )
            }
        }
    }
    ok(&req.id, json!(relative_average(items)))
}

fn handle_calc_period_final(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_code = match required_str(req, "studentCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = match required_period(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let detail = period_final_detail(&state.snapshot, &student_code, &subject, period);
    let stored = state
        .snapshot
        .derived_value(&student_code, &subject, DerivedKind::PeriodFinal, period);
    ok(
        &req.id,
        json!({
            "periodFinal": detail.map(|d| d.value),
            "coveredPercentage": detail.map(|d| d.covered_percentage).unwrap_or(0.0),
            "gradedCount": detail.map(|d| d.graded_count).unwrap_or(0),
            "stored": stored
        }),
    )
}

fn handle_calc_annual_final(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_code = match required_str(req, "studentCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let periods = period_finals(&state.snapshot, &student_code, &subject);
    // Last persisted value, which may lag behind raw grades until finals.recompute.
    let stored = state
        .snapshot
        .derived_value(&student_code, &subject, DerivedKind::AnnualFinal, 0);
    ok(
        &req.id,
        json!({
            "annualFinal": annual_final(&state.snapshot, &student_code, &subject),
            "periods": periods,
            "stored": stored
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.update" => Some(handle_grades_update(state, req)),
        "finals.recompute" => Some(handle_finals_recompute(state, req)),
        "calc.relativeAverage" => Some(handle_calc_relative_average(state, req)),
        "calc.periodFinal" => Some(handle_calc_period_final(state, req)),
        "calc.annualFinal" => Some(handle_calc_annual_final(state, req)),
        _ => None,
    }
}
