use crate::calc::collation::compare_es;
use crate::calc::snapshot::{
    is_reserved_activity, Activity, DerivedGrade, DerivedKind, Grade, Student,
};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{check_grade_value, check_percentage, db_conn, parse_filters};
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;
use serde_json::json;

const IMPORT_MAX_ROWS: usize = 200_000;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImportPayload {
    students: Vec<Student>,
    activities: Vec<Activity>,
    grades: Vec<Grade>,
}

struct RowErr {
    kind: &'static str,
    index: usize,
    message: String,
}

impl RowErr {
    fn new(kind: &'static str, index: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            index,
            message: message.into(),
        }
    }
}

/// Grade rows split by destination table.
struct ValidatedImport {
    students: Vec<Student>,
    activities: Vec<Activity>,
    grades: Vec<Grade>,
    derived: Vec<DerivedGrade>,
}

fn check_period(period: i64) -> Result<(), String> {
    if !(1..=4).contains(&period) {
        return Err(format!("period must be within 1..=4 (got {})", period));
    }
    Ok(())
}

fn validate(payload: ImportPayload) -> Result<ValidatedImport, RowErr> {
    for (i, s) in payload.students.iter().enumerate() {
        if s.code.trim().is_empty() {
            return Err(RowErr::new("students", i, "code must not be empty"));
        }
    }
    for (i, a) in payload.activities.iter().enumerate() {
        if is_reserved_activity(&a.name) {
            return Err(RowErr::new(
                "activities",
                i,
                format!("'{}' is a reserved activity name", a.name),
            ));
        }
        check_period(a.period).map_err(|m| RowErr::new("activities", i, m))?;
        check_percentage(a.percentage).map_err(|m| RowErr::new("activities", i, m))?;
    }

    let mut grades = Vec::new();
    let mut derived = Vec::new();
    for (i, g) in payload.grades.into_iter().enumerate() {
        check_grade_value(g.grade).map_err(|m| RowErr::new("grades", i, m))?;
        check_percentage(g.percentage).map_err(|m| RowErr::new("grades", i, m))?;
        match DerivedKind::from_activity_name(&g.activity_name) {
            Some(DerivedKind::AnnualFinal) => derived.push(DerivedGrade {
                student_code: g.student_code,
                subject: g.subject,
                grade_level: g.grade_level,
                classroom: g.classroom,
                kind: DerivedKind::AnnualFinal,
                period: 0,
                value: g.grade,
            }),
            Some(DerivedKind::PeriodFinal) => {
                check_period(g.period).map_err(|m| RowErr::new("grades", i, m))?;
                derived.push(DerivedGrade {
                    student_code: g.student_code,
                    subject: g.subject,
                    grade_level: g.grade_level,
                    classroom: g.classroom,
                    kind: DerivedKind::PeriodFinal,
                    period: g.period,
                    value: g.grade,
                });
            }
            None => {
                check_period(g.period).map_err(|m| RowErr::new("grades", i, m))?;
                grades.push(g);
            }
        }
    }

    Ok(ValidatedImport {
        students: payload.students,
        activities: payload.activities,
        grades,
        derived,
    })
}

fn write_import(conn: &rusqlite::Connection, batch: &ValidatedImport) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    for s in &batch.students {
        db::upsert_student(&tx, s)?;
    }
    for a in &batch.activities {
        db::upsert_activity(&tx, a)?;
    }
    for g in &batch.grades {
        db::upsert_grade(&tx, g)?;
    }
    for d in &batch.derived {
        db::insert_derived_row(&tx, d)?;
    }
    tx.commit()?;
    Ok(())
}

fn reload(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let conn = db_conn(state, req)?;
    let snapshot = db::load_snapshot(conn)
        .map_err(|e| err(&req.id, "db_query_failed", format!("{e:?}"), None))?;
    let counts = json!({
        "students": snapshot.students().len(),
        "activities": snapshot.activities().len(),
        "grades": snapshot.grades().len(),
        "derived": snapshot.derived().len()
    });
    tracing::info!(%counts, "snapshot loaded");
    state.snapshot = snapshot;
    state.invalidate();
    Ok(counts)
}

fn handle_records_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let payload: ImportPayload = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    let total = payload.students.len() + payload.activities.len() + payload.grades.len();
    if total > IMPORT_MAX_ROWS {
        return err(
            &req.id,
            "bad_params",
            "import payload is too large",
            Some(json!({ "rows": total, "maxRows": IMPORT_MAX_ROWS })),
        );
    }

    let batch = match validate(payload) {
        Ok(b) => b,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                e.message,
                Some(json!({ "kind": e.kind, "index": e.index })),
            )
        }
    };
    if let Err(e) = write_import(conn, &batch) {
        return err(&req.id, "db_insert_failed", format!("{e:?}"), None);
    }

    let imported = json!({
        "students": batch.students.len(),
        "activities": batch.activities.len(),
        "grades": batch.grades.len(),
        "derived": batch.derived.len()
    });
    match reload(state, req) {
        Ok(counts) => ok(&req.id, json!({ "imported": imported, "snapshot": counts })),
        Err(e) => e,
    }
}

fn handle_snapshot_reload(state: &mut AppState, req: &Request) -> serde_json::Value {
    match reload(state, req) {
        Ok(counts) => ok(&req.id, json!({ "snapshot": counts })),
        Err(e) => e,
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let filters = match parse_filters(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let mut students: Vec<&Student> = state
        .snapshot
        .students()
        .iter()
        .filter(|s| filters.includes_student(s))
        .collect();
    students.sort_by(|a, b| compare_es(&a.full_name(), &b.full_name()));
    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            json!({
                "code": s.code,
                "fullName": s.full_name(),
                "gradeLevel": s.grade_level,
                "classroom": s.classroom
            })
        })
        .collect();
    ok(&req.id, json!({ "students": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.import" => Some(handle_records_import(state, req)),
        "snapshot.reload" => Some(handle_snapshot_reload(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
