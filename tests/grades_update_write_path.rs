use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar(workspace: Option<&Path>) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut cmd = Command::new(exe);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("GRADEBOOKD_WORKSPACE");
    if let Some(ws) = workspace {
        cmd.env("GRADEBOOKD_WORKSPACE", ws);
    }
    let mut child = cmd.spawn().expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn db_path(workspace: &Path) -> PathBuf {
    workspace.join("gradebook.sqlite3")
}

fn derived_rows(workspace: &Path, student: &str) -> Vec<(String, i64, f64)> {
    let conn = rusqlite::Connection::open(db_path(workspace)).expect("open db");
    let mut stmt = conn
        .prepare(
            "SELECT kind, period, value FROM derived_grades
             WHERE student_code = ? ORDER BY kind, period",
        )
        .expect("prepare");
    let rows = stmt
        .query_map([student], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .expect("query");
    rows.collect::<Result<Vec<_>, _>>().expect("rows")
}

fn grade_row(code: &str, period: i64, activity: &str, grade: f64) -> serde_json::Value {
    json!({
        "studentCode": code,
        "subject": "Math",
        "gradeLevel": "10",
        "classroom": "A",
        "period": period,
        "activityName": activity,
        "percentage": null,
        "grade": grade
    })
}

fn school_payload() -> serde_json::Value {
    let activity = |period: i64, name: &str, pct: f64| {
        json!({
            "subject": "Math",
            "gradeLevel": "10",
            "classroom": "A",
            "period": period,
            "name": name,
            "percentage": pct
        })
    };
    json!({
        "students": [
            { "code": "S1", "firstName": "Ana", "lastName": "Rojas", "gradeLevel": "10", "classroom": "A" },
            { "code": "S2", "firstName": "Beto", "lastName": "Núñez", "gradeLevel": "10", "classroom": "A" },
            { "code": "S3", "firstName": "Dani", "lastName": "Zea", "gradeLevel": "10", "classroom": "A" }
        ],
        "activities": [
            activity(1, "T1", 30.0),
            activity(1, "T2", 30.0),
            activity(1, "Exam", 40.0),
            activity(2, "Quiz", 20.0)
        ],
        "grades": [
            grade_row("S1", 1, "T1", 4.0),
            grade_row("S1", 1, "T2", 4.0),
            grade_row("S1", 1, "Exam", 5.0),
            grade_row("S2", 1, "T1", 2.0),
            grade_row("S2", 1, "T2", 3.0),
            grade_row("S2", 1, "Exam", 2.0)
        ]
    })
}

#[test]
fn grade_update_persists_period_and_annual_finals() {
    let workspace = temp_dir("gradebook-grades-update");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(None);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "records.import", school_payload());

    // A lone 20% activity contributes its raw share, not an extrapolated 4.0.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.update",
        json!({
            "studentCode": "S1",
            "subject": "Math",
            "period": 2,
            "activityName": "Quiz",
            "grade": 4.0
        }),
    );
    assert_eq!(updated["periodFinal"].as_f64(), Some(0.8));
    // (4.4 + 0.8 + 0 + 0) / 4
    assert_eq!(updated["annualFinal"].as_f64(), Some(1.3));

    let rows = derived_rows(&workspace, "S1");
    assert_eq!(
        rows,
        vec![
            ("annual_final".to_string(), 0, 1.3),
            ("period_final".to_string(), 2, 0.8),
        ]
    );

    let relative = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "stats.ranking",
        json!({ "filters": { "period": 2 } }),
    );
    assert_eq!(relative["students"][0]["average"].as_f64(), Some(4.0));

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "calc.periodFinal",
        json!({ "studentCode": "S1", "subject": "Math", "period": 2 }),
    );
    assert_eq!(detail["periodFinal"].as_f64(), Some(0.8));
    assert_eq!(detail["coveredPercentage"].as_f64(), Some(20.0));
    assert_eq!(detail["gradedCount"].as_u64(), Some(1));
    assert_eq!(detail["stored"].as_f64(), Some(0.8));

    let _ = child.kill();
}

#[test]
fn grade_update_rejects_reserved_and_out_of_range_input() {
    let workspace = temp_dir("gradebook-grades-reject");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(None);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "records.import", school_payload());

    let cases = [
        (
            json!({ "studentCode": "S1", "subject": "Math", "period": 1,
                    "activityName": "Final Periodo", "grade": 4.0 }),
            "bad_params",
        ),
        (
            json!({ "studentCode": "S1", "subject": "Math", "period": 1,
                    "activityName": "T1", "grade": 5.5 }),
            "bad_params",
        ),
        (
            json!({ "studentCode": "S1", "subject": "Math", "period": 5,
                    "activityName": "T1", "grade": 4.0 }),
            "bad_params",
        ),
        (
            json!({ "studentCode": "S9", "subject": "Math", "period": 1,
                    "activityName": "T1", "grade": 4.0 }),
            "not_found",
        ),
    ];
    for (i, (params, code)) in cases.into_iter().enumerate() {
        let id = format!("c{}", i);
        let resp = request(&mut stdin, &mut reader, &id, "grades.update", params);
        assert_eq!(
            resp.pointer("/error/code").and_then(|v| v.as_str()),
            Some(code),
            "case {}: {}",
            i,
            resp
        );
    }
    assert!(derived_rows(&workspace, "S1").is_empty());

    let _ = child.kill();
}

#[test]
fn finals_recompute_writes_and_clears_then_survives_restart() {
    let workspace = temp_dir("gradebook-finals-recompute");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(None);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "records.import", school_payload());
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.update",
        json!({ "studentCode": "S1", "subject": "Math", "period": 2,
                "activityName": "Quiz", "grade": 4.0 }),
    );

    let summary = request_ok(&mut stdin, &mut reader, "4", "finals.recompute", json!({}));
    assert_eq!(summary["students"].as_u64(), Some(3));
    // S1: p1, p2, annual. S2: p1, annual. S3: nothing graded.
    assert_eq!(summary["written"].as_u64(), Some(5));
    assert_eq!(summary["cleared"].as_u64(), Some(10));
    assert_eq!(
        derived_rows(&workspace, "S2"),
        vec![
            ("annual_final".to_string(), 0, 0.58),
            ("period_final".to_string(), 1, 2.3),
        ]
    );
    let _ = child.kill();

    // Reopen through the environment instead of workspace.select.
    let (mut child, mut stdin, mut reader) = spawn_sidecar(Some(&workspace));
    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["workspacePath"].is_string());
    let reloaded = request_ok(&mut stdin, &mut reader, "2", "snapshot.reload", json!({}));
    assert_eq!(reloaded["snapshot"]["derived"].as_u64(), Some(5));
    assert_eq!(reloaded["snapshot"]["grades"].as_u64(), Some(7));

    let annual = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "calc.annualFinal",
        json!({ "studentCode": "S1", "subject": "Math" }),
    );
    assert_eq!(annual["annualFinal"].as_f64(), Some(1.3));
    assert_eq!(annual["periods"], json!([4.4, 0.8, null, null]));
    assert_eq!(annual["stored"].as_f64(), Some(1.3));

    let _ = child.kill();
}

#[test]
fn imported_reserved_rows_land_in_derived_table() {
    let workspace = temp_dir("gradebook-import-derived");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(None);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let mut payload = school_payload();
    if let Some(grades) = payload["grades"].as_array_mut() {
        grades.push(grade_row("S1", 1, "Final Periodo", 4.4));
        grades.push(grade_row("S1", 0, "Final Definitiva", 1.1));
    }
    let imported = request_ok(&mut stdin, &mut reader, "2", "records.import", payload);
    assert_eq!(imported["imported"]["grades"].as_u64(), Some(6));
    assert_eq!(imported["imported"]["derived"].as_u64(), Some(2));

    // Derived rows never feed the relative averages.
    let ranking = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "stats.ranking",
        json!({ "filters": { "period": 1, "studentCode": "S1" } }),
    );
    assert_eq!(ranking["students"][0]["countWeighted"].as_u64(), Some(3));
    assert_eq!(ranking["students"][0]["average"].as_f64(), Some(4.4));

    let relative = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "calc.relativeAverage",
        json!({ "activities": [ { "grade": 4.0, "percentage": 20 } ] }),
    );
    assert_eq!(relative["average"].as_f64(), Some(4.0));
    assert_eq!(relative["totalPercentage"].as_f64(), Some(20.0));

    let _ = child.kill();
}

#[test]
fn mark_only_update_keeps_stored_comment() {
    let workspace = temp_dir("gradebook-grades-comment");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(None);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let mut payload = school_payload();
    payload["grades"][0]["comment"] = json!("needs practice");
    let _ = request_ok(&mut stdin, &mut reader, "2", "records.import", payload);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.update",
        json!({ "studentCode": "S1", "subject": "Math", "period": 1,
                "activityName": "T1", "grade": 3.5 }),
    );
    let stored_comment = || -> (f64, Option<String>) {
        let conn = rusqlite::Connection::open(db_path(&workspace)).expect("open db");
        conn.query_row(
            "SELECT grade, comment FROM grades
             WHERE student_code = 'S1' AND subject = 'Math' AND period = 1 AND activity_name = 'T1'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("grade row")
    };
    assert_eq!(stored_comment(), (3.5, Some("needs practice".to_string())));

    // An explicit comment still replaces the old one.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.update",
        json!({ "studentCode": "S1", "subject": "Math", "period": 1,
                "activityName": "T1", "grade": 4.0, "comment": "improving" }),
    );
    assert_eq!(stored_comment(), (4.0, Some("improving".to_string())));

    let _ = child.kill();
}
