use crate::calc::snapshot::{Activity, DerivedGrade, DerivedKind, Grade, Snapshot, Student};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE: &str = "gradebook.sqlite3";

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            code TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            grade_level TEXT NOT NULL,
            classroom TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_scope ON students(grade_level, classroom)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            grade_level TEXT NOT NULL,
            classroom TEXT NOT NULL,
            period INTEGER NOT NULL,
            name TEXT NOT NULL,
            percentage REAL,
            updated_at TEXT,
            UNIQUE(subject, grade_level, classroom, period, name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_code TEXT NOT NULL,
            subject TEXT NOT NULL,
            grade_level TEXT NOT NULL,
            classroom TEXT NOT NULL,
            period INTEGER NOT NULL,
            activity_name TEXT NOT NULL,
            percentage REAL,
            grade REAL NOT NULL,
            comment TEXT,
            notified INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            UNIQUE(student_code, subject, period, activity_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_code)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_subject_period ON grades(subject, period)",
        [],
    )?;

    // "Final Periodo" / "Final Definitiva" live here, never in grades.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS derived_grades(
            student_code TEXT NOT NULL,
            subject TEXT NOT NULL,
            grade_level TEXT NOT NULL,
            classroom TEXT NOT NULL,
            kind TEXT NOT NULL,
            period INTEGER NOT NULL,
            value REAL NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(student_code, subject, kind, period)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        None => Ok(None),
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("malformed setting {}", key))?,
        )),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn upsert_student(conn: &Connection, s: &Student) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO students(code, first_name, last_name, grade_level, classroom, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(code) DO UPDATE SET
           first_name = excluded.first_name,
           last_name = excluded.last_name,
           grade_level = excluded.grade_level,
           classroom = excluded.classroom,
           updated_at = excluded.updated_at",
        (
            &s.code,
            &s.first_name,
            &s.last_name,
            &s.grade_level,
            &s.classroom,
            now_rfc3339(),
        ),
    )?;
    Ok(())
}

pub fn upsert_activity(conn: &Connection, a: &Activity) -> anyhow::Result<()> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO activities(id, subject, grade_level, classroom, period, name, percentage, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(subject, grade_level, classroom, period, name) DO UPDATE SET
           percentage = excluded.percentage,
           updated_at = excluded.updated_at",
        (
            &id,
            &a.subject,
            &a.grade_level,
            &a.classroom,
            a.period,
            &a.name,
            a.percentage,
            now_rfc3339(),
        ),
    )?;
    Ok(())
}

pub fn upsert_grade(conn: &Connection, g: &Grade) -> anyhow::Result<()> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grades(
           id, student_code, subject, grade_level, classroom, period, activity_name,
           percentage, grade, comment, notified, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_code, subject, period, activity_name) DO UPDATE SET
           grade_level = excluded.grade_level,
           classroom = excluded.classroom,
           percentage = excluded.percentage,
           grade = excluded.grade,
           comment = excluded.comment,
           notified = excluded.notified,
           updated_at = excluded.updated_at",
        rusqlite::params![
            id,
            g.student_code,
            g.subject,
            g.grade_level,
            g.classroom,
            g.period,
            g.activity_name,
            g.percentage,
            g.grade,
            g.comment,
            g.notified as i64,
            now_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Writes one derived row; `None` removes it.
pub fn upsert_derived(
    conn: &Connection,
    student: &Student,
    subject: &str,
    kind: DerivedKind,
    period: i64,
    value: Option<f64>,
) -> anyhow::Result<()> {
    match value {
        Some(v) => {
            conn.execute(
                "INSERT INTO derived_grades(
                   student_code, subject, grade_level, classroom, kind, period, value, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(student_code, subject, kind, period) DO UPDATE SET
                   grade_level = excluded.grade_level,
                   classroom = excluded.classroom,
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                rusqlite::params![
                    student.code,
                    subject,
                    student.grade_level,
                    student.classroom,
                    kind.as_str(),
                    period,
                    v,
                    now_rfc3339(),
                ],
            )?;
        }
        None => {
            conn.execute(
                "DELETE FROM derived_grades
                 WHERE student_code = ? AND subject = ? AND kind = ? AND period = ?",
                (&student.code, subject, kind.as_str(), period),
            )?;
        }
    }
    Ok(())
}

/// Stores an imported reserved grade row as a derived row, value unchanged.
pub fn insert_derived_row(conn: &Connection, d: &DerivedGrade) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO derived_grades(
           student_code, subject, grade_level, classroom, kind, period, value, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_code, subject, kind, period) DO UPDATE SET
           value = excluded.value,
           updated_at = excluded.updated_at",
        rusqlite::params![
            d.student_code,
            d.subject,
            d.grade_level,
            d.classroom,
            d.kind.as_str(),
            d.period,
            d.value,
            now_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn load_snapshot(conn: &Connection) -> anyhow::Result<Snapshot> {
    let mut stmt = conn.prepare(
        "SELECT code, first_name, last_name, grade_level, classroom
         FROM students
         ORDER BY last_name, first_name",
    )?;
    let students: Vec<Student> = stmt
        .query_map([], |r| {
            Ok(Student {
                code: r.get(0)?,
                first_name: r.get(1)?,
                last_name: r.get(2)?,
                grade_level: r.get(3)?,
                classroom: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .context("failed to load students")?;

    let mut stmt = conn.prepare(
        "SELECT subject, grade_level, classroom, period, name, percentage
         FROM activities
         ORDER BY subject, period, name",
    )?;
    let activities: Vec<Activity> = stmt
        .query_map([], |r| {
            Ok(Activity {
                subject: r.get(0)?,
                grade_level: r.get(1)?,
                classroom: r.get(2)?,
                period: r.get(3)?,
                name: r.get(4)?,
                percentage: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .context("failed to load activities")?;

    let mut stmt = conn.prepare(
        "SELECT student_code, subject, grade_level, classroom, period, activity_name,
                percentage, grade, comment, notified
         FROM grades",
    )?;
    let grades: Vec<Grade> = stmt
        .query_map([], |r| {
            Ok(Grade {
                student_code: r.get(0)?,
                subject: r.get(1)?,
                grade_level: r.get(2)?,
                classroom: r.get(3)?,
                period: r.get(4)?,
                activity_name: r.get(5)?,
                percentage: r.get(6)?,
                grade: r.get(7)?,
                comment: r.get(8)?,
                notified: r.get::<_, i64>(9)? != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .context("failed to load grades")?;

    let mut stmt = conn.prepare(
        "SELECT student_code, subject, grade_level, classroom, kind, period, value
         FROM derived_grades",
    )?;
    let rows: Vec<(String, String, String, String, String, i64, f64)> = stmt
        .query_map([], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .context("failed to load derived grades")?;
    let derived: Vec<DerivedGrade> = rows
        .into_iter()
        .filter_map(|(student_code, subject, grade_level, classroom, kind, period, value)| {
            let kind = DerivedKind::parse(&kind)?;
            Some(DerivedGrade {
                student_code,
                subject,
                grade_level,
                classroom,
                kind,
                period,
                value,
            })
        })
        .collect();

    Ok(Snapshot::new(students, activities, grades, derived))
}
