//! Detects subject/period combinations where a student's graded weight is
//! partial (strictly between 0 and 100).
//!
//! The scan stops after `cap` findings. The cap only bounds work on large
//! rosters: a truncated report says nothing about how many more problems exist.

use super::collation::compare_es;
use super::snapshot::{Snapshot, Student};
use super::{round2, ScopeFilters};
use serde::Serialize;
use std::collections::BTreeSet;

pub const DEFAULT_DETAIL_CAP: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletenessDetail {
    pub subject: String,
    pub student_code: String,
    pub student_name: String,
    pub period: i64,
    pub graded_percentage: f64,
    pub missing_percentage: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletenessReport {
    pub complete: bool,
    pub items: Vec<CompletenessDetail>,
    pub truncated: bool,
    pub cap: usize,
}

/// Weight of the activities a student has a grade for (weighted activities only),
/// at two decimals so one-decimal weights that total 100 compare as 100.
pub fn graded_percentage(snapshot: &Snapshot, student: &Student, subject: &str, period: i64) -> f64 {
    let sum: f64 = snapshot
        .activities_for(subject, &student.grade_level, &student.classroom, period)
        .filter(|a| a.weight() > 0.0)
        .filter(|a| {
            snapshot
                .grade_for(&student.code, subject, period, &a.name)
                .is_some()
        })
        .map(|a| a.weight())
        .sum();
    round2(sum)
}

fn format_points(v: f64) -> String {
    if v.fract().abs() < 1e-9 {
        format!("{}", v as i64)
    } else {
        format!("{:.2}", v)
    }
}

pub fn check_completeness(snapshot: &Snapshot, filters: &ScopeFilters, cap: usize) -> CompletenessReport {
    let cap = cap.max(1);
    let mut students: Vec<&Student> = snapshot
        .students()
        .iter()
        .filter(|s| filters.includes_student(s))
        .collect();
    students.sort_by(|a, b| compare_es(&a.full_name(), &b.full_name()));
    let periods = filters.period.periods();

    let mut items: Vec<CompletenessDetail> = Vec::new();
    let mut truncated = false;

    'scan: for s in students {
        let subjects: BTreeSet<String> = snapshot.subjects_for_student(s);
        for subject in subjects.iter().filter(|sub| filters.includes_subject(sub)) {
            for &period in &periods {
                let graded = graded_percentage(snapshot, s, subject, period);
                // Nothing graded yet is "not started", not incomplete.
                if graded <= 0.0 || graded >= 100.0 {
                    continue;
                }
                if items.len() >= cap {
                    truncated = true;
                    break 'scan;
                }
                let missing = round2(100.0 - graded);
                items.push(CompletenessDetail {
                    subject: subject.clone(),
                    student_code: s.code.clone(),
                    student_name: s.full_name(),
                    period,
                    graded_percentage: graded,
                    missing_percentage: missing,
                    description: format!(
                        "period {}: graded activities cover {}%, {} percentage points short of 100%",
                        period,
                        format_points(graded),
                        format_points(missing)
                    ),
                });
            }
        }
    }

    CompletenessReport {
        complete: items.is_empty(),
        items,
        truncated,
        cap,
    }
}
