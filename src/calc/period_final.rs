//! "Final Periodo" and "Final Definitiva" as the live grading sheet computes them.
//!
//! The period final is a literal weighted sum of what has been recorded: grades
//! are multiplied by their activity weight and divided by 100, never by the
//! collected weight. It only equals a true final once the period's weights
//! total 100 and every weighted activity is graded.

use super::round2;
use super::snapshot::{Snapshot, PERIODS};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWeightedSum {
    pub value: f64,
    pub covered_percentage: f64,
    pub graded_count: usize,
}

/// Accumulates `grade * percentage / 100` without rescaling.
pub fn raw_weighted_sum<I>(items: I) -> Option<RawWeightedSum>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut sum = 0.0_f64;
    let mut covered = 0.0_f64;
    let mut count = 0_usize;
    for (grade, percentage) in items {
        if percentage <= 0.0 {
            continue;
        }
        sum += grade * percentage / 100.0;
        covered += percentage;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(RawWeightedSum {
        value: round2(sum),
        covered_percentage: round2(covered),
        graded_count: count,
    })
}

fn placement<'a>(snapshot: &'a Snapshot, student_code: &str, subject: &str) -> Option<(&'a str, &'a str)> {
    if let Some(s) = snapshot.student(student_code) {
        return Some((s.grade_level.as_str(), s.classroom.as_str()));
    }
    snapshot
        .grades()
        .iter()
        .find(|g| g.student_code == student_code && g.subject == subject)
        .map(|g| (g.grade_level.as_str(), g.classroom.as_str()))
}

/// Weighted activities for the student's classroom in this period that the
/// student has a grade for, folded into a raw sum.
pub fn period_final_detail(
    snapshot: &Snapshot,
    student_code: &str,
    subject: &str,
    period: i64,
) -> Option<RawWeightedSum> {
    let (grade_level, classroom) = placement(snapshot, student_code, subject)?;
    let graded = snapshot
        .activities_for(subject, grade_level, classroom, period)
        .filter(|a| a.weight() > 0.0)
        .filter_map(|a| {
            snapshot
                .grade_for(student_code, subject, period, &a.name)
                .map(|g| (g.grade, a.weight()))
        });
    raw_weighted_sum(graded)
}

pub fn period_final(snapshot: &Snapshot, student_code: &str, subject: &str, period: i64) -> Option<f64> {
    period_final_detail(snapshot, student_code, subject, period).map(|r| r.value)
}

/// Combines four period values into the annual final. Missing periods count as
/// 0 and the divisor stays 4; only an entirely empty year is `None`.
pub fn combine_periods(values: [Option<f64>; 4]) -> Option<f64> {
    if values.iter().all(Option::is_none) {
        return None;
    }
    let sum: f64 = values.iter().map(|v| v.unwrap_or(0.0)).sum();
    Some(round2(sum / 4.0))
}

pub fn period_finals(snapshot: &Snapshot, student_code: &str, subject: &str) -> [Option<f64>; 4] {
    PERIODS.map(|p| period_final(snapshot, student_code, subject, p))
}

pub fn annual_final(snapshot: &Snapshot, student_code: &str, subject: &str) -> Option<f64> {
    combine_periods(period_finals(snapshot, student_code, subject))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::snapshot::fixtures::{activity, grade, student};
    use crate::calc::weighted::{relative_average, WeightedItem};

    #[test]
    fn single_activity_is_raw_contribution() {
        let s = student("S1", "Rojas", "Ana", "10", "A");
        let snap = Snapshot::new(
            vec![s.clone()],
            vec![activity("Math", &s, 1, "Quiz", 20.0)],
            vec![grade("Math", &s, 1, "Quiz", 4.0)],
            vec![],
        );
        assert_eq!(period_final(&snap, "S1", "Math", 1), Some(0.8));
        let rel = relative_average([WeightedItem::new(4.0, 20.0)]);
        assert_eq!(rel.average, Some(4.0));
    }

    #[test]
    fn full_coverage_matches_relative_average() {
        let s = student("S1", "Rojas", "Ana", "10", "A");
        let plan = [("T1", 30.0, 4.0), ("T2", 30.0, 3.5), ("Exam", 40.0, 5.0)];
        let snap = Snapshot::new(
            vec![s.clone()],
            plan.iter()
                .map(|(n, p, _)| activity("Math", &s, 2, n, *p))
                .collect(),
            plan.iter()
                .map(|(n, _, g)| grade("Math", &s, 2, n, *g))
                .collect(),
            vec![],
        );
        let raw = period_final(&snap, "S1", "Math", 2).expect("period final");
        let rel = relative_average(plan.iter().map(|(_, p, g)| WeightedItem::new(*g, *p)))
            .average
            .expect("relative average");
        assert!((raw - rel).abs() < 1e-9, "raw={} rel={}", raw, rel);
        assert_eq!(raw, 4.25);
    }

    #[test]
    fn ungraded_and_unweighted_activities_are_skipped() {
        let s = student("S1", "Rojas", "Ana", "10", "A");
        let snap = Snapshot::new(
            vec![s.clone()],
            vec![
                activity("Math", &s, 1, "Quiz", 50.0),
                activity("Math", &s, 1, "Homework", 0.0),
                activity("Math", &s, 1, "Exam", 50.0),
            ],
            vec![
                grade("Math", &s, 1, "Quiz", 4.0),
                grade("Math", &s, 1, "Homework", 1.0),
            ],
            vec![],
        );
        let detail = period_final_detail(&snap, "S1", "Math", 1).expect("detail");
        assert_eq!(detail.value, 2.0);
        assert_eq!(detail.covered_percentage, 50.0);
        assert_eq!(detail.graded_count, 1);
        assert_eq!(period_final(&snap, "S1", "Math", 3), None);
    }

    #[test]
    fn annual_final_always_divides_by_four() {
        assert_eq!(combine_periods([None, None, None, Some(4.0)]), Some(1.0));
        assert_eq!(combine_periods([None, None, None, None]), None);
        assert_eq!(
            combine_periods([Some(3.0), Some(4.0), Some(3.5), Some(4.5)]),
            Some(3.75)
        );
    }

    #[test]
    fn annual_final_over_snapshot() {
        let s = student("S1", "Rojas", "Ana", "10", "A");
        let snap = Snapshot::new(
            vec![s.clone()],
            vec![activity("Math", &s, 4, "Exam", 100.0)],
            vec![grade("Math", &s, 4, "Exam", 4.0)],
            vec![],
        );
        assert_eq!(period_finals(&snap, "S1", "Math"), [None, None, None, Some(4.0)]);
        assert_eq!(annual_final(&snap, "S1", "Math"), Some(1.0));
        assert_eq!(annual_final(&snap, "S1", "History"), None);
    }

    #[test]
    fn unknown_student_falls_back_to_grade_placement() {
        let s = student("S9", "Mora", "Luis", "11", "B");
        let snap = Snapshot::new(
            vec![],
            vec![activity("Art", &s, 1, "Mural", 40.0)],
            vec![grade("Art", &s, 1, "Mural", 5.0)],
            vec![],
        );
        assert_eq!(period_final(&snap, "S9", "Art", 1), Some(2.0));
        assert_eq!(period_final(&snap, "S404", "Art", 1), None);
    }
}
