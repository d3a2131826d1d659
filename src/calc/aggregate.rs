//! Student, classroom, grade, subject and institution views built over the
//! relative average. Students whose average is not positive count as "no data
//! yet" and are left out of every view below, so they never drag a mean down.

use super::collation::compare_es;
use super::period_final::combine_periods;
use super::risk::{has_sufficient_data_for_risk_view, RiskEvidence, RiskThresholds};
use super::snapshot::{Grade, Snapshot, Student, PERIODS};
use super::weighted::{ExtrapolatedAverage, RelativeAccumulator};
use super::{round2, PeriodFilter, ScopeFilters};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Bajo,
    Basico,
    Alto,
    Superior,
}

/// `alto` includes its upper bound: 4.50 is alto, anything above is superior.
pub fn classify(average: f64) -> Bucket {
    if average < 3.0 {
        Bucket::Bajo
    } else if average < 4.0 {
        Bucket::Basico
    } else if average <= 4.5 {
        Bucket::Alto
    } else {
        Bucket::Superior
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAverage {
    pub student_code: String,
    pub full_name: String,
    pub grade_level: String,
    pub classroom: String,
    pub average: f64,
    pub total_percentage: f64,
    pub count_weighted: usize,
    pub bucket: Bucket,
    pub at_risk: bool,
}

impl RiskEvidence for StudentAverage {
    fn average(&self) -> f64 {
        self.average
    }
    fn total_percentage(&self) -> f64 {
        self.total_percentage
    }
    fn count_weighted(&self) -> usize {
        self.count_weighted
    }
}

fn grade_in_scope(filters: &ScopeFilters, g: &Grade) -> bool {
    filters.grade_level.as_deref().map(|v| v == g.grade_level).unwrap_or(true)
        && filters.classroom.as_deref().map(|v| v == g.classroom).unwrap_or(true)
        && filters.student_code.as_deref().map(|v| v == g.student_code).unwrap_or(true)
        && filters.includes_subject(&g.subject)
}

pub fn students_in_scope<'a>(snapshot: &'a Snapshot, filters: &ScopeFilters) -> Vec<&'a Student> {
    snapshot
        .students()
        .iter()
        .filter(|s| filters.includes_student(s))
        .collect()
}

/// Pools every graded activity of one student for a period (all subjects, or
/// the filtered one) into a single relative average.
fn pooled_period(
    snapshot: &Snapshot,
    grades: &[&Grade],
    filters: &ScopeFilters,
    period: i64,
) -> ExtrapolatedAverage {
    let mut acc = RelativeAccumulator::default();
    for g in grades
        .iter()
        .filter(|g| g.period == period && filters.includes_subject(&g.subject))
    {
        acc.push(g.grade, snapshot.effective_percentage(g));
    }
    acc.finish()
}

/// Annual view: the four per-period relative averages combined like the annual
/// final (divisor 4). Coverage is the mean per-period weight so it stays on a
/// 0..100 basis; the activity count is summed.
fn annual_from_periods(periods: [ExtrapolatedAverage; 4]) -> ExtrapolatedAverage {
    let Some(average) = combine_periods(periods.map(|p| p.average)) else {
        return ExtrapolatedAverage::EMPTY;
    };
    ExtrapolatedAverage {
        average: Some(average),
        total_percentage: round2(periods.iter().map(|p| p.total_percentage).sum::<f64>() / 4.0),
        count_weighted: periods.iter().map(|p| p.count_weighted).sum(),
    }
}

fn student_extrapolated(
    snapshot: &Snapshot,
    grades: &[&Grade],
    filters: &ScopeFilters,
) -> ExtrapolatedAverage {
    match filters.period {
        PeriodFilter::Term(p) => pooled_period(snapshot, grades, filters, p),
        PeriodFilter::Annual => {
            annual_from_periods(PERIODS.map(|p| pooled_period(snapshot, grades, filters, p)))
        }
    }
}

pub fn compare_ranked(a: &StudentAverage, b: &StudentAverage) -> Ordering {
    b.average
        .partial_cmp(&a.average)
        .unwrap_or(Ordering::Equal)
        .then_with(|| compare_es(&a.full_name, &b.full_name))
}

/// StudentAverages for everyone in scope with data, ranked best first; ties
/// fall back to the lastname-first full name.
pub fn student_averages(
    snapshot: &Snapshot,
    filters: &ScopeFilters,
    thresholds: &RiskThresholds,
) -> Vec<StudentAverage> {
    let students = students_in_scope(snapshot, filters);
    let mut by_student: HashMap<&str, Vec<&Grade>> = HashMap::new();
    for g in snapshot.grades() {
        by_student.entry(g.student_code.as_str()).or_default().push(g);
    }

    let mut out: Vec<StudentAverage> = Vec::new();
    for s in students {
        let grades = by_student.get(s.code.as_str()).map(|v| v.as_slice()).unwrap_or(&[]);
        let ext = student_extrapolated(snapshot, grades, filters);
        let Some(average) = ext.average else {
            continue;
        };
        if average <= 0.0 {
            continue;
        }
        let mut row = StudentAverage {
            student_code: s.code.clone(),
            full_name: s.full_name(),
            grade_level: s.grade_level.clone(),
            classroom: s.classroom.clone(),
            average,
            total_percentage: ext.total_percentage,
            count_weighted: ext.count_weighted,
            bucket: classify(average),
            at_risk: false,
        };
        row.at_risk = thresholds.flags(&row);
        out.push(row);
    }
    out.sort_by(compare_ranked);
    out
}

/// Arithmetic mean of the included students. Classroom, grade and institution
/// averages are this function over the matching scope.
pub fn scope_average(rows: &[StudentAverage]) -> Option<f64> {
    if rows.is_empty() {
        return None;
    }
    let sum: f64 = rows.iter().map(|r| r.average).sum();
    Some(round2(sum / rows.len() as f64))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupLevel {
    Classroom,
    GradeLevel,
}

impl GroupLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "classroom" => Some(GroupLevel::Classroom),
            "gradeLevel" => Some(GroupLevel::GradeLevel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAverage {
    pub grade_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classroom: Option<String>,
    pub average: f64,
    pub student_count: usize,
}

pub fn group_averages(rows: &[StudentAverage], level: GroupLevel) -> Vec<GroupAverage> {
    let mut groups: BTreeMap<(String, Option<String>), (f64, usize)> = BTreeMap::new();
    for r in rows {
        let key = match level {
            GroupLevel::Classroom => (r.grade_level.clone(), Some(r.classroom.clone())),
            GroupLevel::GradeLevel => (r.grade_level.clone(), None),
        };
        let entry = groups.entry(key).or_insert((0.0, 0));
        entry.0 += r.average;
        entry.1 += 1;
    }
    let mut out: Vec<GroupAverage> = groups
        .into_iter()
        .map(|((grade_level, classroom), (sum, count))| GroupAverage {
            grade_level,
            classroom,
            average: round2(sum / count as f64),
            student_count: count,
        })
        .collect();
    out.sort_by(|a, b| b.average.partial_cmp(&a.average).unwrap_or(Ordering::Equal));
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub subject: String,
    pub average: Option<f64>,
    pub count_weighted: usize,
}

fn pooled_subject_period(
    snapshot: &Snapshot,
    filters: &ScopeFilters,
    subject: &str,
    period: i64,
) -> ExtrapolatedAverage {
    let mut acc = RelativeAccumulator::default();
    for g in snapshot.grades().iter().filter(|g| {
        g.subject == subject && g.period == period && grade_in_scope(filters, g)
    }) {
        acc.push(g.grade, snapshot.effective_percentage(g));
    }
    acc.finish()
}

/// Relative average of every graded activity of `subject` in scope, pooled
/// across students.
pub fn subject_average(snapshot: &Snapshot, filters: &ScopeFilters, subject: &str) -> SubjectAverage {
    let ext = match filters.period {
        PeriodFilter::Term(p) => pooled_subject_period(snapshot, filters, subject, p),
        PeriodFilter::Annual => annual_from_periods(
            PERIODS.map(|p| pooled_subject_period(snapshot, filters, subject, p)),
        ),
    };
    SubjectAverage {
        subject: subject.to_string(),
        average: ext.average,
        count_weighted: ext.count_weighted,
    }
}

/// Computable subject averages in scope, best first.
pub fn subject_averages(snapshot: &Snapshot, filters: &ScopeFilters) -> Vec<SubjectAverage> {
    let subjects: BTreeSet<&str> = snapshot
        .grades()
        .iter()
        .filter(|g| grade_in_scope(filters, g))
        .map(|g| g.subject.as_str())
        .collect();
    let mut out: Vec<SubjectAverage> = subjects
        .into_iter()
        .map(|s| subject_average(snapshot, filters, s))
        .filter(|s| s.average.map(|v| v > 0.0).unwrap_or(false))
        .collect();
    out.sort_by(|a, b| {
        b.average
            .partial_cmp(&a.average)
            .unwrap_or(Ordering::Equal)
            .then_with(|| compare_es(&a.subject, &b.subject))
    });
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Distribution {
    pub bajo: usize,
    pub basico: usize,
    pub alto: usize,
    pub superior: usize,
    pub total: usize,
}

pub fn distribution<'a, I>(averages: I) -> Distribution
where
    I: IntoIterator<Item = &'a f64>,
{
    let mut d = Distribution::default();
    for &avg in averages {
        match classify(avg) {
            Bucket::Bajo => d.bajo += 1,
            Bucket::Basico => d.basico += 1,
            Bucket::Alto => d.alto += 1,
            Bucket::Superior => d.superior += 1,
        }
        d.total += 1;
    }
    d
}

/// Explicit "no data" marker for trend series, instead of a numeric 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "camelCase")]
pub enum Reading {
    NoData,
    Value(f64),
}

impl Reading {
    pub fn from_option(v: Option<f64>) -> Self {
        v.map(Reading::Value).unwrap_or(Reading::NoData)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvolutionPoint {
    pub period: i64,
    pub reading: Reading,
}

/// Four-period trend; `scope_average_for` yields the scope mean of one term.
pub fn evolution_with<F>(mut scope_average_for: F) -> Vec<EvolutionPoint>
where
    F: FnMut(i64) -> Option<f64>,
{
    PERIODS
        .iter()
        .map(|&p| EvolutionPoint {
            period: p,
            reading: Reading::from_option(scope_average_for(p)),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub students_in_scope: usize,
    pub students_with_data: usize,
    pub average: Reading,
    pub distribution: Distribution,
    pub at_risk_count: usize,
    pub has_sufficient_risk_data: bool,
    pub best_subject: Option<SubjectAverage>,
    pub worst_subject: Option<SubjectAverage>,
}

pub fn overview(
    snapshot: &Snapshot,
    filters: &ScopeFilters,
    rows: &[StudentAverage],
    thresholds: &RiskThresholds,
) -> Overview {
    let subjects = subject_averages(snapshot, filters);
    Overview {
        students_in_scope: students_in_scope(snapshot, filters).len(),
        students_with_data: rows.len(),
        average: Reading::from_option(scope_average(rows)),
        distribution: distribution(rows.iter().map(|r| &r.average)),
        at_risk_count: rows.iter().filter(|r| r.at_risk).count(),
        has_sufficient_risk_data: has_sufficient_data_for_risk_view(rows, thresholds),
        best_subject: subjects.first().cloned(),
        worst_subject: if subjects.len() > 1 {
            subjects.last().cloned()
        } else {
            None
        },
    }
}
