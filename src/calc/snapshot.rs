use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Reserved activity name holding the derived per-period final.
pub const FINAL_PERIODO: &str = "Final Periodo";
/// Reserved activity name holding the derived annual final (stored at period 0).
pub const FINAL_DEFINITIVA: &str = "Final Definitiva";

pub const PERIODS: [i64; 4] = [1, 2, 3, 4];

pub fn is_reserved_activity(name: &str) -> bool {
    name == FINAL_PERIODO || name == FINAL_DEFINITIVA
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub code: String,
    pub first_name: String,
    pub last_name: String,
    pub grade_level: String,
    pub classroom: String,
}

impl Student {
    /// Lastname-first display name, also the alphabetic tie-break key.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub subject: String,
    pub grade_level: String,
    pub classroom: String,
    pub period: i64,
    pub name: String,
    pub percentage: Option<f64>,
}

impl Activity {
    pub fn weight(&self) -> f64 {
        self.percentage.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub student_code: String,
    pub subject: String,
    pub grade_level: String,
    pub classroom: String,
    pub period: i64,
    pub activity_name: String,
    pub percentage: Option<f64>,
    pub grade: f64,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub notified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedKind {
    PeriodFinal,
    AnnualFinal,
}

impl DerivedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DerivedKind::PeriodFinal => "period_final",
            DerivedKind::AnnualFinal => "annual_final",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "period_final" => Some(DerivedKind::PeriodFinal),
            "annual_final" => Some(DerivedKind::AnnualFinal),
            _ => None,
        }
    }

    /// Maps a reserved activity name to the kind of derived row it represents.
    pub fn from_activity_name(name: &str) -> Option<Self> {
        match name {
            FINAL_PERIODO => Some(DerivedKind::PeriodFinal),
            FINAL_DEFINITIVA => Some(DerivedKind::AnnualFinal),
            _ => None,
        }
    }
}

/// A "Final Periodo" / "Final Definitiva" value. Kept apart from raw grades so
/// it can never leak into activity aggregations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedGrade {
    pub student_code: String,
    pub subject: String,
    pub grade_level: String,
    pub classroom: String,
    pub kind: DerivedKind,
    pub period: i64,
    pub value: f64,
}

type GradeKey = (String, String, i64, String);
type ActivityKey = (String, String, String, i64);

/// Read-only view of the record store for one analysis session.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    students: Vec<Student>,
    activities: Vec<Activity>,
    grades: Vec<Grade>,
    derived: Vec<DerivedGrade>,
    student_index: HashMap<String, usize>,
    grade_index: HashMap<GradeKey, usize>,
    activity_index: HashMap<ActivityKey, Vec<usize>>,
}

impl Snapshot {
    pub fn new(
        students: Vec<Student>,
        activities: Vec<Activity>,
        grades: Vec<Grade>,
        derived: Vec<DerivedGrade>,
    ) -> Self {
        let mut snapshot = Snapshot {
            students,
            activities,
            grades: Vec::new(),
            derived,
            ..Default::default()
        };
        for g in grades {
            snapshot.apply_grade(g);
        }
        snapshot.reindex();
        snapshot
    }

    fn reindex(&mut self) {
        self.student_index = self
            .students
            .iter()
            .enumerate()
            .map(|(i, s)| (s.code.clone(), i))
            .collect();
        self.activity_index.clear();
        for (i, a) in self.activities.iter().enumerate() {
            self.activity_index
                .entry((
                    a.subject.clone(),
                    a.grade_level.clone(),
                    a.classroom.clone(),
                    a.period,
                ))
                .or_default()
                .push(i);
        }
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    pub fn grades(&self) -> &[Grade] {
        &self.grades
    }

    pub fn derived(&self) -> &[DerivedGrade] {
        &self.derived
    }

    pub fn student(&self, code: &str) -> Option<&Student> {
        self.student_index.get(code).map(|&i| &self.students[i])
    }

    pub fn grade_for(
        &self,
        student_code: &str,
        subject: &str,
        period: i64,
        activity_name: &str,
    ) -> Option<&Grade> {
        let key = (
            student_code.to_string(),
            subject.to_string(),
            period,
            activity_name.to_string(),
        );
        self.grade_index.get(&key).map(|&i| &self.grades[i])
    }

    pub fn activities_for(
        &self,
        subject: &str,
        grade_level: &str,
        classroom: &str,
        period: i64,
    ) -> impl Iterator<Item = &Activity> {
        let key = (
            subject.to_string(),
            grade_level.to_string(),
            classroom.to_string(),
            period,
        );
        self.activity_index
            .get(&key)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&i| &self.activities[i])
    }

    /// Activity that owns the weight of a grade row, if one is defined.
    pub fn activity_for_grade(&self, g: &Grade) -> Option<&Activity> {
        self.activities_for(&g.subject, &g.grade_level, &g.classroom, g.period)
            .find(|a| a.name == g.activity_name)
    }

    /// Weight of a grade row: the Activity's percentage wins; a grade without an
    /// Activity falls back to its own recorded percentage.
    pub fn effective_percentage(&self, g: &Grade) -> f64 {
        match self.activity_for_grade(g) {
            Some(a) => a.weight(),
            None => g.percentage.unwrap_or(0.0),
        }
    }

    /// Subjects a student takes: anything with activities for their classroom or
    /// with a recorded grade.
    pub fn subjects_for_student(&self, student: &Student) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self
            .activities
            .iter()
            .filter(|a| a.grade_level == student.grade_level && a.classroom == student.classroom)
            .map(|a| a.subject.clone())
            .collect();
        out.extend(
            self.grades
                .iter()
                .filter(|g| g.student_code == student.code)
                .map(|g| g.subject.clone()),
        );
        out
    }

    /// Inserts or replaces a raw grade. Reserved names are ignored here; derived
    /// values go through [`Snapshot::set_derived`].
    pub fn apply_grade(&mut self, grade: Grade) {
        if is_reserved_activity(&grade.activity_name) {
            return;
        }
        let key = (
            grade.student_code.clone(),
            grade.subject.clone(),
            grade.period,
            grade.activity_name.clone(),
        );
        match self.grade_index.get(&key) {
            Some(&i) => self.grades[i] = grade,
            None => {
                self.grade_index.insert(key, self.grades.len());
                self.grades.push(grade);
            }
        }
    }

    pub fn derived_value(
        &self,
        student_code: &str,
        subject: &str,
        kind: DerivedKind,
        period: i64,
    ) -> Option<f64> {
        self.derived
            .iter()
            .find(|d| {
                d.student_code == student_code
                    && d.subject == subject
                    && d.kind == kind
                    && d.period == period
            })
            .map(|d| d.value)
    }

    /// Replaces (or with `None`, clears) one derived row.
    pub fn set_derived(
        &mut self,
        student: &Student,
        subject: &str,
        kind: DerivedKind,
        period: i64,
        value: Option<f64>,
    ) {
        self.derived.retain(|d| {
            !(d.student_code == student.code
                && d.subject == subject
                && d.kind == kind
                && d.period == period)
        });
        if let Some(value) = value {
            self.derived.push(DerivedGrade {
                student_code: student.code.clone(),
                subject: subject.to_string(),
                grade_level: student.grade_level.clone(),
                classroom: student.classroom.clone(),
                kind,
                period,
                value,
            });
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn reserved_rows_never_enter_raw_grades() {
        let s = student("S1", "Rojas", "Ana", "10", "A");
        let mut derived_row = grade("Math", &s, 2, FINAL_PERIODO, 4.2);
        derived_row.percentage = Some(100.0);
        let snap = Snapshot::new(
            vec![s.clone()],
            vec![],
            vec![grade("Math", &s, 2, "Quiz", 3.0), derived_row],
            vec![],
        );
        assert_eq!(snap.grades().len(), 1);
        assert!(snap.grade_for("S1", "Math", 2, FINAL_PERIODO).is_none());
    }

    #[test]
    fn apply_grade_replaces_existing_row() {
        let s = student("S1", "Rojas", "Ana", "10", "A");
        let mut snap = Snapshot::new(
            vec![s.clone()],
            vec![],
            vec![grade("Math", &s, 1, "Quiz", 3.0)],
            vec![],
        );
        snap.apply_grade(grade("Math", &s, 1, "Quiz", 4.5));
        assert_eq!(snap.grades().len(), 1);
        assert_eq!(snap.grade_for("S1", "Math", 1, "Quiz").map(|g| g.grade), Some(4.5));
    }

    #[test]
    fn activity_percentage_owns_the_weight() {
        let s = student("S1", "Rojas", "Ana", "10", "A");
        let mut g = grade("Math", &s, 1, "Quiz", 3.0);
        g.percentage = Some(10.0);
        let mut orphan = grade("Math", &s, 1, "Extra", 3.0);
        orphan.percentage = Some(15.0);
        let snap = Snapshot::new(
            vec![s.clone()],
            vec![activity("Math", &s, 1, "Quiz", 30.0)],
            vec![g.clone(), orphan.clone()],
            vec![],
        );
        assert_eq!(snap.effective_percentage(&g), 30.0);
        assert_eq!(snap.effective_percentage(&orphan), 15.0);
    }

    #[test]
    fn set_derived_clears_on_none() {
        let s = student("S1", "Rojas", "Ana", "10", "A");
        let mut snap = Snapshot::new(vec![s.clone()], vec![], vec![], vec![]);
        snap.set_derived(&s, "Math", DerivedKind::AnnualFinal, 0, Some(3.1));
        assert_eq!(snap.derived_value("S1", "Math", DerivedKind::AnnualFinal, 0), Some(3.1));
        snap.set_derived(&s, "Math", DerivedKind::AnnualFinal, 0, None);
        assert!(snap.derived().is_empty());
    }
}
