use serde::{Deserialize, Serialize};

/// Floors that gate the "at risk" flag until there is enough graded evidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskThresholds {
    pub average_below: f64,
    pub min_percentage: f64,
    pub min_activities: usize,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            average_below: 3.0,
            min_percentage: 40.0,
            min_activities: 3,
        }
    }
}

impl RiskThresholds {
    pub fn has_sufficient_data(&self, total_percentage: f64, count_weighted: usize) -> bool {
        total_percentage >= self.min_percentage && count_weighted >= self.min_activities
    }

    pub fn is_at_risk(&self, average: f64, total_percentage: f64, count_weighted: usize) -> bool {
        average < self.average_below && self.has_sufficient_data(total_percentage, count_weighted)
    }

    pub fn flags<T: RiskEvidence>(&self, row: &T) -> bool {
        self.is_at_risk(row.average(), row.total_percentage(), row.count_weighted())
    }
}

/// Evidence a student contributes to the risk view.
pub trait RiskEvidence {
    fn average(&self) -> f64;
    fn total_percentage(&self) -> f64;
    fn count_weighted(&self) -> usize;
}

/// Whether the "at risk" section is worth showing at all: some student in
/// scope clears both floors, flagged or not.
pub fn has_sufficient_data_for_risk_view<'a, T, I>(rows: I, thresholds: &RiskThresholds) -> bool
where
    T: RiskEvidence + 'a,
    I: IntoIterator<Item = &'a T>,
{
    rows.into_iter()
        .any(|r| thresholds.has_sufficient_data(r.total_percentage(), r.count_weighted()))
}
