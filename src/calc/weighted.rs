//! Relative (extrapolated) weighted average.
//!
//! Scales whatever weight has been graded up to a 100% basis: a single 20%
//! activity graded 5.0 averages 5.0. Contrast with
//! [`crate::calc::period_final::RawWeightedSum`], which never rescales.

use super::round2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct WeightedItem {
    pub grade: f64,
    pub percentage: Option<f64>,
}

#[cfg(test)]
impl WeightedItem {
    pub fn new(grade: f64, percentage: f64) -> Self {
        Self {
            grade,
            percentage: Some(percentage),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtrapolatedAverage {
    /// `None` when nothing carries weight.
    pub average: Option<f64>,
    pub total_percentage: f64,
    pub count_weighted: usize,
}

impl ExtrapolatedAverage {
    pub const EMPTY: ExtrapolatedAverage = ExtrapolatedAverage {
        average: None,
        total_percentage: 0.0,
        count_weighted: 0,
    };
}

/// Accumulates weighted items, so pooled averages can be built without
/// materializing an intermediate vector.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelativeAccumulator {
    weighted_sum: f64,
    total_percentage: f64,
    count_weighted: usize,
}

impl RelativeAccumulator {
    pub fn push(&mut self, grade: f64, percentage: f64) {
        if percentage <= 0.0 {
            return;
        }
        self.weighted_sum += grade * percentage;
        self.total_percentage += percentage;
        self.count_weighted += 1;
    }

    pub fn finish(self) -> ExtrapolatedAverage {
        if self.count_weighted == 0 || self.total_percentage <= 0.0 {
            return ExtrapolatedAverage::EMPTY;
        }
        ExtrapolatedAverage {
            average: Some(round2(self.weighted_sum / self.total_percentage)),
            // Decimal weights drift in f64; thresholds compare at two decimals.
            total_percentage: round2(self.total_percentage),
            count_weighted: self.count_weighted,
        }
    }
}

pub fn relative_average<I>(items: I) -> ExtrapolatedAverage
where
    I: IntoIterator<Item = WeightedItem>,
{
    let mut acc = RelativeAccumulator::default();
    for item in items {
        acc.push(item.grade, item.percentage.unwrap_or(0.0));
    }
    acc.finish()
}
