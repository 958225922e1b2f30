/// Level-shift detection in per-geography ratio series.
///
/// Small counties can show abrupt year-over-year jumps in total_dep_ratio
/// (Garfield County in 2016 is the known case). These are surfaced as
/// findings and go through the same per-group failure path as reshape and
/// trend failures (`PipelineError::LevelShift`). The records themselves are
/// never adjusted.

use crate::geography::Geography;
use crate::logging::{self, Stage};
use crate::model::{PipelineError, RecordKey, RecordSet, Year};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelShift {
    pub geography: Geography,
    pub from_year: Year,
    pub to_year: Year,
    pub from_ratio: f64,
    pub to_ratio: f64,
    /// to_ratio − from_ratio, in ratio points.
    pub delta: f64,
}

impl LevelShift {
    /// The finding as a per-group failure keyed on the later year.
    pub fn to_error(&self) -> PipelineError {
        PipelineError::LevelShift {
            key: RecordKey {
                year: self.to_year,
                geography: self.geography,
            },
            from_year: self.from_year,
            delta: self.delta,
        }
    }
}

/// Finds consecutive observed years whose total_dep_ratio differs by more
/// than `threshold` points. When a year is missing for a geography the
/// comparison spans the gap.
pub fn detect_level_shifts(records: &RecordSet, threshold: f64) -> Vec<LevelShift> {
    let mut shifts = Vec::new();

    for geography in Geography::all() {
        let series: Vec<_> = records.for_geography(geography).collect();
        for pair in series.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let delta = to.total_dep_ratio - from.total_dep_ratio;
            if delta.abs() > threshold {
                let shift = LevelShift {
                    geography,
                    from_year: from.year,
                    to_year: to.year,
                    from_ratio: from.total_dep_ratio,
                    to_ratio: to.total_dep_ratio,
                    delta,
                };
                logging::log_failure(Stage::Analyzer, &shift.to_error());
                shifts.push(shift);
            }
        }
    }

    shifts
}
