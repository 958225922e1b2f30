/// Ranking of geographies by dependency ratio, and per-year descriptive
/// statistics across counties.

use crate::geography::Geography;
use crate::model::{Record, RecordSet, Year};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedGeography {
    /// 1-based position.
    pub rank: usize,
    pub geography: Geography,
    pub total_dep_ratio: f64,
}

/// Orders records by descending total_dep_ratio, ties by label ascending.
fn by_ratio_then_label(a: &&Record, b: &&Record) -> std::cmp::Ordering {
    b.total_dep_ratio
        .total_cmp(&a.total_dep_ratio)
        .then_with(|| a.geography.label().cmp(b.geography.label()))
}

/// Top `k` counties for `year` by total_dep_ratio. The statewide aggregate
/// is never ranked. Returns fewer than `k` entries when fewer counties have
/// a record for that year.
pub fn rank_top_k(records: &RecordSet, year: Year, k: usize) -> Vec<RankedGeography> {
    let mut candidates: Vec<&Record> = records
        .for_year(year)
        .filter(|r| !r.geography.is_statewide())
        .collect();
    candidates.sort_by(by_ratio_then_label);

    candidates
        .into_iter()
        .take(k)
        .enumerate()
        .map(|(i, r)| RankedGeography {
            rank: i + 1,
            geography: r.geography,
            total_dep_ratio: r.total_dep_ratio,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Descriptive statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatioSummary {
    pub year: Year,
    pub counties: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation; NaN for a single county.
    pub std_dev: f64,
}

/// Summary of total_dep_ratio across counties for one year. `None` when no
/// county has a record for that year.
pub fn describe_year(records: &RecordSet, year: Year) -> Option<RatioSummary> {
    let mut values: Vec<f64> = records
        .for_year(year)
        .filter(|r| !r.geography.is_statewide())
        .map(|r| r.total_dep_ratio)
        .collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;
    let median = if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    };
    let std_dev = if n > 1 {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    } else {
        f64::NAN
    };

    Some(RatioSummary {
        year,
        counties: n,
        mean,
        median,
        min: values[0],
        max: values[n - 1],
        std_dev,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BracketCounts;

    fn record(year: Year, label: &str, total: f64) -> Record {
        Record {
            year,
            geography: Geography::from_label(label).unwrap(),
            counts: BracketCounts::default(),
            total_dep_ratio: total,
            child_dep_ratio: total / 2.0,
            aged_dep_ratio: total / 2.0,
        }
    }

    fn sample() -> RecordSet {
        let y = Year::latest();
        RecordSet::from_records(vec![
            record(y, "Washington State", 99.0),
            record(y, "Stevens County", 90.0),
            record(y, "Columbia County", 95.0),
            record(y, "Jefferson County", 80.0),
            record(y, "Ferry County", 90.0),
            record(Year::new(2020).unwrap(), "King County", 120.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_top_three_breaks_ties_alphabetically() {
        let top = rank_top_k(&sample(), Year::latest(), 3);
        let labels: Vec<_> = top.iter().map(|r| r.geography.label()).collect();
        assert_eq!(labels, vec!["Columbia County", "Ferry County", "Stevens County"]);
        assert_eq!(top.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(top[1].total_dep_ratio, 90.0);
        assert_eq!(top[2].total_dep_ratio, 90.0);
    }

    #[test]
    fn test_ranking_is_stable_across_calls() {
        let records = sample();
        assert_eq!(
            rank_top_k(&records, Year::latest(), 3),
            rank_top_k(&records, Year::latest(), 3)
        );
    }

    #[test]
    fn test_statewide_and_other_years_are_excluded() {
        let top = rank_top_k(&sample(), Year::latest(), 10);
        assert_eq!(top.len(), 4);
        assert!(top.iter().all(|r| !r.geography.is_statewide()));
        assert!(top.iter().all(|r| r.geography.label() != "King County"));
    }

    #[test]
    fn test_empty_year_ranks_nothing() {
        assert!(rank_top_k(&sample(), Year::new(2011).unwrap(), 3).is_empty());
        assert!(rank_top_k(&sample(), Year::latest(), 0).is_empty());
    }

    #[test]
    fn test_describe_year() {
        let summary = describe_year(&sample(), Year::latest()).unwrap();
        assert_eq!(summary.counties, 4);
        assert_eq!(summary.min, 80.0);
        assert_eq!(summary.max, 95.0);
        assert_eq!(summary.median, 90.0);
        assert!((summary.mean - 88.75).abs() < 1e-12);
        assert!(summary.std_dev > 0.0);
        assert!(describe_year(&sample(), Year::new(2011).unwrap()).is_none());
    }
}
