/// Reshaping of cleaned observations into wide records.
///
/// Observations are grouped explicitly by (year, geography). Each group must
/// hold exactly one count per age bracket before ratios are computed; a
/// partial group is reported as `IncompleteGroup` rather than pivoted with
/// gaps. Failures are collected per group so one bad group does not block
/// the others.

use crate::analysis::ratios::compute_ratios;
use crate::logging::{self, Stage};
use crate::model::{
    AgeBracket, BracketCounts, CleanObservation, PipelineError, Record, RecordKey, RecordSet,
};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Per-bracket accumulation for one (year, geography) group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BracketSlots {
    values: [Option<u64>; 6],
    rows_seen: [usize; 6],
}

impl BracketSlots {
    fn insert(&mut self, bracket: AgeBracket, value: Option<u64>) {
        let pos = bracket.position();
        self.rows_seen[pos] += 1;
        if self.rows_seen[pos] == 1 {
            self.values[pos] = value;
        }
    }

    /// Brackets with no row, or whose only row has no count.
    pub fn missing(&self) -> Vec<AgeBracket> {
        AgeBracket::ALL
            .into_iter()
            .filter(|b| match self.rows_seen[b.position()] {
                0 => true,
                1 => self.values[b.position()].is_none(),
                _ => false,
            })
            .collect()
    }

    /// Brackets reported by more than one row.
    pub fn duplicated(&self) -> Vec<AgeBracket> {
        AgeBracket::ALL
            .into_iter()
            .filter(|b| self.rows_seen[b.position()] > 1)
            .collect()
    }
}

/// Groups observations by key. Rows whose `selection_value` is not a known
/// age bracket are skipped and counted.
pub fn group_by_key(observations: &[CleanObservation]) -> (BTreeMap<RecordKey, BracketSlots>, usize) {
    let mut groups: BTreeMap<RecordKey, BracketSlots> = BTreeMap::new();
    let mut unrecognized = 0;

    for obs in observations {
        let key = RecordKey {
            year: obs.year,
            geography: obs.geography,
        };
        match AgeBracket::from_label(&obs.selection_value) {
            Some(bracket) => groups
                .entry(key)
                .or_default()
                .insert(bracket, obs.max_sub_population),
            None => {
                unrecognized += 1;
                logging::warn(
                    Stage::Reshaper,
                    Some(&key.to_string()),
                    &format!(
                        "line {}: unrecognized age bracket '{}' skipped",
                        obs.line, obs.selection_value
                    ),
                );
            }
        }
    }

    (groups, unrecognized)
}

/// Projects a complete group into named bracket counts.
pub fn pivot_group(key: RecordKey, slots: &BracketSlots) -> Result<BracketCounts, PipelineError> {
    let missing = slots.missing();
    let duplicated = slots.duplicated();
    if !missing.is_empty() || !duplicated.is_empty() {
        return Err(PipelineError::IncompleteGroup {
            key,
            missing,
            duplicated,
        });
    }

    let mut counts = BracketCounts::default();
    for bracket in AgeBracket::ALL {
        if let Some(value) = slots.values[bracket.position()] {
            counts.set(bracket, value);
        }
    }
    Ok(counts)
}

/// Builds the wide record for one group.
pub fn build_record(key: RecordKey, counts: BracketCounts) -> Result<Record, PipelineError> {
    let ratios = compute_ratios(&counts, key)?;
    Ok(Record {
        year: key.year,
        geography: key.geography,
        counts,
        total_dep_ratio: ratios.total,
        child_dep_ratio: ratios.child,
        aged_dep_ratio: ratios.aged,
    })
}

// ---------------------------------------------------------------------------
// Reshape
// ---------------------------------------------------------------------------

/// Result of a reshape: the records that could be built plus one error per
/// group that could not.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReshapeOutcome {
    pub records: RecordSet,
    pub failures: Vec<PipelineError>,
    pub unrecognized_rows: usize,
}

impl ReshapeOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Strict view: the first group failure becomes an error.
    pub fn into_result(self) -> Result<RecordSet, PipelineError> {
        match self.failures.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(self.records),
        }
    }
}

/// Reshapes cleaned observations into one record per (year, geography).
pub fn reshape(observations: &[CleanObservation]) -> ReshapeOutcome {
    let (groups, unrecognized_rows) = group_by_key(observations);
    let total = groups.len();

    let mut records = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (key, slots) in &groups {
        match pivot_group(*key, slots).and_then(|counts| build_record(*key, counts)) {
            Ok(record) => records.push(record),
            Err(err) => {
                logging::log_failure(Stage::Reshaper, &err);
                failures.push(err);
            }
        }
    }

    logging::log_stage_summary(Stage::Reshaper, total, records.len(), failures.len());

    let records = match RecordSet::from_records(records) {
        Ok(set) => set,
        Err(err) => {
            failures.push(err);
            RecordSet::default()
        }
    };

    ReshapeOutcome {
        records,
        failures,
        unrecognized_rows,
    }
}

/// Anything that can be turned into a record set. Reshaping a set that is
/// already wide is a no-op.
pub trait Reshape {
    fn reshape(self) -> ReshapeOutcome;
}

impl Reshape for &[CleanObservation] {
    fn reshape(self) -> ReshapeOutcome {
        reshape(self)
    }
}

impl Reshape for &Vec<CleanObservation> {
    fn reshape(self) -> ReshapeOutcome {
        reshape(self)
    }
}

impl Reshape for RecordSet {
    fn reshape(self) -> ReshapeOutcome {
        ReshapeOutcome {
            records: self,
            failures: Vec::new(),
            unrecognized_rows: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geography::Geography;
    use crate::model::Year;

    fn key(year: u16, label: &str) -> RecordKey {
        RecordKey {
            year: Year::try_from(year).unwrap(),
            geography: Geography::from_label(label).unwrap(),
        }
    }

    fn row(year: u16, label: &str, bracket: &str, count: Option<u64>) -> CleanObservation {
        CleanObservation {
            line: 0,
            year: Year::try_from(year).unwrap(),
            geography: Geography::from_label(label).unwrap(),
            selection_value: bracket.to_string(),
            max_sub_population: count,
            max_percent_total_population: None,
        }
    }

    fn group(year: u16, label: &str, values: [u64; 6]) -> Vec<CleanObservation> {
        let labels = ["Under 1", "1-14", "15-24", "25-44", "45-64", "65+"];
        labels
            .iter()
            .zip(values)
            .map(|(b, v)| row(year, label, b, Some(v)))
            .collect()
    }

    #[test]
    fn test_one_record_per_group() {
        let mut rows = group(2021, "Washington State", [85_000, 1_300_000, 700_000, 1_900_000, 1_800_000, 1_700_000]);
        rows.extend(group(2021, "Adams County", [300, 4_000, 2_500, 5_000, 4_500, 2_800]));
        rows.extend(group(2020, "Adams County", [310, 4_100, 2_400, 5_100, 4_400, 2_700]));

        let outcome = reshape(&rows);
        assert!(outcome.is_complete(), "failures: {:?}", outcome.failures);
        assert_eq!(outcome.records.len(), 3);

        let state = outcome.records.get(key(2021, "Washington State")).unwrap();
        assert_eq!(state.counts.working_age(), Some(4_400_000));
        assert_eq!(state.counts.age_65, 1_700_000);
        assert_eq!(state.total_dep_ratio, 70.11);
    }

    #[test]
    fn test_row_order_does_not_matter() {
        let mut rows = group(2019, "King County", [1, 20, 30, 40, 50, 60]);
        let forward = reshape(&rows).records;
        rows.reverse();
        let backward = reshape(&rows).records;
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_missing_bracket_is_incomplete_group() {
        let mut rows = group(2016, "Garfield County", [10, 200, 150, 300, 400, 350]);
        rows.retain(|r| r.selection_value != "65+");
        let outcome = reshape(&rows);
        assert!(outcome.records.is_empty());
        assert_eq!(
            outcome.failures,
            vec![PipelineError::IncompleteGroup {
                key: key(2016, "Garfield County"),
                missing: vec![AgeBracket::SixtyFiveAndOver],
                duplicated: vec![],
            }]
        );
    }

    #[test]
    fn test_missing_count_is_incomplete_group() {
        let mut rows = group(2016, "Garfield County", [10, 200, 150, 300, 400, 350]);
        rows[0].max_sub_population = None;
        let outcome = reshape(&rows);
        match &outcome.failures[..] {
            [PipelineError::IncompleteGroup { missing, .. }] => {
                assert_eq!(missing, &vec![AgeBracket::UnderOne]);
            }
            other => panic!("expected one IncompleteGroup, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_bracket_is_incomplete_group() {
        let mut rows = group(2012, "Ferry County", [10, 200, 150, 300, 400, 350]);
        rows.push(row(2012, "Ferry County", "15–24", Some(151)));
        let outcome = reshape(&rows);
        match &outcome.failures[..] {
            [PipelineError::IncompleteGroup { missing, duplicated, .. }] => {
                assert!(missing.is_empty());
                assert_eq!(duplicated, &vec![AgeBracket::FifteenToTwentyFour]);
            }
            other => panic!("expected one IncompleteGroup, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_group_does_not_block_others() {
        let mut rows = group(2016, "Garfield County", [5, 50, 0, 0, 0, 40]);
        rows.extend(group(2016, "Asotin County", [200, 3_000, 2_000, 4_500, 6_000, 5_500]));
        let outcome = reshape(&rows);

        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records.get(key(2016, "Asotin County")).is_some());
        assert_eq!(
            outcome.failures,
            vec![PipelineError::DivisionByZero {
                key: key(2016, "Garfield County"),
                field: "working_age",
            }]
        );
        assert!(outcome.clone().into_result().is_err());
    }

    #[test]
    fn test_unrecognized_bracket_rows_are_skipped() {
        let mut rows = group(2014, "Lewis County", [1, 20, 30, 40, 50, 60]);
        rows.push(row(2014, "Lewis County", "Total", Some(201)));
        let outcome = reshape(&rows);
        assert!(outcome.is_complete());
        assert_eq!(outcome.unrecognized_rows, 1);
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn test_reshape_is_idempotent() {
        let mut rows = group(2011, "Washington State", [80_000, 1_200_000, 900_000, 1_800_000, 1_850_000, 850_000]);
        rows.extend(group(2011, "Yakima County", [4_000, 60_000, 38_000, 62_000, 55_000, 30_000]));
        let once = rows.reshape().into_result().unwrap();
        let twice = once.clone().reshape().into_result().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_all_records_satisfy_ratio_invariants() {
        let mut rows = Vec::new();
        for (i, year) in Year::all().enumerate() {
            let i = i as u64;
            rows.extend(group(year.value(), "Pierce County", [9_000 + i, 150_000, 110_000 + i * 3, 240_000, 220_000, 120_000 + i * 900]));
        }
        let records = reshape(&rows).into_result().unwrap();
        assert_eq!(records.len(), 11);
        assert!(records.verify_complete().is_ok());
        for r in &records {
            assert!(r.total_dep_ratio >= 0.0 && r.child_dep_ratio >= 0.0 && r.aged_dep_ratio >= 0.0);
        }
    }
}
