/// Observation cleaning.
///
/// Turns raw `Observation`s into `CleanObservation`s: years and geographies
/// are coerced into their fixed domains, percentages are range-checked on
/// every row, only Age-filtered rows are kept and the sparse
/// `max_total_population` column is dropped.
///
/// Every failure here is fatal. A source with the wrong year or geography
/// cardinality invalidates all downstream ratios, so there is no
/// partial-dataset mode. Cardinality is checked twice: over the raw rows and
/// again over the Age rows that survive the filter.

use crate::geography::Geography;
use crate::logging::{self, Stage};
use crate::model::{AGE_FILTER, CleanObservation, Observation, PipelineError, Year};
use std::collections::BTreeSet;

/// An observation with coerced year and geography, not yet filtered.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedObservation {
    pub year: Year,
    pub geography: Geography,
    pub raw: Observation,
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

/// Coerces every `year` into the ordered `Year` domain and checks that all
/// 11 years are present.
pub fn coerce_years(observations: &[Observation]) -> Result<Vec<Year>, PipelineError> {
    let years = observations
        .iter()
        .map(|obs| {
            Year::new(obs.year).map_err(|e| match e {
                PipelineError::Validation(msg) => {
                    PipelineError::Validation(format!("line {}: {}", obs.line, msg))
                }
                other => other,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    check_year_cardinality(years.iter().copied(), "")?;
    Ok(years)
}

/// Fails unless `years` covers the whole year domain. `context` is appended
/// to the message to say which rows were counted.
fn check_year_cardinality(
    years: impl Iterator<Item = Year>,
    context: &str,
) -> Result<(), PipelineError> {
    let distinct: BTreeSet<Year> = years.collect();
    if distinct.len() != Year::COUNT {
        let absent: Vec<_> = Year::all()
            .filter(|y| !distinct.contains(y))
            .map(|y| y.to_string())
            .collect();
        return Err(PipelineError::Validation(format!(
            "expected {} distinct years{}, found {} (absent: {})",
            Year::COUNT,
            context,
            distinct.len(),
            absent.join(", ")
        )));
    }
    Ok(())
}

/// Coerces every `geography` label into the 40-label domain and checks
/// that the observed label set is the whole domain.
pub fn coerce_geographies(observations: &[Observation]) -> Result<Vec<Geography>, PipelineError> {
    let geographies = observations
        .iter()
        .map(|obs| {
            Geography::find(&obs.geography).ok_or_else(|| {
                PipelineError::Validation(format!(
                    "line {}: unknown geography label '{}'",
                    obs.line, obs.geography
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    check_geography_cardinality(geographies.iter().copied(), "")?;
    Ok(geographies)
}

fn check_geography_cardinality(
    geographies: impl Iterator<Item = Geography>,
    context: &str,
) -> Result<(), PipelineError> {
    let distinct: BTreeSet<Geography> = geographies.collect();
    if distinct.len() != Geography::count() {
        let absent: Vec<_> = Geography::all()
            .filter(|g| !distinct.contains(g))
            .map(|g| g.label())
            .collect();
        return Err(PipelineError::Validation(format!(
            "expected {} distinct geographies{}, found {} (absent: {})",
            Geography::count(),
            context,
            distinct.len(),
            absent.join(", ")
        )));
    }
    Ok(())
}

/// Runs both coercions and pairs the results with their rows.
pub fn coerce(observations: Vec<Observation>) -> Result<Vec<TypedObservation>, PipelineError> {
    let years = coerce_years(&observations)?;
    let geographies = coerce_geographies(&observations)?;

    Ok(observations
        .into_iter()
        .zip(years.into_iter().zip(geographies))
        .map(|(raw, (year, geography))| TypedObservation {
            year,
            geography,
            raw,
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Filtering and validation
// ---------------------------------------------------------------------------

/// Keeps only rows whose `selection_filter` is "Age". Other filters
/// (Income, Race, ...) are dropped silently.
pub fn filter_age_rows(observations: Vec<TypedObservation>) -> Vec<TypedObservation> {
    let before = observations.len();
    let kept: Vec<_> = observations
        .into_iter()
        .filter(|obs| obs.raw.selection_filter.trim().eq_ignore_ascii_case(AGE_FILTER))
        .collect();
    logging::debug(
        Stage::Cleaner,
        None,
        &format!("kept {} Age rows, dropped {} other rows", kept.len(), before - kept.len()),
    );
    kept
}

/// Checks `max_percent_total_population` is within [0, 100] wherever
/// present. Runs over every row, whatever its selection filter.
pub fn validate_percentages(observations: &[TypedObservation]) -> Result<(), PipelineError> {
    for obs in observations {
        if let Some(pct) = obs.raw.max_percent_total_population {
            if !(0.0..=100.0).contains(&pct) {
                return Err(PipelineError::Validation(format!(
                    "line {}: max_percent_total_population {} for ({}, {}) is outside [0, 100]",
                    obs.raw.line, pct, obs.year, obs.geography
                )));
            }
        }
    }
    Ok(())
}

/// Checks that the Age rows alone still cover all 11 years and all 40
/// geographies.
pub fn validate_age_cardinality(age_rows: &[TypedObservation]) -> Result<(), PipelineError> {
    check_year_cardinality(age_rows.iter().map(|o| o.year), " among Age rows")?;
    check_geography_cardinality(age_rows.iter().map(|o| o.geography), " among Age rows")
}

fn narrow(obs: TypedObservation) -> CleanObservation {
    CleanObservation {
        line: obs.raw.line,
        year: obs.year,
        geography: obs.geography,
        selection_value: obs.raw.selection_value,
        max_sub_population: obs.raw.max_sub_population,
        max_percent_total_population: obs.raw.max_percent_total_population,
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Cleans raw observations. Deterministic: the same input always yields
/// the same output, in input order.
pub fn clean(observations: Vec<Observation>) -> Result<Vec<CleanObservation>, PipelineError> {
    let total = observations.len();
    let typed = coerce(observations)?;
    validate_percentages(&typed)?;
    let age_rows = filter_age_rows(typed);
    validate_age_cardinality(&age_rows)?;

    let cleaned: Vec<_> = age_rows.into_iter().map(narrow).collect();
    logging::info(
        Stage::Cleaner,
        None,
        &format!("cleaned {} of {} raw rows", cleaned.len(), total),
    );
    Ok(cleaned)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(line: u64, year: i64, geography: &str, filter: &str, value: &str) -> Observation {
        Observation {
            line,
            geography: geography.to_string(),
            year,
            selection_filter: filter.to_string(),
            selection_value: value.to_string(),
            max_sub_population: Some(100),
            max_percent_total_population: Some(5.0),
            max_total_population: None,
        }
    }

    /// One Age row and one Income row for every (year, geography).
    fn full_domain() -> Vec<Observation> {
        let mut rows = Vec::new();
        let mut line = 2;
        for year in Year::all() {
            for geography in Geography::all() {
                rows.push(obs(line, year.value() as i64, geography.label(), "Age", "65+"));
                rows.push(obs(line + 1, year.value() as i64, geography.label(), "Income", "<$25k"));
                line += 2;
            }
        }
        rows
    }

    #[test]
    fn test_clean_keeps_only_age_rows() {
        let cleaned = clean(full_domain()).unwrap();
        assert_eq!(cleaned.len(), Year::COUNT * Geography::count());
        assert!(cleaned.iter().all(|c| c.selection_value == "65+"));
    }

    #[test]
    fn test_year_outside_range_is_validation_error() {
        let mut rows = full_domain();
        rows[5].year = 2022;
        match clean(rows) {
            Err(PipelineError::Validation(msg)) => {
                assert!(msg.contains("2022"), "got: {}", msg);
                assert!(msg.contains("line 7"), "got: {}", msg);
            }
            other => panic!("expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_year_fails_cardinality() {
        let rows: Vec<_> = full_domain().into_iter().filter(|o| o.year != 2015).collect();
        assert!(matches!(coerce_years(&rows), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_missing_geography_fails_cardinality() {
        let rows: Vec<_> = full_domain()
            .into_iter()
            .filter(|o| o.geography != "Garfield County")
            .collect();
        match coerce_geographies(&rows) {
            Err(PipelineError::Validation(msg)) => {
                assert!(msg.contains("found 39"), "got: {}", msg);
                assert!(msg.contains("Garfield County"), "got: {}", msg);
            }
            other => panic!("expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_geography_is_validation_error() {
        let mut rows = full_domain();
        rows[0].geography = "Multnomah County".to_string();
        assert!(matches!(clean(rows), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_geography_labels_are_matched_case_insensitively() {
        let mut rows = full_domain();
        rows[0].geography = "  WASHINGTON STATE ".to_string();
        let cleaned = clean(rows).unwrap();
        assert_eq!(cleaned[0].geography, Geography::statewide());
    }

    #[test]
    fn test_geography_with_only_other_filters_still_counts_towards_domain() {
        // King County reports only Income/Race rows in 2018
        let king = Geography::find("King County").unwrap();
        let mut rows = full_domain();
        for row in rows.iter_mut() {
            if row.year == 2018 && row.geography == king.label() && row.selection_filter == "Age" {
                row.selection_filter = "Race".to_string();
            }
        }
        let cleaned = clean(rows).unwrap();
        assert!(
            !cleaned
                .iter()
                .any(|c| c.geography == king && c.year.value() == 2018),
            "no Age rows should survive for King County 2018"
        );
    }

    #[test]
    fn test_percent_out_of_range_rejected() {
        let mut rows = full_domain();
        rows[0].max_percent_total_population = Some(100.5);
        assert!(matches!(clean(rows), Err(PipelineError::Validation(_))));

        let mut rows = full_domain();
        rows[0].max_percent_total_population = Some(-0.1);
        assert!(matches!(clean(rows), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_percent_is_checked_on_rows_that_are_filtered_out() {
        // Row 1 is an Income row
        let mut rows = full_domain();
        rows[1].max_percent_total_population = Some(250.0);
        match clean(rows) {
            Err(PipelineError::Validation(msg)) => {
                assert!(msg.contains("line 3"), "got: {}", msg);
                assert!(msg.contains("250"), "got: {}", msg);
            }
            other => panic!("expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_geography_without_any_age_rows_fails_cardinality() {
        let mut rows = full_domain();
        for row in rows.iter_mut().filter(|r| r.geography == "Garfield County") {
            row.selection_filter = "Race".to_string();
        }
        match clean(rows) {
            Err(PipelineError::Validation(msg)) => {
                assert!(msg.contains("among Age rows"), "got: {}", msg);
                assert!(msg.contains("found 39"), "got: {}", msg);
                assert!(msg.contains("Garfield County"), "got: {}", msg);
            }
            other => panic!("expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_year_without_any_age_rows_fails_cardinality() {
        let mut rows = full_domain();
        for row in rows.iter_mut().filter(|r| r.year == 2013) {
            row.selection_filter = "Income".to_string();
        }
        match clean(rows) {
            Err(PipelineError::Validation(msg)) => {
                assert!(msg.contains("among Age rows"), "got: {}", msg);
                assert!(msg.contains("2013"), "got: {}", msg);
            }
            other => panic!("expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_cleaning_is_deterministic() {
        let first = clean(full_domain()).unwrap();
        let second = clean(full_domain()).unwrap();
        assert_eq!(first, second);
    }
}
