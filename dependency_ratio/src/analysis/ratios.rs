/// Dependency ratio computation.
///
/// All three ratios share the working-age denominator (ages 15–64):
///
///   total = 100 × (age_65 + age_1_14 + age_1) / working_age
///   child = 100 × (age_1_14 + age_1) / working_age
///   aged  = 100 × age_65 / working_age
///
/// Stored values are rounded to 2 decimal places. A zero denominator is
/// reported as `DivisionByZero`, never defaulted. Bracket sums that
/// overflow `u64` are reported as `MalformedInput` for the group.

use crate::model::{BracketCounts, PipelineError, RecordKey};

/// Field name reported when the denominator is zero.
pub const WORKING_AGE_FIELD: &str = "working_age";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DependencyRatios {
    pub total: f64,
    pub child: f64,
    pub aged: f64,
}

impl DependencyRatios {
    pub fn rounded(&self) -> DependencyRatios {
        DependencyRatios {
            total: round2(self.total),
            child: round2(self.child),
            aged: round2(self.aged),
        }
    }
}

/// Rounds half away from zero to 2 decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Unrounded ratios for one group.
pub fn raw_ratios(counts: &BracketCounts, key: RecordKey) -> Result<DependencyRatios, PipelineError> {
    let overflow = |what: &str| {
        PipelineError::MalformedInput(format!("{}: {} count overflows", key, what))
    };
    let working_age = counts.working_age().ok_or_else(|| overflow(WORKING_AGE_FIELD))?;
    let children = counts.children().ok_or_else(|| overflow("child"))?;
    if working_age == 0 {
        return Err(PipelineError::DivisionByZero {
            key,
            field: WORKING_AGE_FIELD,
        });
    }

    let working_age = working_age as f64;
    let children = children as f64;
    let aged = counts.aged() as f64;

    Ok(DependencyRatios {
        total: 100.0 * (aged + children) / working_age,
        child: 100.0 * children / working_age,
        aged: 100.0 * aged / working_age,
    })
}

/// Ratios as stored on a `Record`: rounded to 2 decimal places.
pub fn compute_ratios(counts: &BracketCounts, key: RecordKey) -> Result<DependencyRatios, PipelineError> {
    raw_ratios(counts, key).map(|r| r.rounded())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geography::Geography;
    use crate::model::Year;

    fn statewide_2021() -> RecordKey {
        RecordKey {
            year: Year::latest(),
            geography: Geography::statewide(),
        }
    }

    fn counts(age_1: u64, age_1_14: u64, age_15_24: u64, age_25_44: u64, age_45_64: u64, age_65: u64) -> BracketCounts {
        BracketCounts {
            age_1,
            age_1_14,
            age_15_24,
            age_25_44,
            age_45_64,
            age_65,
        }
    }

    #[test]
    fn test_statewide_scenario() {
        let c = counts(85_000, 1_300_000, 700_000, 1_900_000, 1_800_000, 1_700_000);
        assert_eq!(c.working_age(), Some(4_400_000));

        let ratios = compute_ratios(&c, statewide_2021()).unwrap();
        let dependents = 1_700_000.0 + 1_300_000.0 + 85_000.0;
        assert_eq!(ratios.total, round2(100.0 * dependents / 4_400_000.0));
        assert_eq!(ratios.total, 70.11);
        assert_eq!(ratios.child, 31.48);
        assert_eq!(ratios.aged, 38.64);
    }

    #[test]
    fn test_total_equals_rounded_sum_of_raw_components() {
        let samples = [
            counts(1, 2, 3, 4, 5, 6),
            counts(2_117, 30_441, 22_085, 46_390, 42_812, 33_007),
            counts(9, 0, 100, 0, 0, 77),
            counts(0, 0, 1, 1, 1, 0),
        ];
        for c in samples {
            let raw = raw_ratios(&c, statewide_2021()).unwrap();
            let stored = raw.rounded();
            assert!(
                (stored.total - round2(raw.child + raw.aged)).abs() < 1e-9,
                "total {} should equal round(child_raw + aged_raw) for {:?}",
                stored.total,
                c
            );
        }
    }

    #[test]
    fn test_ratios_are_non_negative() {
        let ratios = compute_ratios(&counts(0, 0, 10, 10, 10, 0), statewide_2021()).unwrap();
        assert_eq!(ratios.total, 0.0);
        assert_eq!(ratios.child, 0.0);
        assert_eq!(ratios.aged, 0.0);
    }

    #[test]
    fn test_zero_working_age_is_reported() {
        let key = RecordKey {
            year: Year::new(2016).unwrap(),
            geography: Geography::find("Garfield County").unwrap(),
        };
        let err = compute_ratios(&counts(5, 50, 0, 0, 0, 40), key).unwrap_err();
        assert_eq!(
            err,
            PipelineError::DivisionByZero {
                key,
                field: WORKING_AGE_FIELD
            }
        );
    }

    #[test]
    fn test_overflowing_bracket_sum_is_malformed_input() {
        let huge = 10_000_000_000_000_000_000;
        match compute_ratios(&counts(1, 1, huge, huge, huge, 1), statewide_2021()) {
            Err(PipelineError::MalformedInput(msg)) => {
                assert!(msg.contains("(2021, Washington State)"), "got: {}", msg);
                assert!(msg.contains("working_age"), "got: {}", msg);
            }
            other => panic!("expected MalformedInput, got {:?}", other),
        }
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(70.113_636), 70.11);
        assert_eq!(round2(38.636_363), 38.64);
        assert_eq!(round2(0.0), 0.0);
    }
}
