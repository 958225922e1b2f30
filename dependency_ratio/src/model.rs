/// Core data types for the dependency-ratio pipeline.
///
/// This module defines the shared domain model imported by all other
/// modules: raw and cleaned observations, the ordered `Year` domain, age
/// brackets, processed records, and the pipeline error taxonomy.
/// The geography domain lives in `geography` next to its registry.

use crate::geography::Geography;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Filter values
// ---------------------------------------------------------------------------

/// `selection_filter` value for the rows the pipeline keeps.
/// Income, Race and the other filters are dropped by the Cleaner.
pub const AGE_FILTER: &str = "Age";

// ---------------------------------------------------------------------------
// Year domain
// ---------------------------------------------------------------------------

/// A survey year, restricted to the ordered 2011–2021 domain.
///
/// Only constructible through validation, so holding a `Year` means the
/// value is in range. Serialized as the plain year number and re-validated
/// when deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Year(u16);

impl Year {
    pub const FIRST: u16 = 2011;
    pub const LAST: u16 = 2021;
    /// Number of distinct years in the domain.
    pub const COUNT: usize = (Self::LAST - Self::FIRST + 1) as usize;

    /// Validates a raw year value against the domain.
    pub fn new(value: i64) -> Result<Year, PipelineError> {
        if value < Self::FIRST as i64 || value > Self::LAST as i64 {
            return Err(PipelineError::Validation(format!(
                "year {} is outside the expected range {}..={}",
                value,
                Self::FIRST,
                Self::LAST
            )));
        }
        Ok(Year(value as u16))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// 1-based position in the domain (2011 → 1, 2021 → 11), used as the
    /// regression x value.
    pub fn index(self) -> usize {
        (self.0 - Self::FIRST) as usize + 1
    }

    /// All years in ascending order.
    pub fn all() -> impl Iterator<Item = Year> {
        (Self::FIRST..=Self::LAST).map(Year)
    }

    pub fn latest() -> Year {
        Year(Self::LAST)
    }
}

impl TryFrom<u16> for Year {
    type Error = PipelineError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Year::new(value as i64)
    }
}

impl From<Year> for u16 {
    fn from(year: Year) -> u16 {
        year.0
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Age brackets
// ---------------------------------------------------------------------------

/// The six age brackets reported under the "Age" selection filter,
/// youngest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeBracket {
    UnderOne,
    OneToFourteen,
    FifteenToTwentyFour,
    TwentyFiveToFortyFour,
    FortyFiveToSixtyFour,
    SixtyFiveAndOver,
}

impl AgeBracket {
    pub const ALL: [AgeBracket; 6] = [
        AgeBracket::UnderOne,
        AgeBracket::OneToFourteen,
        AgeBracket::FifteenToTwentyFour,
        AgeBracket::TwentyFiveToFortyFour,
        AgeBracket::FortyFiveToSixtyFour,
        AgeBracket::SixtyFiveAndOver,
    ];

    /// Canonical display label.
    pub fn label(self) -> &'static str {
        match self {
            AgeBracket::UnderOne => "≤1",
            AgeBracket::OneToFourteen => "1–14",
            AgeBracket::FifteenToTwentyFour => "15–24",
            AgeBracket::TwentyFiveToFortyFour => "25–44",
            AgeBracket::FortyFiveToSixtyFour => "45–64",
            AgeBracket::SixtyFiveAndOver => "65+",
        }
    }

    /// Name of the wide-record field holding this bracket's count.
    pub fn field_name(self) -> &'static str {
        match self {
            AgeBracket::UnderOne => "age_1",
            AgeBracket::OneToFourteen => "age_1_14",
            AgeBracket::FifteenToTwentyFour => "age_15_24",
            AgeBracket::TwentyFiveToFortyFour => "age_25_44",
            AgeBracket::FortyFiveToSixtyFour => "age_45_64",
            AgeBracket::SixtyFiveAndOver => "age_65",
        }
    }

    /// Slot position in `ALL`.
    pub fn position(self) -> usize {
        self as usize
    }

    /// Working-age brackets (15–64) form the ratio denominator.
    pub fn is_working_age(self) -> bool {
        matches!(
            self,
            AgeBracket::FifteenToTwentyFour
                | AgeBracket::TwentyFiveToFortyFour
                | AgeBracket::FortyFiveToSixtyFour
        )
    }

    /// Parses a raw `selection_value` label.
    ///
    /// Accepts hyphens or en/em dashes, optional spaces, "to" as a range
    /// separator and a trailing "years". The youngest bracket may be written
    /// as "≤1", "<1", "<=1", "under 1" or "0-1"; the oldest as "65+",
    /// "65 and over" or "≥65".
    pub fn from_label(raw: &str) -> Option<AgeBracket> {
        let mut s = raw.trim().to_lowercase().replace(['–', '—'], "-");
        s = s.replace(" to ", "-");
        s.retain(|c| !c.is_whitespace());
        for suffix in ["years", "year", "yrs"] {
            if let Some(stripped) = s.strip_suffix(suffix) {
                s = stripped.to_string();
                break;
            }
        }
        match s.as_str() {
            "≤1" | "<1" | "<=1" | "under1" | "0-1" | "0" => Some(AgeBracket::UnderOne),
            "1-14" => Some(AgeBracket::OneToFourteen),
            "15-24" => Some(AgeBracket::FifteenToTwentyFour),
            "25-44" => Some(AgeBracket::TwentyFiveToFortyFour),
            "45-64" => Some(AgeBracket::FortyFiveToSixtyFour),
            "65+" | "65andover" | "65andolder" | "≥65" | ">=65" => {
                Some(AgeBracket::SixtyFiveAndOver)
            }
            _ => None,
        }
    }
}

impl fmt::Display for AgeBracket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ---------------------------------------------------------------------------
// Observation types
// ---------------------------------------------------------------------------

/// One row of the raw population table, with normalized field names.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// 1-based line number in the source file (header is line 1).
    pub line: u64,
    pub geography: String,
    pub year: i64,
    pub selection_filter: String,
    pub selection_value: String,
    pub max_sub_population: Option<u64>,
    pub max_percent_total_population: Option<f64>,
    pub max_total_population: Option<u64>,
}

/// An Age-filtered observation with validated year and geography.
///
/// `max_total_population` is gone: too sparse in the source data to be
/// used downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanObservation {
    pub line: u64,
    pub year: Year,
    pub geography: Geography,
    pub selection_value: String,
    pub max_sub_population: Option<u64>,
    pub max_percent_total_population: Option<f64>,
}

// ---------------------------------------------------------------------------
// Processed records
// ---------------------------------------------------------------------------

/// Identity of a processed record. Orders by year, then geography domain
/// order (statewide aggregate first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub year: Year,
    pub geography: Geography,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.year, self.geography)
    }
}

/// Population counts for the six age brackets of one (year, geography).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BracketCounts {
    pub age_1: u64,
    pub age_1_14: u64,
    pub age_15_24: u64,
    pub age_25_44: u64,
    pub age_45_64: u64,
    pub age_65: u64,
}

impl BracketCounts {
    pub fn get(&self, bracket: AgeBracket) -> u64 {
        match bracket {
            AgeBracket::UnderOne => self.age_1,
            AgeBracket::OneToFourteen => self.age_1_14,
            AgeBracket::FifteenToTwentyFour => self.age_15_24,
            AgeBracket::TwentyFiveToFortyFour => self.age_25_44,
            AgeBracket::FortyFiveToSixtyFour => self.age_45_64,
            AgeBracket::SixtyFiveAndOver => self.age_65,
        }
    }

    pub fn set(&mut self, bracket: AgeBracket, value: u64) {
        match bracket {
            AgeBracket::UnderOne => self.age_1 = value,
            AgeBracket::OneToFourteen => self.age_1_14 = value,
            AgeBracket::FifteenToTwentyFour => self.age_15_24 = value,
            AgeBracket::TwentyFiveToFortyFour => self.age_25_44 = value,
            AgeBracket::FortyFiveToSixtyFour => self.age_45_64 = value,
            AgeBracket::SixtyFiveAndOver => self.age_65 = value,
        }
    }

    /// Population aged 15–64. `None` if the sum overflows.
    pub fn working_age(&self) -> Option<u64> {
        self.age_45_64
            .checked_add(self.age_25_44)?
            .checked_add(self.age_15_24)
    }

    /// Population aged 0–14. `None` if the sum overflows.
    pub fn children(&self) -> Option<u64> {
        self.age_1_14.checked_add(self.age_1)
    }

    pub fn aged(&self) -> u64 {
        self.age_65
    }
}

/// One wide record per (year, geography): bracket counts plus the three
/// derived dependency ratios, each rounded to 2 decimal places.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub year: Year,
    pub geography: Geography,
    #[serde(flatten)]
    pub counts: BracketCounts,
    pub total_dep_ratio: f64,
    pub child_dep_ratio: f64,
    pub aged_dep_ratio: f64,
}

impl Record {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            year: self.year,
            geography: self.geography,
        }
    }
}

/// The processed record table: sorted by key, one record per key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Record>", into = "Vec<Record>")]
pub struct RecordSet {
    records: Vec<Record>,
}

impl RecordSet {
    /// Builds a set, rejecting duplicate keys.
    pub fn from_records(mut records: Vec<Record>) -> Result<RecordSet, PipelineError> {
        records.sort_by_key(|r| r.key());
        if let Some(pair) = records.windows(2).find(|w| w[0].key() == w[1].key()) {
            return Err(PipelineError::Validation(format!(
                "duplicate record for {}",
                pair[0].key()
            )));
        }
        Ok(RecordSet { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, key: RecordKey) -> Option<&Record> {
        self.records
            .binary_search_by_key(&key, |r| r.key())
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn for_year(&self, year: Year) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(move |r| r.year == year)
    }

    pub fn for_geography(&self, geography: Geography) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(move |r| r.geography == geography)
    }

    /// Re-checks the derived-value invariants: every ratio finite and
    /// non-negative. Intended after deserializing a snapshot or building a
    /// set by hand.
    pub fn verify_complete(&self) -> Result<(), PipelineError> {
        for record in &self.records {
            let ratios = [
                ("total_dep_ratio", record.total_dep_ratio),
                ("child_dep_ratio", record.child_dep_ratio),
                ("aged_dep_ratio", record.aged_dep_ratio),
            ];
            for (field, value) in ratios {
                if !value.is_finite() || value < 0.0 {
                    return Err(PipelineError::Validation(format!(
                        "{} for {} is {}, expected a finite non-negative value",
                        field,
                        record.key(),
                        value
                    )));
                }
            }
        }
        Ok(())
    }
}

impl TryFrom<Vec<Record>> for RecordSet {
    type Error = PipelineError;

    fn try_from(records: Vec<Record>) -> Result<Self, Self::Error> {
        RecordSet::from_records(records)
    }
}

impl From<RecordSet> for Vec<Record> {
    fn from(set: RecordSet) -> Vec<Record> {
        set.records
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised anywhere in the pipeline.
///
/// Loader and Cleaner errors are fatal to a run. Reshaper and Analyzer
/// errors are scoped to one group and carry its key.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Structural problem in the source file (missing column, bad number).
    MalformedInput(String),
    /// A value falls outside its domain (year, geography, percentage,
    /// cardinality).
    Validation(String),
    /// A reshape group does not have exactly one count per age bracket.
    IncompleteGroup {
        key: RecordKey,
        missing: Vec<AgeBracket>,
        duplicated: Vec<AgeBracket>,
    },
    /// The working-age denominator is zero for a group.
    DivisionByZero { key: RecordKey, field: &'static str },
    /// A regression group has too few distinct years.
    InsufficientData {
        geography: Geography,
        observed: usize,
        required: usize,
    },
    /// A year-over-year jump in total_dep_ratio above the configured
    /// threshold. `key` is the later year; the records are left as they are.
    LevelShift {
        key: RecordKey,
        from_year: Year,
        delta: f64,
    },
    /// A file could not be opened, read or written.
    Io(String),
    /// A snapshot could not be serialized or does not match its slot.
    Snapshot(String),
    /// The configuration file is invalid.
    Config(String),
}

impl PipelineError {
    /// Fatal errors invalidate the whole run; the rest are per group.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedInput(_)
                | PipelineError::Validation(_)
                | PipelineError::Io(_)
                | PipelineError::Config(_)
        )
    }

    /// The offending group, for errors scoped to one.
    pub fn group_label(&self) -> Option<String> {
        match self {
            PipelineError::IncompleteGroup { key, .. } => Some(key.to_string()),
            PipelineError::DivisionByZero { key, .. } => Some(key.to_string()),
            PipelineError::LevelShift { key, .. } => Some(key.to_string()),
            PipelineError::InsufficientData { geography, .. } => {
                Some(geography.label().to_string())
            }
            _ => None,
        }
    }
}

fn join_brackets(brackets: &[AgeBracket]) -> String {
    brackets
        .iter()
        .map(|b| b.field_name())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::MalformedInput(msg) => write!(f, "Malformed input: {}", msg),
            PipelineError::Validation(msg) => write!(f, "Validation error: {}", msg),
            PipelineError::IncompleteGroup {
                key,
                missing,
                duplicated,
            } => {
                write!(f, "Incomplete group {}", key)?;
                if !missing.is_empty() {
                    write!(f, ": missing {}", join_brackets(missing))?;
                }
                if !duplicated.is_empty() {
                    write!(f, ": duplicated {}", join_brackets(duplicated))?;
                }
                Ok(())
            }
            PipelineError::DivisionByZero { key, field } => {
                write!(f, "Division by zero for {}: {} is 0", key, field)
            }
            PipelineError::InsufficientData {
                geography,
                observed,
                required,
            } => write!(
                f,
                "Insufficient data for {}: {} distinct years, need at least {}",
                geography, observed, required
            ),
            PipelineError::LevelShift {
                key,
                from_year,
                delta,
            } => write!(
                f,
                "Level shift for {}: total_dep_ratio changed by {:+.2} since {}",
                key, delta, from_year
            ),
            PipelineError::Io(msg) => write!(f, "I/O error: {}", msg),
            PipelineError::Snapshot(msg) => write!(f, "Snapshot error: {}", msg),
            PipelineError::Config(msg) => write!(f, "Config error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::MalformedInput(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Snapshot(err.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(err: toml::de::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
