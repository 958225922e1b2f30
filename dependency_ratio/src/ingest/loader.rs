/// Raw population table loader
///
/// Reads the county population CSV into `Observation`s. The source header
/// row is inconsistently capitalized and punctuated ("Max Sub-Population",
/// "Selection Filter"), so column names are normalized before lookup.
/// Extra columns are ignored; missing required columns fail the load.

use crate::model::{Observation, PipelineError};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;

// ============================================================================
// Column Layout
// ============================================================================

/// Required columns, each with the normalized names accepted for it.
/// The first name is the canonical field name.
const REQUIRED_COLUMNS: &[&[&str]] = &[
    &["year"],
    &["geography"],
    &["selection_filter"],
    &["selection_value"],
    &["max_percent_total_population", "max_percent_of_total_population"],
    &["max_sub_population", "max_subpopulation"],
    &["max_total_population"],
];

/// Positions of the required columns in the header row.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ColumnMap {
    year: usize,
    geography: usize,
    selection_filter: usize,
    selection_value: usize,
    max_percent_total_population: usize,
    max_sub_population: usize,
    max_total_population: usize,
}

/// Normalizes a raw header name: trimmed, lower case, every run of
/// non-alphanumeric characters collapsed to a single `_`, no leading or
/// trailing underscores.
///
/// "Max Sub-Population" → "max_sub_population"
pub fn normalize_column_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

fn map_columns(headers: &StringRecord) -> Result<ColumnMap, PipelineError> {
    let normalized: Vec<String> = headers.iter().map(normalize_column_name).collect();

    let mut positions = Vec::with_capacity(REQUIRED_COLUMNS.len());
    let mut missing = Vec::new();
    for aliases in REQUIRED_COLUMNS {
        match normalized.iter().position(|n| aliases.contains(&n.as_str())) {
            Some(pos) => positions.push(pos),
            None => missing.push(aliases[0]),
        }
    }

    if !missing.is_empty() {
        return Err(PipelineError::MalformedInput(format!(
            "missing required column(s): {}",
            missing.join(", ")
        )));
    }

    Ok(ColumnMap {
        year: positions[0],
        geography: positions[1],
        selection_filter: positions[2],
        selection_value: positions[3],
        max_percent_total_population: positions[4],
        max_sub_population: positions[5],
        max_total_population: positions[6],
    })
}

// ============================================================================
// Field Parsing
// ============================================================================

fn is_missing(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "" | "na" | "n/a" | "null" | "nan"
    )
}

fn strip_thousands(s: &str) -> String {
    s.trim().chars().filter(|c| *c != ',').collect()
}

fn parse_year(s: &str, line: u64) -> Result<i64, PipelineError> {
    strip_thousands(s).parse::<i64>().map_err(|_| {
        PipelineError::MalformedInput(format!("line {}: year '{}' is not an integer", line, s))
    })
}

/// Parses a population count. Accepts "1,700,000" and "1700000.0" but
/// rejects negative or fractional counts.
fn parse_count(s: &str, column: &str, line: u64) -> Result<Option<u64>, PipelineError> {
    if is_missing(s) {
        return Ok(None);
    }
    let value: f64 = strip_thousands(s).parse().map_err(|_| {
        PipelineError::MalformedInput(format!("line {}: {} '{}' is not a number", line, column, s))
    })?;
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(PipelineError::MalformedInput(format!(
            "line {}: {} '{}' is not a non-negative whole count",
            line, column, s
        )));
    }
    // `as` saturates; anything at or past 2^64 would silently become u64::MAX
    if value >= u64::MAX as f64 {
        return Err(PipelineError::MalformedInput(format!(
            "line {}: {} '{}' is too large for a count",
            line, column, s
        )));
    }
    Ok(Some(value as u64))
}

fn parse_percent(s: &str, line: u64) -> Result<Option<f64>, PipelineError> {
    if is_missing(s) {
        return Ok(None);
    }
    let cleaned = strip_thousands(s);
    let cleaned = cleaned.strip_suffix('%').unwrap_or(&cleaned);
    cleaned.trim().parse::<f64>().map(Some).map_err(|_| {
        PipelineError::MalformedInput(format!(
            "line {}: max_percent_total_population '{}' is not a number",
            line, s
        ))
    })
}

fn parse_row(record: &StringRecord, cols: &ColumnMap, line: u64) -> Result<Observation, PipelineError> {
    let field = |idx: usize| record.get(idx).unwrap_or("");

    Ok(Observation {
        line,
        geography: field(cols.geography).to_string(),
        year: parse_year(field(cols.year), line)?,
        selection_filter: field(cols.selection_filter).to_string(),
        selection_value: field(cols.selection_value).to_string(),
        max_sub_population: parse_count(field(cols.max_sub_population), "max_sub_population", line)?,
        max_percent_total_population: parse_percent(field(cols.max_percent_total_population), line)?,
        max_total_population: parse_count(
            field(cols.max_total_population),
            "max_total_population",
            line,
        )?,
    })
}

// ============================================================================
// Public Entry Points
// ============================================================================

/// Parses observations from any reader producing CSV text.
pub fn parse_observations<R: Read>(reader: R) -> Result<Vec<Observation>, PipelineError> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| PipelineError::MalformedInput(format!("failed to read header row: {}", e)))?
        .clone();
    let cols = map_columns(&headers)?;

    let mut observations = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        // Header is line 1
        let line = i as u64 + 2;
        let record = result.map_err(|e| {
            PipelineError::MalformedInput(format!("line {}: {}", line, e))
        })?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        observations.push(parse_row(&record, &cols, line)?);
    }

    Ok(observations)
}

/// Loads observations from a CSV file on disk.
pub fn load_observations(path: &Path) -> Result<Vec<Observation>, PipelineError> {
    let file = File::open(path)
        .map_err(|e| PipelineError::Io(format!("failed to open {}: {}", path.display(), e)))?;
    parse_observations(file)
}

// ============================================================================
// Tests
// ============================================================================
