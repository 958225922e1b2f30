/// Reshaping and analysis of the cleaned population table.
///
/// Everything here is read-only over its input: records are built once by
/// `groupings` and never modified afterwards.
///
/// Submodules:
/// - `groupings`  — explicit group-by-(year, geography) pivot into `Record`s.
/// - `ratios`     — total / child / aged dependency ratio arithmetic.
/// - `regression` — OLS trend fits, statewide and per geography.
/// - `ranking`    — top-K geographies for a year, per-year summary stats.
/// - `anomaly`    — year-over-year level-shift detection.

pub mod anomaly;
pub mod groupings;
pub mod ranking;
pub mod ratios;
pub mod regression;
