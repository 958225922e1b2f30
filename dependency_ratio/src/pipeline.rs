/// End-to-end pipeline
///
/// Composes Loader → Cleaner → Reshaper → Analyzer as plain in-memory calls.
/// When a snapshot directory is configured, the cleaned observations and
/// the record set are checkpointed between stages so a run can start from
/// either checkpoint instead of the raw file. Checkpoints are stamped with
/// the input file's SHA-256; a checkpoint built from a different input is
/// ignored and the run falls back to the raw file.
///
/// Loader and Cleaner failures abort the run. Reshaper and Analyzer
/// failures, level shifts included, are logged per group and carried in the
/// report. Reshape failures are stored in the processed checkpoint so a
/// resumed run reports them too.

use crate::analysis::anomaly::{LevelShift, detect_level_shifts};
use crate::analysis::groupings::{ReshapeOutcome, reshape};
use crate::analysis::ranking::{RankedGeography, RatioSummary, describe_year, rank_top_k};
use crate::analysis::regression::{TrendFit, geography_trends, statewide_trend};
use crate::clean::clean;
use crate::config::PipelineConfig;
use crate::geography::Geography;
use crate::ingest::load_observations;
use crate::logging::{self, Stage};
use crate::model::{CleanObservation, PipelineError, RecordSet, Year};
use crate::snapshot::{SnapshotSlot, SnapshotStore, sha256_hex_file};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Year indices past the fitted domain projected in the report (2022–2024).
const PROJECTION_HORIZON: usize = 3;

// ============================================================================
// Report Types
// ============================================================================

/// Where a run actually started. A requested checkpoint that is missing
/// falls back to the stage before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartFrom {
    Raw,
    Prepared,
    Processed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub generated_at: String,
    pub input_path: String,
    pub summary: RunSummary,
    pub statewide_trend: Option<TrendFit>,
    pub statewide_projections: Vec<Projection>,
    pub ranking_year: Year,
    pub ranking: Vec<RankedGeography>,
    pub ranked_trends: Vec<TrendReport>,
    pub year_summaries: Vec<RatioSummary>,
    pub level_shifts: Vec<LevelShift>,
    /// Every per-group failure, as "<key>: <error>" lines.
    pub group_failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub started_from: StartFrom,
    /// Unknown when the run started from a checkpoint.
    pub raw_rows: Option<usize>,
    pub clean_rows: Option<usize>,
    pub records: usize,
    pub reshape_failures: usize,
    pub unrecognized_rows: usize,
    pub trend_failures: usize,
    pub level_shifts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub geography: Geography,
    pub fit: Option<TrendFit>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub year_index: usize,
    pub year: u16,
    pub predicted_total_dep_ratio: f64,
    /// True outside the fitted year range; read as lower confidence.
    pub extrapolated: bool,
}

/// Contents of the processed slot: the record set plus what reshaping
/// reported while building it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedCheckpoint {
    pub records: RecordSet,
    /// Reshape failures as "<key>: <error>" lines.
    pub group_failures: Vec<String>,
    pub unrecognized_rows: usize,
}

/// Analyzer output over a record set.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub statewide_trend: Result<TrendFit, PipelineError>,
    pub ranking_year: Year,
    pub ranking: Vec<RankedGeography>,
    pub ranked_trends: Vec<TrendReport>,
    pub year_summaries: Vec<RatioSummary>,
    pub level_shifts: Vec<LevelShift>,
    pub failures: Vec<PipelineError>,
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    snapshots: Option<SnapshotStore>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let snapshots = config.snapshot_dir.clone().map(SnapshotStore::new);
        Self { config, snapshots }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn snapshots(&self) -> Option<&SnapshotStore> {
        self.snapshots.as_ref()
    }

    /// Load + clean the raw file, checkpointing the result.
    /// Returns the raw row count alongside the cleaned rows.
    pub fn prepare(&self) -> Result<(usize, Vec<CleanObservation>), PipelineError> {
        self.prepare_from(self.input_digest().as_deref())
    }

    /// Reshape cleaned rows, checkpointing the record set and its failures.
    pub fn process(&self, prepared: &[CleanObservation]) -> ReshapeOutcome {
        self.process_from(self.input_digest().as_deref(), prepared)
    }

    fn prepare_from(
        &self,
        source: Option<&str>,
    ) -> Result<(usize, Vec<CleanObservation>), PipelineError> {
        let path = &self.config.input_path;
        logging::info(Stage::Loader, None, &format!("loading {}", path.display()));
        let raw = load_observations(path).inspect_err(|e| logging::log_failure(Stage::Loader, e))?;
        let raw_rows = raw.len();

        let cleaned = clean(raw).inspect_err(|e| logging::log_failure(Stage::Cleaner, e))?;
        self.checkpoint(SnapshotSlot::Prepared, source, &cleaned);
        Ok((raw_rows, cleaned))
    }

    fn process_from(&self, source: Option<&str>, prepared: &[CleanObservation]) -> ReshapeOutcome {
        let outcome = reshape(prepared);
        if self.snapshots.is_some() {
            let checkpoint = ProcessedCheckpoint {
                records: outcome.records.clone(),
                group_failures: outcome.failures.iter().map(describe_failure).collect(),
                unrecognized_rows: outcome.unrecognized_rows,
            };
            self.checkpoint(SnapshotSlot::Processed, source, &checkpoint);
        }
        outcome
    }

    /// Runs every analysis over `records`.
    pub fn analyze(&self, records: &RecordSet) -> Result<Analysis, PipelineError> {
        let min_years = self.config.min_regression_years;
        let ranking_year = self.config.ranking_year()?;
        let mut failures = Vec::new();

        let statewide = statewide_trend(records, min_years);
        if let Err(err) = &statewide {
            logging::log_failure(Stage::Analyzer, err);
            failures.push(err.clone());
        }

        let ranking = rank_top_k(records, ranking_year, self.config.top_k);
        let ranked: Vec<Geography> = ranking.iter().map(|r| r.geography).collect();

        let ranked_trends = geography_trends(records, &ranked, min_years)
            .into_iter()
            .map(|trend| match trend.fit {
                Ok(fit) => TrendReport {
                    geography: trend.geography,
                    fit: Some(fit),
                    error: None,
                },
                Err(err) => {
                    logging::log_failure(Stage::Analyzer, &err);
                    let report = TrendReport {
                        geography: trend.geography,
                        fit: None,
                        error: Some(err.to_string()),
                    };
                    failures.push(err);
                    report
                }
            })
            .collect();

        let year_summaries = Year::all()
            .filter_map(|year| describe_year(records, year))
            .collect();
        let level_shifts = detect_level_shifts(records, self.config.level_shift_threshold);

        Ok(Analysis {
            statewide_trend: statewide,
            ranking_year,
            ranking,
            ranked_trends,
            year_summaries,
            level_shifts,
            failures,
        })
    }

    /// Runs the pipeline starting from `start`. Missing or unreadable
    /// checkpoints fall back to the previous stage, down to the raw file.
    pub fn run(&self, start: StartFrom) -> Result<PipelineReport, PipelineError> {
        let mut summary = RunSummary {
            started_from: start,
            raw_rows: None,
            clean_rows: None,
            records: 0,
            reshape_failures: 0,
            unrecognized_rows: 0,
            trend_failures: 0,
            level_shifts: 0,
        };
        let mut group_failures = Vec::new();
        let source = self.input_digest();
        let source = source.as_deref();

        let processed = match start {
            StartFrom::Processed => {
                self.restore::<ProcessedCheckpoint>(SnapshotSlot::Processed, source)
            }
            _ => None,
        };

        let records = match processed {
            Some(checkpoint) => {
                checkpoint.records.verify_complete()?;
                summary.reshape_failures = checkpoint.group_failures.len();
                summary.unrecognized_rows = checkpoint.unrecognized_rows;
                for failure in &checkpoint.group_failures {
                    logging::warn(Stage::Reshaper, None, &format!("(from checkpoint) {}", failure));
                }
                group_failures.extend(checkpoint.group_failures);
                checkpoint.records
            }
            None => {
                let prepared = match start {
                    StartFrom::Prepared | StartFrom::Processed => {
                        self.restore::<Vec<CleanObservation>>(SnapshotSlot::Prepared, source)
                    }
                    StartFrom::Raw => None,
                };
                let prepared = match prepared {
                    Some(rows) => {
                        summary.started_from = StartFrom::Prepared;
                        rows
                    }
                    None => {
                        summary.started_from = StartFrom::Raw;
                        let (raw_rows, rows) = self.prepare_from(source)?;
                        summary.raw_rows = Some(raw_rows);
                        rows
                    }
                };
                summary.clean_rows = Some(prepared.len());

                let outcome = self.process_from(source, &prepared);
                summary.reshape_failures = outcome.failures.len();
                summary.unrecognized_rows = outcome.unrecognized_rows;
                group_failures.extend(outcome.failures.iter().map(describe_failure));
                outcome.records.verify_complete()?;
                outcome.records
            }
        };
        summary.records = records.len();

        let analysis = self.analyze(&records)?;
        summary.trend_failures = analysis.failures.len();
        summary.level_shifts = analysis.level_shifts.len();
        group_failures.extend(analysis.failures.iter().map(describe_failure));
        group_failures.extend(
            analysis
                .level_shifts
                .iter()
                .map(|shift| describe_failure(&shift.to_error())),
        );

        let statewide_projections = match &analysis.statewide_trend {
            Ok(fit) => project(fit),
            Err(_) => Vec::new(),
        };

        Ok(PipelineReport {
            generated_at: Utc::now().to_rfc3339(),
            input_path: self.config.input_path.display().to_string(),
            summary,
            statewide_trend: analysis.statewide_trend.ok(),
            statewide_projections,
            ranking_year: analysis.ranking_year,
            ranking: analysis.ranking,
            ranked_trends: analysis.ranked_trends,
            year_summaries: analysis.year_summaries,
            level_shifts: analysis.level_shifts,
            group_failures,
        })
    }

    /// SHA-256 of the input file. `None` without a snapshot store or when
    /// the input cannot be read; checkpoints are then used unchecked.
    fn input_digest(&self) -> Option<String> {
        if self.snapshots.is_none() {
            return None;
        }
        match sha256_hex_file(&self.config.input_path) {
            Ok(digest) => Some(digest),
            Err(err) => {
                logging::warn(
                    Stage::Snapshot,
                    None,
                    &format!("{}; checkpoints will not be checked against the input", err),
                );
                None
            }
        }
    }

    fn checkpoint<T: Serialize>(&self, slot: SnapshotSlot, source: Option<&str>, data: &T) {
        if let Some(store) = &self.snapshots {
            match store.save(slot, source, data) {
                Ok(path) => logging::debug(
                    Stage::Snapshot,
                    None,
                    &format!("wrote {} snapshot to {}", slot.name(), path.display()),
                ),
                Err(err) => logging::log_failure(Stage::Snapshot, &err),
            }
        }
    }

    fn restore<T: serde::de::DeserializeOwned>(
        &self,
        slot: SnapshotSlot,
        source: Option<&str>,
    ) -> Option<T> {
        let store = self.snapshots.as_ref()?;
        match store.load(slot, source) {
            Ok(Some(data)) => {
                logging::info(Stage::Snapshot, None, &format!("resuming from {} snapshot", slot.name()));
                Some(data)
            }
            Ok(None) => {
                logging::debug(Stage::Snapshot, None, &format!("no {} snapshot", slot.name()));
                None
            }
            Err(err) => {
                logging::log_failure(Stage::Snapshot, &err);
                None
            }
        }
    }
}

fn describe_failure(err: &PipelineError) -> String {
    match err.group_label() {
        Some(group) => format!("{}: {}", group, err),
        None => err.to_string(),
    }
}

/// Predictions for the year indices just past the domain.
fn project(fit: &TrendFit) -> Vec<Projection> {
    (Year::COUNT + 1..=Year::COUNT + PROJECTION_HORIZON)
        .map(|year_index| {
            let x = year_index as f64;
            Projection {
                year_index,
                year: Year::FIRST + year_index as u16 - 1,
                predicted_total_dep_ratio: fit.predict(x),
                extrapolated: fit.is_extrapolation(x),
            }
        })
        .collect()
}

// ============================================================================
// Console Summary
// ============================================================================

pub fn print_summary(report: &PipelineReport) {
    let rule = "═══════════════════════════════════════════════════════════";
    println!("\n{}", rule);
    println!("📊 DEPENDENCY RATIO SUMMARY");
    println!("{}", rule);
    println!();

    let s = &report.summary;
    if let (Some(raw), Some(clean)) = (s.raw_rows, s.clean_rows) {
        println!("Rows:        {} raw, {} Age rows kept", raw, clean);
    }
    println!(
        "Records:     {} built, {} group failures, {} unrecognized rows",
        s.records, s.reshape_failures, s.unrecognized_rows
    );
    if s.started_from != StartFrom::Raw {
        println!("Resumed from the {:?} checkpoint", s.started_from);
    }
    println!();

    match &report.statewide_trend {
        Some(fit) => {
            println!(
                "Statewide trend: slope {:+.3}/yr (SE {:.3}, p = {:.4}), R² {:.3}",
                fit.slope, fit.slope_std_error, fit.p_value, fit.r_squared
            );
            for p in &report.statewide_projections {
                println!(
                    "  {} projection: {:.2}{}",
                    p.year,
                    p.predicted_total_dep_ratio,
                    if p.extrapolated { " (extrapolated)" } else { "" }
                );
            }
        }
        None => println!("Statewide trend: unavailable"),
    }
    println!();

    println!("Top {} counties in {}:", report.ranking.len(), report.ranking_year);
    for r in &report.ranking {
        let trend = report
            .ranked_trends
            .iter()
            .find(|t| t.geography == r.geography)
            .and_then(|t| t.fit.as_ref())
            .map(|f| format!("slope {:+.3}, p = {:.4}", f.slope, f.p_value))
            .unwrap_or_else(|| "no trend".to_string());
        println!("  {:>2}. {:<22} {:>7.2}  ({})", r.rank, r.geography, r.total_dep_ratio, trend);
    }

    if !report.level_shifts.is_empty() {
        println!();
        println!("⚠️  Level shifts ({}):", report.level_shifts.len());
        for shift in &report.level_shifts {
            println!(
                "  {} {}→{}: {:+.2}",
                shift.geography, shift.from_year, shift.to_year, shift.delta
            );
        }
    }

    if !report.group_failures.is_empty() {
        println!();
        println!("❌ Group failures ({}):", report.group_failures.len());
        for failure in &report.group_failures {
            println!("  - {}", failure);
        }
    }
    println!("{}", rule);
}

// ============================================================================
// Tests
// ============================================================================
