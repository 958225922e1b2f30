/// Pipeline configuration.
///
/// Settings are read from a TOML file (default `./dependency_ratio.toml`)
/// and may be overridden by environment variables, which in turn may come
/// from a `.env` file.
///
/// | Variable                 | Overrides         |
/// |--------------------------|-------------------|
/// | `DEPRATIO_CONFIG`        | config file path  |
/// | `DEPRATIO_INPUT`         | `input_path`      |
/// | `DEPRATIO_SNAPSHOT_DIR`  | `snapshot_dir`    |
/// | `DEPRATIO_LOG_LEVEL`     | `log_level`       |

use crate::logging::LogLevel;
use crate::model::{PipelineError, Year};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "./dependency_ratio.toml";

/// Default minimum number of distinct years for a trend fit. A 2-point fit
/// has no residual degrees of freedom, so 3 is the smallest useful value.
pub const DEFAULT_MIN_REGRESSION_YEARS: usize = 3;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw population CSV.
    pub input_path: PathBuf,
    /// Directory for intermediate snapshots. No checkpointing when unset.
    pub snapshot_dir: Option<PathBuf>,
    /// Reporting threshold for trend fits.
    pub min_regression_years: usize,
    /// Number of geographies returned by the ranking.
    pub top_k: usize,
    /// Year to rank; the latest year in the domain when unset.
    pub ranking_year: Option<u16>,
    /// Year-over-year change in total_dep_ratio (points) reported as a
    /// level shift.
    pub level_shift_threshold: f64,
    pub log_level: String,
    pub log_file: Option<String>,
    pub console_timestamps: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("./data/population_by_age.csv"),
            snapshot_dir: None,
            min_regression_years: DEFAULT_MIN_REGRESSION_YEARS,
            top_k: 5,
            ranking_year: None,
            level_shift_threshold: 10.0,
            log_level: "info".to_string(),
            log_file: None,
            console_timestamps: false,
        }
    }
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<PipelineConfig, PipelineError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config file.
    pub fn load(path: &Path) -> Result<PipelineConfig, PipelineError> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Loads `.env`, then the config file named by `DEPRATIO_CONFIG` (or the
    /// default path), then applies environment overrides. A missing default
    /// config file is not an error; defaults are used instead.
    pub fn from_env() -> Result<PipelineConfig, PipelineError> {
        dotenv::dotenv().ok();

        let explicit = env::var("DEPRATIO_CONFIG").ok();
        let path = PathBuf::from(explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));
        let mut config = if path.exists() || explicit.is_some() {
            Self::load(&path)?
        } else {
            PipelineConfig::default()
        };

        config.apply_overrides(|name| env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies `DEPRATIO_*` overrides from a variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(input) = lookup("DEPRATIO_INPUT") {
            self.input_path = PathBuf::from(input);
        }
        if let Some(dir) = lookup("DEPRATIO_SNAPSHOT_DIR") {
            self.snapshot_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup("DEPRATIO_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.min_regression_years < 2 {
            return Err(PipelineError::Config(format!(
                "min_regression_years must be at least 2, got {}",
                self.min_regression_years
            )));
        }
        if self.top_k == 0 {
            return Err(PipelineError::Config("top_k must be at least 1".to_string()));
        }
        if !(self.level_shift_threshold.is_finite() && self.level_shift_threshold > 0.0) {
            return Err(PipelineError::Config(format!(
                "level_shift_threshold must be a positive number, got {}",
                self.level_shift_threshold
            )));
        }
        if let Some(year) = self.ranking_year {
            Year::try_from(year)
                .map_err(|e| PipelineError::Config(format!("ranking_year: {}", e)))?;
        }
        self.log_level.parse::<LogLevel>()?;
        Ok(())
    }

    pub fn ranking_year(&self) -> Result<Year, PipelineError> {
        match self.ranking_year {
            Some(year) => Year::try_from(year),
            None => Ok(Year::latest()),
        }
    }

    pub fn log_level(&self) -> Result<LogLevel, PipelineError> {
        self.log_level.parse()
    }
}
