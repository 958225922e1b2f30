/// Structured logging for the dependency-ratio pipeline
///
/// Provides context-rich logging tagged with the pipeline stage and,
/// where relevant, the (year, geography) group being processed. Supports
/// console output and an optional append-only log file.

use crate::model::PipelineError;
use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(PipelineError::Config(format!("unknown log level '{}'", other))),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Loader,
    Cleaner,
    Reshaper,
    Analyzer,
    Snapshot,
    System,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Loader => write!(f, "LOAD"),
            Stage::Cleaner => write!(f, "CLEAN"),
            Stage::Reshaper => write!(f, "RESHAPE"),
            Stage::Analyzer => write!(f, "ANALYZE"),
            Stage::Snapshot => write!(f, "SNAP"),
            Stage::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureScope {
    /// The source is corrupt or incomplete; nothing downstream is valid
    Fatal,
    /// One (year, geography) group or one regression group failed
    PerGroup,
    /// A checkpoint could not be written or read; the run can continue
    Checkpoint,
}

impl fmt::Display for FailureScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureScope::Fatal => write!(f, "FATAL"),
            FailureScope::PerGroup => write!(f, "GROUP"),
            FailureScope::Checkpoint => write!(f, "CHECKPOINT"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        if let Ok(mut slot) = LOGGER.lock() {
            *slot = Some(logger);
        }
    }

    fn format_entry(level: LogLevel, stage: &Stage, group: Option<&str>, message: &str) -> String {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let group_part = group.map(|g| format!(" {}", g)).unwrap_or_default();
        format!("{} {} {}{}: {}", timestamp, level, stage, group_part, message)
    }

    fn log(&self, level: LogLevel, stage: &Stage, group: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let log_entry = Self::format_entry(level, stage, group, message);
        let group_part = group.map(|g| format!(" {}", g)).unwrap_or_default();

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", log_entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", stage, group_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", stage, group_part, message),
                LogLevel::Info => println!("   {}", message),
                LogLevel::Debug => println!("   [DEBUG] {}{}: {}", stage, group_part, message),
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn emit(level: LogLevel, stage: Stage, group: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, &stage, group, message);
        }
    }
}

/// Log a general informational message
pub fn info(stage: Stage, group: Option<&str>, message: &str) {
    emit(LogLevel::Info, stage, group, message);
}

/// Log a warning message
pub fn warn(stage: Stage, group: Option<&str>, message: &str) {
    emit(LogLevel::Warning, stage, group, message);
}

/// Log an error message
pub fn error(stage: Stage, group: Option<&str>, message: &str) {
    emit(LogLevel::Error, stage, group, message);
}

/// Log a debug message
pub fn debug(stage: Stage, group: Option<&str>, message: &str) {
    emit(LogLevel::Debug, stage, group, message);
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Classify a pipeline failure by how much of the run it invalidates
pub fn classify_failure(err: &PipelineError) -> FailureScope {
    match err {
        PipelineError::Snapshot(_) => FailureScope::Checkpoint,
        e if e.is_fatal() => FailureScope::Fatal,
        _ => FailureScope::PerGroup,
    }
}

/// Log a failure with automatic classification. Fatal failures log as
/// errors; group and checkpoint failures as warnings.
pub fn log_failure(stage: Stage, err: &PipelineError) {
    let scope = classify_failure(err);
    let group = err.group_label();
    let message = format!("[{}] {}", scope, err);

    match scope {
        FailureScope::Fatal => error(stage, group.as_deref(), &message),
        FailureScope::PerGroup | FailureScope::Checkpoint => {
            warn(stage, group.as_deref(), &message)
        }
    }
}

// ---------------------------------------------------------------------------
// Stage Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a stage's per-group results
pub fn log_stage_summary(stage: Stage, total: usize, successful: usize, failed: usize) {
    let message = format!(
        "{}/{} groups successful, {} failed",
        successful, total, failed
    );

    if failed == 0 {
        info(stage, None, &message);
    } else if successful == 0 {
        error(stage, None, &message);
    } else {
        warn(stage, None, &message);
    }
}
