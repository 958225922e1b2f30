use dependency_ratio::config::PipelineConfig;
use dependency_ratio::logging::{self, Stage};
use dependency_ratio::pipeline::{Pipeline, StartFrom, print_summary};
use std::process::ExitCode;

fn main() -> ExitCode {
    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // validate() has already checked the level
    let level = config.log_level().unwrap_or(logging::LogLevel::Info);
    logging::init_logger(level, config.log_file.as_deref(), config.console_timestamps);

    let start = if config.snapshot_dir.is_some() {
        StartFrom::Processed
    } else {
        StartFrom::Raw
    };

    match Pipeline::new(config).run(start) {
        Ok(report) => {
            print_summary(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            logging::log_failure(Stage::System, &e);
            eprintln!("Pipeline failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
