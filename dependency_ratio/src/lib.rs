//! County dependency-ratio pipeline for Washington State population data.
//!
//! Loads the county population-by-age CSV, cleans it into fixed year and
//! geography domains, reshapes it into one record per (year, geography)
//! with total, child and aged dependency ratios, and fits OLS trends over
//! the result.

pub mod analysis;
pub mod clean;
pub mod config;
pub mod geography;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod snapshot;
