/// Source data ingestion.
///
/// Submodules:
/// - `loader` — reads the raw population CSV into `Observation`s.

pub mod loader;

pub use loader::{load_observations, normalize_column_name, parse_observations};
