/// Intermediate snapshots between pipeline stages
///
/// Lets a stage be re-run without repeating the ones before it. Two slots
/// exist: `prepared` (cleaned observations) and `processed` (the record
/// set). Snapshots are a convenience checkpoint, not durable storage; when a
/// slot is absent the pipeline re-runs from the raw file.
///
/// Each slot is a JSON envelope:
///
/// ```json
/// { "slot": "processed", "schema_version": 1, "created_at": "...",
///   "source_sha256": "9f86d0...", "data": ... }
/// ```
///
/// `source_sha256` is the digest of the input file the slot was built from.
/// Loading with a different digest is a `Snapshot` error, so an edited input
/// is never masked by an old checkpoint.
///
/// `Year` and `Geography` are re-validated on load, so a snapshot cannot
/// smuggle values outside their domains back into the pipeline.

use crate::model::PipelineError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSlot {
    Prepared,
    Processed,
}

impl SnapshotSlot {
    pub fn name(self) -> &'static str {
        match self {
            SnapshotSlot::Prepared => "prepared",
            SnapshotSlot::Processed => "processed",
        }
    }

    fn file_name(self) -> String {
        format!("{}.json", self.name())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    slot: SnapshotSlot,
    schema_version: u32,
    created_at: DateTime<Utc>,
    #[serde(default)]
    source_sha256: Option<String>,
    data: T,
}

/// Hex SHA-256 of a file's contents.
pub fn sha256_hex_file(path: &Path) -> Result<String, PipelineError> {
    let mut file = fs::File::open(path).map_err(|e| {
        PipelineError::Io(format!("failed to open {} for hashing: {}", path.display(), e))
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| {
            PipelineError::Io(format!("failed to read {} for hashing: {}", path.display(), e))
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// A directory holding one file per slot.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, slot: SnapshotSlot) -> PathBuf {
        self.dir.join(slot.file_name())
    }

    /// Writes `data` to `slot`, replacing any previous snapshot. `source` is
    /// the digest of the input the data was built from, when known.
    pub fn save<T: Serialize>(
        &self,
        slot: SnapshotSlot,
        source: Option<&str>,
        data: &T,
    ) -> Result<PathBuf, PipelineError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            PipelineError::Io(format!("failed to create {}: {}", self.dir.display(), e))
        })?;

        let envelope = Envelope {
            slot,
            schema_version: SCHEMA_VERSION,
            created_at: Utc::now(),
            source_sha256: source.map(str::to_string),
            data,
        };
        let json = serde_json::to_string_pretty(&envelope)?;

        let path = self.path_for(slot);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| PipelineError::Io(format!("failed to write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| PipelineError::Io(format!("failed to write {}: {}", path.display(), e)))?;
        Ok(path)
    }

    /// Reads `slot`. `Ok(None)` when no snapshot has been written.
    ///
    /// With `source` set, the snapshot must have been built from an input
    /// with that digest. With `source` unset (input unreadable) the digest
    /// is not checked.
    pub fn load<T: DeserializeOwned>(
        &self,
        slot: SnapshotSlot,
        source: Option<&str>,
    ) -> Result<Option<T>, PipelineError> {
        let path = self.path_for(slot);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| PipelineError::Io(format!("failed to read {}: {}", path.display(), e)))?;

        let envelope: Envelope<T> = serde_json::from_str(&content).map_err(|e| {
            PipelineError::Snapshot(format!("{}: {}", path.display(), e))
        })?;
        if envelope.slot != slot {
            return Err(PipelineError::Snapshot(format!(
                "{} holds slot '{}', expected '{}'",
                path.display(),
                envelope.slot.name(),
                slot.name()
            )));
        }
        if envelope.schema_version != SCHEMA_VERSION {
            return Err(PipelineError::Snapshot(format!(
                "{} has schema version {}, expected {}",
                path.display(),
                envelope.schema_version,
                SCHEMA_VERSION
            )));
        }
        if let Some(expected) = source {
            if envelope.source_sha256.as_deref() != Some(expected) {
                return Err(PipelineError::Snapshot(format!(
                    "{} was built from a different input (sha256 {}), current input is {}",
                    path.display(),
                    envelope.source_sha256.as_deref().unwrap_or("unknown"),
                    expected
                )));
            }
        }
        Ok(Some(envelope.data))
    }

    /// Removes `slot` if present.
    pub fn clear(&self, slot: SnapshotSlot) -> Result<(), PipelineError> {
        let path = self.path_for(slot);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| {
                PipelineError::Io(format!("failed to remove {}: {}", path.display(), e))
            })?;
        }
        Ok(())
    }
}
