//! Ledger checkpoints.
//!
//! A checkpoint is the full [`LedgerState`] plus its hex state root, written
//! as JSON.  Loading recomputes the root, refuses documents whose tables
//! no longer match it, and rejects tables a ledger could not resume from.

use crate::ledger::LedgerState;
use crate::merkle::state_root;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CHECKPOINT_SCHEMA: &str = "veiled.ledger.checkpoint.v1";

/// Serialized ledger snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCheckpoint {
    /// Schema identifier (`veiled.ledger.checkpoint.v1`).
    pub schema: String,
    /// Committed transitions at snapshot time.
    pub transitions: u64,
    /// Hex state root of `state`.
    pub state_root: String,
    /// Ledger tables.
    pub state: LedgerState,
}

/// Errors raised while reading or writing checkpoints.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Filesystem failure.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON encoding or decoding failure.
    #[error("checkpoint encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    /// Unexpected schema tag.
    #[error("invalid checkpoint schema: {0}")]
    InvalidSchema(String),
    /// Stored root does not match the stored tables.
    #[error("state root mismatch: stored {stored}, computed {computed}")]
    RootMismatch {
        /// Root recorded in the file.
        stored: String,
        /// Root recomputed from the tables.
        computed: String,
    },
    /// The file's transition count disagrees with the tables it carries.
    #[error("checkpoint claims {claimed} transitions but its state holds {actual}")]
    TransitionMismatch {
        /// Count recorded next to the tables (and in the file name).
        claimed: u64,
        /// Count stored inside the tables.
        actual: u64,
    },
    /// Tables violate the registry/record correspondence or the grant invariant.
    #[error("inconsistent ledger state: {0}")]
    Inconsistent(String),
}

impl LedgerCheckpoint {
    /// Snapshots `state`.
    pub fn capture(state: &LedgerState) -> Self {
        Self {
            schema: CHECKPOINT_SCHEMA.to_string(),
            transitions: state.transitions(),
            state_root: hex::encode(state_root(state)),
            state: state.clone(),
        }
    }

    /// Validates the checkpoint and returns its tables.
    pub fn into_state(self) -> Result<LedgerState, CheckpointError> {
        if self.schema != CHECKPOINT_SCHEMA {
            return Err(CheckpointError::InvalidSchema(self.schema));
        }
        if self.transitions != self.state.transitions() {
            return Err(CheckpointError::TransitionMismatch {
                claimed: self.transitions,
                actual: self.state.transitions(),
            });
        }
        let computed = hex::encode(state_root(&self.state));
        if computed != self.state_root {
            return Err(CheckpointError::RootMismatch {
                stored: self.state_root,
                computed,
            });
        }
        self.state
            .check_consistency()
            .map_err(CheckpointError::Inconsistent)?;
        Ok(self.state)
    }
}

/// Writes `checkpoint_<transitions>.json` into `dir` via a temp file and rename.
pub fn write_checkpoint(
    dir: &Path,
    checkpoint: &LedgerCheckpoint,
) -> Result<PathBuf, CheckpointError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("checkpoint_{}.json", checkpoint.transitions));
    let tmp_path = dir.join(format!("checkpoint_{}.json.tmp", checkpoint.transitions));
    fs::write(&tmp_path, serde_json::to_string_pretty(checkpoint)?)?;
    fs::rename(&tmp_path, &path)?;
    Ok(path)
}

/// Reads and validates a checkpoint file.
pub fn load_checkpoint(path: &Path) -> Result<LedgerState, CheckpointError> {
    let contents = fs::read_to_string(path)?;
    let checkpoint: LedgerCheckpoint = serde_json::from_str(&contents)?;
    checkpoint.into_state()
}

/// Path of the checkpoint with the most transitions in `dir`, if any.
pub fn latest_checkpoint(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut best: Option<(u64, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let count = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|stem| stem.strip_prefix("checkpoint_"))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(count) = count {
            if best.as_ref().map(|(b, _)| count > *b).unwrap_or(true) {
                best = Some((count, path));
            }
        }
    }
    best.map(|(_, path)| path)
}
