//! Durable snapshots of a paused run.
//!
//! A checkpoint is one pretty-printed JSON document per `(run, round)` holding the
//! run, the full ledger and the recovery state. The payload is digested so a
//! hand-edited or truncated file is reported as corrupt instead of resuming from
//! an inconsistent state.

use crate::engine::{Run, RunStatus};
use crate::ledger::RoundLedger;
use crate::recovery::RecoveryState;
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::ids::validate_identifier_value;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const CHECKPOINT_FORMAT: &str = "autoanalyst.checkpoint";
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint `{handle}` not found")]
    NotFound { handle: String },
    #[error("checkpoint `{handle}` is corrupt: {reason}")]
    Corrupt { handle: String, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// `<run_id>-r<round>`; resolved to a file under the store root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointHandle(String);

impl CheckpointHandle {
    pub fn for_round(run_id: &str, round: u32) -> Self {
        Self(format!("{run_id}-r{round}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the handle back into run id and round.
    pub fn parts(&self) -> Option<(&str, u32)> {
        let (run_id, round) = self.0.rsplit_once("-r")?;
        if run_id.is_empty() {
            return None;
        }
        round.parse().ok().map(|round| (run_id, round))
    }
}

impl std::fmt::Display for CheckpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CheckpointHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CheckpointHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Everything needed to resume a run at its post-failure decision point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run: Run,
    pub ledger: RoundLedger,
    pub recovery: RecoveryState,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointDocument {
    format: String,
    version: u32,
    written_at: i64,
    run_id: String,
    digest: String,
    payload: Value,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, handle: &CheckpointHandle) -> PathBuf {
        self.root.join(format!("{handle}.json"))
    }

    pub fn save(
        &self,
        run: &Run,
        ledger: &RoundLedger,
        recovery: &RecoveryState,
        now: i64,
    ) -> Result<CheckpointHandle, CheckpointError> {
        let handle = CheckpointHandle::for_round(&run.run_id, run.current_round);
        let path = self.path_for(&handle);
        validate_identifier_value("checkpoint handle", handle.as_str()).map_err(|reason| {
            CheckpointError::Corrupt {
                handle: handle.to_string(),
                reason,
            }
        })?;

        let payload = json!({
            "run": run,
            "ledger": ledger,
            "recovery": recovery,
        });
        let document = CheckpointDocument {
            format: CHECKPOINT_FORMAT.to_string(),
            version: CHECKPOINT_VERSION,
            written_at: now,
            run_id: run.run_id.clone(),
            digest: payload_digest(&payload).map_err(|e| json_error(&path, e))?,
            payload,
        };
        let body = serde_json::to_vec_pretty(&document).map_err(|e| json_error(&path, e))?;
        atomic_write_file(&path, &body).map_err(|e| io_error(&path, e))?;
        Ok(handle)
    }

    pub fn load(&self, handle: &CheckpointHandle) -> Result<Checkpoint, CheckpointError> {
        if validate_identifier_value("checkpoint handle", handle.as_str()).is_err() {
            return Err(CheckpointError::NotFound {
                handle: handle.to_string(),
            });
        }
        let path = self.path_for(handle);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound {
                    handle: handle.to_string(),
                })
            }
            Err(err) => return Err(io_error(&path, err)),
        };
        let corrupt = |reason: String| CheckpointError::Corrupt {
            handle: handle.to_string(),
            reason,
        };

        let document: CheckpointDocument =
            serde_json::from_str(&raw).map_err(|e| corrupt(format!("invalid document: {e}")))?;
        if document.format != CHECKPOINT_FORMAT {
            return Err(corrupt(format!("unexpected format `{}`", document.format)));
        }
        if document.version != CHECKPOINT_VERSION {
            return Err(corrupt(format!(
                "unsupported version {}",
                document.version
            )));
        }
        let digest = payload_digest(&document.payload).map_err(|e| json_error(&path, e))?;
        if digest != document.digest {
            return Err(corrupt("payload digest mismatch".to_string()));
        }

        let checkpoint: Checkpoint = serde_json::from_value(document.payload)
            .map_err(|e| corrupt(format!("invalid payload: {e}")))?;
        validate_checkpoint(&checkpoint, &document.run_id, handle).map_err(corrupt)?;
        Ok(checkpoint)
    }

    /// Checkpoints of `run_id`, ordered by round.
    pub fn list(&self, run_id: &str) -> Result<Vec<CheckpointHandle>, CheckpointError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&self.root, err)),
        };
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.root, e))?;
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|name| name.strip_suffix(".json")) else {
                continue;
            };
            let handle = CheckpointHandle::from(stem);
            if let Some((owner, round)) = handle.parts() {
                if owner == run_id {
                    found.push((round, handle.clone()));
                }
            }
        }
        found.sort();
        Ok(found.into_iter().map(|(_, handle)| handle).collect())
    }
}

fn payload_digest(payload: &Value) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}

fn validate_checkpoint(
    checkpoint: &Checkpoint,
    document_run_id: &str,
    handle: &CheckpointHandle,
) -> Result<(), String> {
    let run = &checkpoint.run;
    if run.run_id != document_run_id {
        return Err(format!(
            "run id `{}` does not match document run id `{document_run_id}`",
            run.run_id
        ));
    }
    if handle.parts().map(|(run_id, _)| run_id) != Some(run.run_id.as_str()) {
        return Err(format!("handle does not belong to run `{}`", run.run_id));
    }
    if run.status != RunStatus::Paused || !checkpoint.recovery.paused {
        return Err(format!("run is {} rather than paused", run.status));
    }
    if run.current_round as usize > run.plan.len() {
        return Err(format!(
            "current round {} exceeds plan length {}",
            run.current_round,
            run.plan.len()
        ));
    }
    checkpoint.ledger.validate().map_err(|e| e.to_string())?;
    if let Some(last) = checkpoint.ledger.last() {
        if last.round > run.current_round {
            return Err(format!(
                "ledger reaches round {} beyond current round {}",
                last.round, run.current_round
            ));
        }
    }
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> CheckpointError {
    CheckpointError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_error(path: &Path, source: serde_json::Error) -> CheckpointError {
    CheckpointError::Json {
        path: path.display().to_string(),
        source,
    }
}
