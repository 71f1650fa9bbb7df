use crate::engine::run::RunStatus;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("schema of `{source_ref}` could not be read: {reason}")]
    SchemaUnreadable { source_ref: String, reason: String },
    #[error("planning failed: {reason}")]
    PlanFailed { reason: String },
    #[error("generation failed in round {round} for task `{task}`: {reason}")]
    GenerationFailed {
        round: u32,
        task: String,
        reason: String,
    },
    #[error("execution failed in round {round} attempt {attempt}: {reason}")]
    ExecutionFailed {
        round: u32,
        attempt: u32,
        reason: String,
    },
    #[error("generated source rejected in round {round}: {reason}")]
    ValidationRejected { round: u32, reason: String },
    #[error("checkpoint `{handle}` not found")]
    CheckpointNotFound { handle: String },
    #[error("checkpoint `{handle}` is corrupt: {reason}")]
    CheckpointCorrupt { handle: String, reason: String },
    #[error("run state transition `{from}` -> `{to}` is invalid")]
    InvalidRunTransition { from: RunStatus, to: RunStatus },
    #[error("run id error: {0}")]
    RunId(String),
    #[error("ledger error: {0}")]
    Ledger(#[from] crate::ledger::LedgerError),
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

impl EngineError {
    /// Stable name of the error kind, used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::SchemaUnreadable { .. } => "schema_unreadable",
            EngineError::PlanFailed { .. } => "plan_failed",
            EngineError::GenerationFailed { .. } => "generation_failed",
            EngineError::ExecutionFailed { .. } => "execution_failed",
            EngineError::ValidationRejected { .. } => "validation_rejected",
            EngineError::CheckpointNotFound { .. } => "checkpoint_not_found",
            EngineError::CheckpointCorrupt { .. } => "checkpoint_corrupt",
            EngineError::InvalidRunTransition { .. } => "invalid_run_transition",
            EngineError::RunId(_) => "run_id",
            EngineError::Ledger(_) => "ledger",
            EngineError::Io { .. } => "io",
            EngineError::Json { .. } => "json",
        }
    }
}

impl From<crate::checkpoint::CheckpointError> for EngineError {
    fn from(value: crate::checkpoint::CheckpointError) -> Self {
        use crate::checkpoint::CheckpointError;
        match value {
            CheckpointError::NotFound { handle } => EngineError::CheckpointNotFound { handle },
            CheckpointError::Corrupt { handle, reason } => {
                EngineError::CheckpointCorrupt { handle, reason }
            }
            CheckpointError::Io { path, source } => EngineError::Io { path, source },
            CheckpointError::Json { path, source } => EngineError::Json { path, source },
        }
    }
}
