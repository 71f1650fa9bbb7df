use super::EngineError;
use crate::checkpoint::CheckpointHandle;
use crate::sandbox::ExecutionOutcome;

/// One state of the workflow. Each variant carries what the step needs, so the
/// driver loop never reads half-initialized run fields.
#[derive(Debug)]
pub enum Step {
    ReadSchema,
    Plan,
    Generate,
    /// Present only when a safety validator is configured.
    Validate {
        source: String,
    },
    Execute {
        source: String,
    },
    Recover {
        source: String,
        outcome: ExecutionOutcome,
    },
    Record {
        source: String,
        outcome: ExecutionOutcome,
    },
    Continue,
    Summarize(Termination),
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::ReadSchema => "read_schema",
            Step::Plan => "plan",
            Step::Generate => "generate",
            Step::Validate { .. } => "validate",
            Step::Execute { .. } => "execute",
            Step::Recover { .. } => "recover",
            Step::Record { .. } => "record",
            Step::Continue => "continue",
            Step::Summarize(_) => "summarize",
        }
    }
}

#[derive(Debug)]
pub enum Termination {
    Completed { reason: String },
    Paused { checkpoint: CheckpointHandle },
    Failed(EngineError),
}
