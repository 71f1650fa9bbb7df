use super::EngineError;
use crate::capabilities::SchemaInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (RunStatus::Running, RunStatus::Paused)
                | (RunStatus::Running, RunStatus::Succeeded)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Paused, RunStatus::Running)
                | (RunStatus::Paused, RunStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// State of one run, owned by the engine and persisted in checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: String,
    pub source_ref: String,
    #[serde(default)]
    pub schema: SchemaInfo,
    #[serde(default)]
    pub plan: Vec<String>,
    /// 1-based index of the round in progress; 0 before the first round.
    pub current_round: u32,
    pub should_continue: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub progress_log: Vec<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    /// Source of the attempt currently open in the round.
    #[serde(default)]
    pub current_source: Option<String>,
    pub started_at: i64,
    pub updated_at: i64,
}

impl Run {
    pub fn new(run_id: impl Into<String>, source_ref: impl Into<String>, now: i64) -> Self {
        Self {
            run_id: run_id.into(),
            source_ref: source_ref.into(),
            schema: SchemaInfo::default(),
            plan: Vec::new(),
            current_round: 0,
            should_continue: true,
            last_error: None,
            progress_log: Vec::new(),
            status: RunStatus::Running,
            completed_tasks: Vec::new(),
            current_source: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn transition_to(&mut self, next: RunStatus, now: i64) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidRunTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        if next != RunStatus::Running {
            self.should_continue = false;
        }
        Ok(())
    }

    pub fn log(&mut self, entry: impl Into<String>) {
        self.progress_log.push(entry.into());
    }

    /// Task of the round in progress.
    pub fn current_task(&self) -> Option<&str> {
        let index = usize::try_from(self.current_round).ok()?.checked_sub(1)?;
        self.plan.get(index).map(String::as_str)
    }

    /// Every planned task has had its round.
    pub fn plan_exhausted(&self) -> bool {
        usize::try_from(self.current_round).map_or(true, |round| round >= self.plan.len())
    }

    pub fn mark_completed(&mut self, task: &str) {
        if !self.completed_tasks.iter().any(|done| done == task) {
            self.completed_tasks.push(task.to_string());
        }
    }
}
