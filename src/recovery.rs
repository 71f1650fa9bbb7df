//! What happens after a failed execution: auto-fix and retry, pause for a manual
//! fix, or skip the round.

use crate::capabilities::{RepairRequest, Repairer};
use crate::config::{EngineLimits, RecoverySettings};
use crate::sandbox::ExecutionOutcome;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    AutoFix,
    ManualFix,
    Skip,
}

impl std::fmt::Display for RecoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryMode::AutoFix => write!(f, "auto_fix"),
            RecoveryMode::ManualFix => write!(f, "manual_fix"),
            RecoveryMode::Skip => write!(f, "skip"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryState {
    pub has_error: bool,
    /// Auto-fix attempts used in the current round.
    pub retry_count: u32,
    #[serde(default)]
    pub mode: Option<RecoveryMode>,
    pub paused: bool,
}

impl RecoveryState {
    /// Called when a round closes (success or skip) so the next one starts clean.
    pub fn reset_for_round(&mut self) {
        self.has_error = false;
        self.retry_count = 0;
        self.mode = None;
    }

    /// Clears the pause on resume; the retry count of the paused round is kept.
    pub fn resume(&mut self) {
        self.paused = false;
        self.has_error = false;
        self.mode = None;
    }
}

/// Everything an intervention hook may inspect about a failed attempt.
#[derive(Debug, Clone, Copy)]
pub struct FailureContext<'a> {
    pub run_id: &'a str,
    pub round: u32,
    pub attempt: u32,
    pub task: &'a str,
    pub source: &'a str,
    pub outcome: &'a ExecutionOutcome,
    pub retry_count: u32,
}

/// External request channel consulted on every failure before the policy applies.
/// Returning `None` leaves the choice to the policy.
pub trait InterventionHook {
    fn on_failure(&self, context: &FailureContext<'_>) -> Option<RecoveryMode>;
}

/// Requests a manual fix for every failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct PauseOnFailure;

impl InterventionHook for PauseOnFailure {
    fn on_failure(&self, _context: &FailureContext<'_>) -> Option<RecoveryMode> {
        Some(RecoveryMode::ManualFix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryDecision {
    Retry { source: String, explanation: String },
    Skip { reason: String },
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub max_retries: u32,
    pub retry_timeouts: bool,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::from_settings(&EngineLimits::default(), &RecoverySettings::default())
    }
}

impl RecoveryPolicy {
    pub fn from_settings(limits: &EngineLimits, recovery: &RecoverySettings) -> Self {
        Self {
            max_retries: limits.max_retries,
            retry_timeouts: recovery.retry_timeouts,
        }
    }

    pub fn select_mode(
        &self,
        state: &RecoveryState,
        outcome: &ExecutionOutcome,
        requested: Option<RecoveryMode>,
    ) -> RecoveryMode {
        match requested {
            Some(RecoveryMode::ManualFix) => return RecoveryMode::ManualFix,
            Some(RecoveryMode::Skip) => return RecoveryMode::Skip,
            Some(RecoveryMode::AutoFix) | None => {}
        }
        if outcome.is_timeout() && !self.retry_timeouts {
            return RecoveryMode::Skip;
        }
        if state.retry_count < self.max_retries {
            RecoveryMode::AutoFix
        } else {
            RecoveryMode::Skip
        }
    }

    /// Applies the selected mode to `state` and returns what the engine must do next.
    /// The repairer is called only in `auto_fix`, so at most `max_retries` times
    /// per round. A fix is run through `extract` and counts only if source remains.
    pub fn recover(
        &self,
        state: &mut RecoveryState,
        requested: Option<RecoveryMode>,
        request: &RepairRequest<'_>,
        outcome: &ExecutionOutcome,
        repairer: Option<&dyn Repairer>,
        extract: fn(&str) -> String,
    ) -> RecoveryDecision {
        state.has_error = true;
        let mode = self.select_mode(state, outcome, requested);
        state.mode = Some(mode);

        match mode {
            RecoveryMode::ManualFix => {
                state.paused = true;
                RecoveryDecision::Pause
            }
            RecoveryMode::Skip => {
                let reason = if requested == Some(RecoveryMode::Skip) {
                    "skip requested".to_string()
                } else if outcome.is_timeout() && !self.retry_timeouts {
                    "execution timed out".to_string()
                } else {
                    format!("retry limit of {} reached", self.max_retries)
                };
                skip(state, reason)
            }
            RecoveryMode::AutoFix => {
                let Some(repairer) = repairer else {
                    return skip(state, "no repairer configured".to_string());
                };
                match repairer.repair(request) {
                    Ok(fix) => match fix
                        .usable_source()
                        .map(extract)
                        .filter(|source| !source.trim().is_empty())
                    {
                        Some(source) => {
                            state.retry_count += 1;
                            state.has_error = false;
                            RecoveryDecision::Retry {
                                source,
                                explanation: fix.explanation.clone(),
                            }
                        }
                        None => skip(
                            state,
                            format!("repair produced no usable source: {}", fix.explanation),
                        ),
                    },
                    Err(err) => {
                        tracing::warn!(error = %err, "repair capability failed");
                        skip(state, format!("repair failed: {err}"))
                    }
                }
            }
        }
    }
}

fn skip(state: &mut RecoveryState, reason: String) -> RecoveryDecision {
    state.retry_count = 0;
    state.has_error = false;
    RecoveryDecision::Skip { reason }
}
