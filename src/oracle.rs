//! Continue-or-stop decision after each completed round.

use crate::capabilities::CapabilityError;
use crate::config::OracleSettings;
use crate::ledger::{AttemptDisposition, RoundLedger, RoundRecord};
use crate::shared::truncate_chars;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundDigest {
    pub round: u32,
    pub attempt: u32,
    pub task: String,
    pub success: bool,
    pub disposition: AttemptDisposition,
    pub output_preview: String,
    #[serde(default)]
    pub error_preview: String,
}

impl RoundDigest {
    pub fn from_record(record: &RoundRecord, preview_chars: usize) -> Self {
        Self {
            round: record.round,
            attempt: record.attempt,
            task: record.task.clone(),
            success: record.outcome.success,
            disposition: record.disposition,
            output_preview: truncate_chars(&record.outcome.output, preview_chars),
            error_preview: truncate_chars(&record.outcome.error, preview_chars),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationContext {
    pub plan: Vec<String>,
    pub completed_tasks: Vec<String>,
    pub recent_rounds: Vec<RoundDigest>,
    pub current_round: u32,
}

impl ContinuationContext {
    pub fn new(
        plan: &[String],
        completed_tasks: &[String],
        ledger: &RoundLedger,
        current_round: u32,
        settings: &OracleSettings,
    ) -> Self {
        Self {
            plan: plan.to_vec(),
            completed_tasks: completed_tasks.to_vec(),
            recent_rounds: ledger
                .recent(settings.recent_rounds)
                .iter()
                .map(|record| RoundDigest::from_record(record, settings.output_preview_chars))
                .collect(),
            current_round,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub should_continue: bool,
    #[serde(default)]
    pub reason: String,
}

pub trait ContinuationOracle {
    fn decide(&self, context: &ContinuationContext) -> Result<Decision, CapabilityError>;
}

/// Used when no oracle is configured or the oracle fails: keep going while planned
/// tasks remain.
pub fn fallback_decision(context: &ContinuationContext) -> Decision {
    let remaining = context.plan.len() as u64 > u64::from(context.current_round);
    Decision {
        should_continue: remaining,
        reason: if remaining {
            format!(
                "fallback: round {} of {} planned",
                context.current_round,
                context.plan.len()
            )
        } else {
            "fallback: all planned tasks attempted".to_string()
        },
    }
}
