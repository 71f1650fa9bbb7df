//! Append-only record of every execution attempt in a run.
//!
//! Retries append a new record with the next attempt number rather than replacing
//! the failed one, so the ledger keeps the full repair history.

use crate::sandbox::ExecutionOutcome;
use serde::{Deserialize, Serialize};

/// What the engine did with an attempt, fixed before the record is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptDisposition {
    Succeeded,
    /// Failed and a repaired source was scheduled as the next attempt.
    Retried,
    /// Failed and the round was abandoned; its task is not completed.
    Skipped,
    /// Failed and the run paused for a manual fix.
    Paused,
}

impl AttemptDisposition {
    /// No further attempt may follow in the same round.
    pub fn closes_round(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

impl std::fmt::Display for AttemptDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Retried => write!(f, "retried"),
            Self::Skipped => write!(f, "skipped"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRecord {
    pub round: u32,
    pub attempt: u32,
    pub task: String,
    pub source: String,
    pub outcome: ExecutionOutcome,
    pub timestamp: i64,
    pub disposition: AttemptDisposition,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger must start at round 1 attempt 1, got round {round} attempt {attempt}")]
    BadStart { round: u32, attempt: u32 },
    #[error(
        "record (round {round}, attempt {attempt}) cannot follow (round {last_round}, attempt {last_attempt}, {last_disposition})"
    )]
    OutOfOrder {
        round: u32,
        attempt: u32,
        last_round: u32,
        last_attempt: u32,
        last_disposition: AttemptDisposition,
    },
    #[error("record (round {round}, attempt {attempt}) is marked succeeded but its outcome failed")]
    InconsistentOutcome { round: u32, attempt: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundLedger {
    records: Vec<RoundRecord>,
}

impl RoundLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a ledger, checking every record as if it were appended in order.
    pub fn from_records(records: Vec<RoundRecord>) -> Result<Self, LedgerError> {
        let mut ledger = Self::new();
        for record in records {
            ledger.append(record)?;
        }
        Ok(ledger)
    }

    /// Appends a record. Within a round attempts are contiguous from 1; a new round
    /// follows the previous one directly, and only after it was closed or paused.
    pub fn append(&mut self, record: RoundRecord) -> Result<(), LedgerError> {
        check_follows(self.records.last(), &record)?;
        self.records.push(record);
        Ok(())
    }

    /// Re-checks ordering, for ledgers that were deserialized rather than appended.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let mut previous = None;
        for record in &self.records {
            check_follows(previous, record)?;
            previous = Some(record);
        }
        Ok(())
    }

    pub fn records(&self) -> &[RoundRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&RoundRecord> {
        self.records.last()
    }

    /// The last `n` records, oldest first.
    pub fn recent(&self, n: usize) -> &[RoundRecord] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }

    pub fn round(&self, round: u32) -> impl Iterator<Item = &RoundRecord> {
        self.records.iter().filter(move |record| record.round == round)
    }

    /// Attempt number the next record for `round` must carry.
    pub fn next_attempt(&self, round: u32) -> u32 {
        self.round(round)
            .map(|record| record.attempt)
            .max()
            .map_or(1, |attempt| attempt + 1)
    }
}

fn check_follows(last: Option<&RoundRecord>, record: &RoundRecord) -> Result<(), LedgerError> {
    if record.disposition == AttemptDisposition::Succeeded && !record.outcome.success {
        return Err(LedgerError::InconsistentOutcome {
            round: record.round,
            attempt: record.attempt,
        });
    }
    let Some(last) = last else {
        if record.round == 1 && record.attempt == 1 {
            return Ok(());
        }
        return Err(LedgerError::BadStart {
            round: record.round,
            attempt: record.attempt,
        });
    };

    let same_round_retry = record.round == last.round
        && record.attempt == last.attempt + 1
        && !last.disposition.closes_round();
    let next_round = record.round == last.round + 1
        && record.attempt == 1
        && last.disposition != AttemptDisposition::Retried;
    if same_round_retry || next_round {
        Ok(())
    } else {
        Err(LedgerError::OutOfOrder {
            round: record.round,
            attempt: record.attempt,
            last_round: last.round,
            last_attempt: last.attempt,
            last_disposition: last.disposition,
        })
    }
}
