//! Narrow interfaces to the collaborators the engine drives but does not implement.

pub mod command;
pub mod fixed;
pub mod response;
pub mod schema;
pub mod sql_safety;
pub mod sqlite_schema;

pub use command::CommandCapability;
pub use fixed::FixedPlanner;
pub use schema::{SchemaInfo, TableSchema};
pub use sql_safety::KeywordSafetyValidator;
pub use sqlite_schema::SqliteSchemaReader;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability unavailable: {0}")]
    Unavailable(String),
    #[error("capability response could not be parsed: {0}")]
    Unparseable(String),
    #[error("capability failed: {0}")]
    Failed(String),
}

pub trait SchemaReader {
    fn read(&self, source_ref: &str) -> Result<SchemaInfo, CapabilityError>;
}

pub trait Planner {
    /// Ordered task descriptions; the engine trims and caps the list.
    fn plan(&self, schema: &SchemaInfo) -> Result<Vec<String>, CapabilityError>;
}

pub trait Generator {
    fn generate(
        &self,
        task: &str,
        schema: &SchemaInfo,
        completed_tasks: &[String],
    ) -> Result<String, CapabilityError>;
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairRequest<'a> {
    pub original_source: &'a str,
    pub error_text: &'a str,
    pub task: &'a str,
    pub schema: &'a SchemaInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairOutcome {
    pub ok: bool,
    #[serde(default)]
    pub fixed_source: String,
    #[serde(default)]
    pub explanation: String,
}

impl RepairOutcome {
    pub fn fixed(source: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            ok: true,
            fixed_source: source.into(),
            explanation: explanation.into(),
        }
    }

    pub fn unusable(explanation: impl Into<String>) -> Self {
        Self {
            ok: false,
            fixed_source: String::new(),
            explanation: explanation.into(),
        }
    }

    /// A fix counts only when it is flagged ok and carries non-blank source.
    pub fn usable_source(&self) -> Option<&str> {
        if self.ok && !self.fixed_source.trim().is_empty() {
            Some(&self.fixed_source)
        } else {
            None
        }
    }
}

pub trait Repairer {
    fn repair(&self, request: &RepairRequest<'_>) -> Result<RepairOutcome, CapabilityError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    pub is_safe: bool,
    #[serde(default)]
    pub reason: String,
}

impl ValidationVerdict {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            reason: String::new(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            reason: reason.into(),
        }
    }
}

pub trait SafetyValidator {
    fn validate(&self, query: &str) -> ValidationVerdict;
}

/// A successful query answer handed over for a plain-language reading.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpretRequest<'a> {
    pub question: &'a str,
    pub sql: &'a str,
    pub row_count: usize,
    pub columns: &'a [String],
    /// Leading rows only, values in column order.
    pub sample_rows: &'a [Vec<Value>],
}

pub trait Interpreter {
    fn interpret(&self, request: &InterpretRequest<'_>) -> Result<String, CapabilityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_outcome_requires_non_blank_source() {
        assert_eq!(
            RepairOutcome::fixed("print(1)", "").usable_source(),
            Some("print(1)")
        );
        assert_eq!(RepairOutcome::fixed("  \n", "").usable_source(), None);
        let mut flagged = RepairOutcome::fixed("print(1)", "");
        flagged.ok = false;
        assert_eq!(flagged.usable_source(), None);
    }
}
