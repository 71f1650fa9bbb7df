use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Description of the data a run works against, handed to every capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaInfo {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub row_count: u64,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub types: BTreeMap<String, String>,
    #[serde(default)]
    pub sample_rows: Vec<Map<String, Value>>,
    #[serde(default)]
    pub null_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub numeric_columns: Vec<String>,
    /// Per-table breakdown for multi-table sources.
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub name: String,
    #[serde(default)]
    pub row_count: u64,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub types: BTreeMap<String, String>,
    #[serde(default)]
    pub sample_rows: Vec<Map<String, Value>>,
}

impl SchemaInfo {
    /// Short multi-line summary used in reports.
    pub fn describe(&self) -> String {
        let mut lines = Vec::new();
        if !self.source.is_empty() {
            lines.push(format!("- source: {}", self.source));
        }
        lines.push(format!("- rows: {}", self.row_count));
        lines.push(format!("- columns: {}", self.columns.len()));
        for column in &self.columns {
            let kind = self
                .types
                .get(column)
                .map(String::as_str)
                .unwrap_or("unknown");
            match self.null_counts.get(column) {
                Some(nulls) if *nulls > 0 => {
                    lines.push(format!("  - {column} ({kind}, {nulls} missing)"))
                }
                _ => lines.push(format!("  - {column} ({kind})")),
            }
        }
        for table in &self.tables {
            lines.push(format!(
                "- table {}: {} rows, {} columns",
                table.name,
                table.row_count,
                table.columns.len()
            ));
        }
        lines.join("\n")
    }
}
