//! Human-readable run reports. Report failures are logged by the engine and never
//! fail a run.

use crate::engine::Run;
use crate::ledger::{AttemptDisposition, RoundLedger, RoundRecord};
use crate::shared::format_timestamp;
use crate::shared::fs_atomic::atomic_write_file;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("report io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub trait ReportSink {
    /// Called after every ledger append.
    fn append(&self, run: &Run, record: &RoundRecord) -> Result<(), ReportError>;
    /// Called once when a run ends (not when it pauses); returns the report location.
    fn finalize(&self, run: &Run, ledger: &RoundLedger) -> Result<PathBuf, ReportError>;
}

/// Writes `<run_id>-progress.md`, grown one section per attempt, and
/// `<run_id>-final.md` when the run ends.
#[derive(Debug, Clone)]
pub struct MarkdownReportSink {
    root: PathBuf,
}

impl MarkdownReportSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn progress_path(&self, run_id: &str) -> PathBuf {
        self.root.join(format!("{run_id}-progress.md"))
    }

    pub fn final_path(&self, run_id: &str) -> PathBuf {
        self.root.join(format!("{run_id}-final.md"))
    }
}

impl ReportSink for MarkdownReportSink {
    fn append(&self, run: &Run, record: &RoundRecord) -> Result<(), ReportError> {
        let path = self.progress_path(&run.run_id);
        fs::create_dir_all(&self.root).map_err(|e| io_error(&self.root, e))?;
        let mut body = String::new();
        if !path.exists() {
            body.push_str(&format!("# Analysis in progress: {}\n\n", run.run_id));
            body.push_str(&format!("- source: {}\n", run.source_ref));
            body.push_str(&format!("- started: {}\n\n", format_timestamp(run.started_at)));
            body.push_str("## Plan\n\n");
            body.push_str(&plan_section(run));
            body.push('\n');
        }
        body.push_str(&record_section(record));

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;
        file.write_all(body.as_bytes())
            .map_err(|e| io_error(&path, e))
    }

    fn finalize(&self, run: &Run, ledger: &RoundLedger) -> Result<PathBuf, ReportError> {
        let path = self.final_path(&run.run_id);
        let mut body = format!("# Analysis report: {}\n\n", run.run_id);
        body.push_str(&format!("- source: {}\n", run.source_ref));
        body.push_str(&format!("- status: {}\n", run.status));
        body.push_str(&format!("- started: {}\n", format_timestamp(run.started_at)));
        body.push_str(&format!("- finished: {}\n", format_timestamp(run.updated_at)));
        body.push_str(&format!("- rounds: {}\n\n", run.current_round));

        body.push_str("## Plan\n\n");
        body.push_str(&plan_section(run));
        body.push_str("\n## Dataset\n\n");
        body.push_str(&run.schema.describe());
        body.push_str("\n\n## Rounds\n\n");
        if ledger.is_empty() {
            body.push_str("No rounds were executed.\n\n");
        }
        for record in ledger.records() {
            body.push_str(&record_section(record));
        }
        body.push_str("## Process log\n\n");
        for entry in &run.progress_log {
            body.push_str(&format!("- {entry}\n"));
        }
        body.push_str("\n## Summary\n\n");
        body.push_str(&render_summary(run, ledger));
        body.push('\n');

        atomic_write_file(&path, body.as_bytes()).map_err(|e| io_error(&path, e))?;
        Ok(path)
    }
}

/// Plain-text account of what a run achieved.
pub fn render_summary(run: &Run, ledger: &RoundLedger) -> String {
    let failed_attempts = ledger
        .records()
        .iter()
        .filter(|record| !record.outcome.success)
        .count();
    let mut lines = vec![format!(
        "{} of {} planned tasks completed in {} rounds ({} attempts, {} failed).",
        run.completed_tasks.len(),
        run.plan.len(),
        run.current_round,
        ledger.len(),
        failed_attempts
    )];
    let skipped = ledger
        .records()
        .iter()
        .filter(|record| record.disposition == AttemptDisposition::Skipped)
        .map(|record| record.task.as_str())
        .collect::<Vec<_>>();
    if !skipped.is_empty() {
        lines.push(format!("Skipped: {}.", skipped.join("; ")));
    }
    if let Some(error) = &run.last_error {
        lines.push(format!("Last error: {error}"));
    }
    lines.join("\n")
}

fn plan_section(run: &Run) -> String {
    let mut text = String::new();
    for (index, task) in run.plan.iter().enumerate() {
        let mark = if run.completed_tasks.contains(task) {
            "x"
        } else {
            " "
        };
        text.push_str(&format!("{}. [{mark}] {task}\n", index + 1));
    }
    text
}

fn record_section(record: &RoundRecord) -> String {
    let mut text = format!(
        "### Round {} attempt {}: {}\n\n- result: {}\n- time: {}\n\n",
        record.round,
        record.attempt,
        record.task,
        record.disposition,
        format_timestamp(record.timestamp)
    );
    text.push_str(&format!("```\n{}\n```\n\n", record.source.trim_end()));
    if !record.outcome.output.trim().is_empty() {
        text.push_str(&format!(
            "Output:\n\n```\n{}\n```\n\n",
            record.outcome.output.trim_end()
        ));
    }
    if !record.outcome.success {
        text.push_str(&format!(
            "Error:\n\n```\n{}\n```\n\n",
            record.outcome.error.trim_end()
        ));
    }
    text
}

fn io_error(path: &Path, source: std::io::Error) -> ReportError {
    ReportError::Io {
        path: path.display().to_string(),
        source,
    }
}
