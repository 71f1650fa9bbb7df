use autoanalyst::capabilities::{
    CapabilityError, FixedPlanner, Generator, RepairOutcome, RepairRequest, Repairer,
    SafetyValidator, SchemaInfo, SchemaReader, ValidationVerdict,
};
use autoanalyst::checkpoint::CheckpointHandle;
use autoanalyst::config::EngineSettings;
use autoanalyst::engine::{EngineError, RunOutcome, RunStatus, WorkflowEngine};
use autoanalyst::ledger::AttemptDisposition;
use autoanalyst::oracle::{ContinuationContext, ContinuationOracle, Decision};
use autoanalyst::recovery::{FailureContext, InterventionHook, PauseOnFailure, RecoveryMode};
use autoanalyst::report::MarkdownReportSink;
use autoanalyst::sandbox::{Bindings, ExecutionOutcome, ExecutionSandbox, SandboxError};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

struct FnSandbox<F> {
    run: F,
    executed: RefCell<Vec<String>>,
}

impl<F: Fn(&str) -> ExecutionOutcome> ExecutionSandbox for FnSandbox<F> {
    fn execute(
        &self,
        source: &str,
        _bindings: &Bindings,
        _timeout: Duration,
    ) -> Result<ExecutionOutcome, SandboxError> {
        self.executed.borrow_mut().push(source.to_string());
        Ok((self.run)(source))
    }
}

fn sandbox<F: Fn(&str) -> ExecutionOutcome>(run: F) -> FnSandbox<F> {
    FnSandbox {
        run,
        executed: RefCell::new(Vec::new()),
    }
}

/// Fails every source containing `broken`.
fn fails_when_broken(source: &str) -> ExecutionOutcome {
    if source.contains("broken") {
        ExecutionOutcome::raised("NameError", "name 'broken' is not defined", "partial\n")
    } else {
        ExecutionOutcome::succeeded(format!("ran {source}\n"))
    }
}

struct StubSchema(Option<SchemaInfo>);

impl SchemaReader for StubSchema {
    fn read(&self, source_ref: &str) -> Result<SchemaInfo, CapabilityError> {
        self.0
            .clone()
            .ok_or_else(|| CapabilityError::Unavailable(format!("cannot open {source_ref}")))
    }
}

fn schema() -> StubSchema {
    StubSchema(Some(SchemaInfo {
        source: "sales.csv".to_string(),
        row_count: 3,
        columns: vec!["region".to_string(), "amount".to_string()],
        ..SchemaInfo::default()
    }))
}

/// Produces `run:<task>` in a python fence unless a task has an override.
struct TaskGenerator {
    overrides: BTreeMap<String, Result<String, CapabilityError>>,
    seen_completed: RefCell<Vec<Vec<String>>>,
}

impl TaskGenerator {
    fn new() -> Self {
        Self {
            overrides: BTreeMap::new(),
            seen_completed: RefCell::new(Vec::new()),
        }
    }

    fn with(mut self, task: &str, result: Result<&str, CapabilityError>) -> Self {
        self.overrides
            .insert(task.to_string(), result.map(str::to_string));
        self
    }
}

impl Generator for TaskGenerator {
    fn generate(
        &self,
        task: &str,
        _schema: &SchemaInfo,
        completed_tasks: &[String],
    ) -> Result<String, CapabilityError> {
        self.seen_completed
            .borrow_mut()
            .push(completed_tasks.to_vec());
        match self.overrides.get(task) {
            Some(result) => result.clone(),
            None => Ok(format!("```python\nrun:{task}\n```")),
        }
    }
}

struct StubRepairer {
    calls: Cell<u32>,
    fix: Option<String>,
}

impl StubRepairer {
    fn fixing(source: &str) -> Self {
        Self {
            calls: Cell::new(0),
            fix: Some(source.to_string()),
        }
    }

    fn unusable() -> Self {
        Self {
            calls: Cell::new(0),
            fix: None,
        }
    }
}

impl Repairer for StubRepairer {
    fn repair(&self, request: &RepairRequest<'_>) -> Result<RepairOutcome, CapabilityError> {
        self.calls.set(self.calls.get() + 1);
        assert!(!request.error_text.is_empty());
        Ok(match &self.fix {
            Some(source) => RepairOutcome::fixed(source.clone(), "patched"),
            None => RepairOutcome::unusable("no idea"),
        })
    }
}

struct StubOracle {
    calls: Cell<u32>,
    answer: Result<bool, CapabilityError>,
}

impl StubOracle {
    fn answering(answer: Result<bool, CapabilityError>) -> Self {
        Self {
            calls: Cell::new(0),
            answer,
        }
    }
}

impl ContinuationOracle for StubOracle {
    fn decide(&self, _context: &ContinuationContext) -> Result<Decision, CapabilityError> {
        self.calls.set(self.calls.get() + 1);
        self.answer.clone().map(|should_continue| Decision {
            should_continue,
            reason: "stub".to_string(),
        })
    }
}

fn settings(root: &std::path::Path) -> EngineSettings {
    EngineSettings {
        state_root: root.to_path_buf(),
        ..EngineSettings::default()
    }
}

fn dispositions(outcome: &RunOutcome) -> Vec<(u32, u32, AttemptDisposition)> {
    outcome
        .ledger()
        .records()
        .iter()
        .map(|record| (record.round, record.attempt, record.disposition))
        .collect()
}

#[test]
fn engine_module_single_task_succeeds() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["basic stats"]);
    let generator = TaskGenerator::new();
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    );

    let outcome = engine.start("sales.csv").expect("start");
    assert!(outcome.is_succeeded());
    let run = outcome.run();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.completed_tasks, vec!["basic stats".to_string()]);
    assert_eq!(run.current_round, 1);
    assert_eq!(outcome.ledger().len(), 1);
    let record = &outcome.ledger().records()[0];
    assert_eq!(record.source, "run:basic stats");
    assert!(record.outcome.success);
    assert_eq!(*sandbox.executed.borrow(), vec!["run:basic stats".to_string()]);

    let log = fs::read_to_string(temp.path().join("logs/engine.log")).expect("engine log");
    assert!(log.contains(&format!("run_id={} step=start", run.run_id)));
    assert!(log.contains("step=summarize status=succeeded"));
}

#[test]
fn engine_module_unusable_repair_skips_round() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["basic stats"]);
    let generator = TaskGenerator::new().with("basic stats", Ok("broken"));
    let repairer = StubRepairer::unusable();
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_repairer(&repairer);

    let outcome = engine.start_with_id("run-skip", "sales.csv").expect("start");
    assert!(outcome.is_succeeded());
    assert_eq!(repairer.calls.get(), 1);
    assert_eq!(
        dispositions(&outcome),
        vec![(1, 1, AttemptDisposition::Skipped)]
    );
    assert!(outcome.run().completed_tasks.is_empty());
    let record = &outcome.ledger().records()[0];
    assert_eq!(record.outcome.output, "partial\n");
    assert!(record.outcome.error.starts_with("NameError"));
}

#[test]
fn engine_module_fix_with_empty_fence_is_unusable() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["basic stats"]);
    let generator = TaskGenerator::new().with("basic stats", Ok("broken"));
    let repairer = StubRepairer::fixing("```python\n```");
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_repairer(&repairer);

    let outcome = engine.start_with_id("run-empty-fix", "sales.csv").expect("start");
    assert!(outcome.is_succeeded());
    assert_eq!(repairer.calls.get(), 1);
    assert_eq!(*sandbox.executed.borrow(), vec!["broken".to_string()]);
    assert_eq!(
        dispositions(&outcome),
        vec![(1, 1, AttemptDisposition::Skipped)]
    );
}

#[test]
fn engine_module_skipped_final_round_leaves_no_stale_error() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["basic stats", "trend"]);
    let generator = TaskGenerator::new().with("trend", Ok("broken"));
    let repairer = StubRepairer::unusable();
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_repairer(&repairer);

    let outcome = engine.start_with_id("run-stale", "sales.csv").expect("start");
    assert!(outcome.is_succeeded());
    assert_eq!(outcome.run().completed_tasks, vec!["basic stats".to_string()]);
    assert_eq!(
        dispositions(&outcome),
        vec![
            (1, 1, AttemptDisposition::Succeeded),
            (2, 1, AttemptDisposition::Skipped)
        ]
    );
    assert_eq!(outcome.run().last_error, None);
}

#[test]
fn engine_module_repairs_at_most_max_retries_per_round() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["basic stats", "trend"]);
    let generator = TaskGenerator::new().with("basic stats", Ok("broken"));
    let repairer = StubRepairer::fixing("still broken");
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_repairer(&repairer);

    let outcome = engine.start_with_id("run-retry", "sales.csv").expect("start");
    assert!(outcome.is_succeeded());
    assert_eq!(repairer.calls.get(), 3);
    assert_eq!(
        dispositions(&outcome),
        vec![
            (1, 1, AttemptDisposition::Retried),
            (1, 2, AttemptDisposition::Retried),
            (1, 3, AttemptDisposition::Retried),
            (1, 4, AttemptDisposition::Skipped),
            (2, 1, AttemptDisposition::Succeeded),
        ]
    );
    assert_eq!(sandbox.executed.borrow().len(), 5);
    assert_eq!(outcome.run().completed_tasks, vec!["trend".to_string()]);
}

#[test]
fn engine_module_repaired_source_completes_round() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["basic stats"]);
    let generator = TaskGenerator::new().with("basic stats", Ok("broken"));
    let repairer = StubRepairer::fixing("```python\nprint('fixed')\n```");
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_repairer(&repairer);

    let outcome = engine.start("sales.csv").expect("start");
    assert_eq!(
        dispositions(&outcome),
        vec![
            (1, 1, AttemptDisposition::Retried),
            (1, 2, AttemptDisposition::Succeeded),
        ]
    );
    assert_eq!(outcome.ledger().records()[1].source, "print('fixed')");
    assert_eq!(outcome.run().completed_tasks, vec!["basic stats".to_string()]);
}

#[test]
fn engine_module_timeouts_skip_without_repair() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(|_: &str| ExecutionOutcome::timed_out(Duration::from_secs(30), ""));
    let schema = schema();
    let planner = FixedPlanner::new(["basic stats"]);
    let generator = TaskGenerator::new();
    let repairer = StubRepairer::fixing("print(1)");
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_repairer(&repairer);

    let outcome = engine.start("sales.csv").expect("start");
    assert_eq!(repairer.calls.get(), 0);
    assert_eq!(
        dispositions(&outcome),
        vec![(1, 1, AttemptDisposition::Skipped)]
    );
    assert!(outcome.ledger().records()[0].outcome.is_timeout());
}

#[test]
fn engine_module_manual_fix_pauses_and_resumes() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["basic stats", "trend"]);
    let generator = TaskGenerator::new().with("basic stats", Ok("broken"));
    let repairer = StubRepairer::fixing("print(1)");
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_repairer(&repairer)
    .with_intervention(&PauseOnFailure);

    let paused = engine.start_with_id("run-c", "sales.csv").expect("start");
    let handle = paused.checkpoint().expect("checkpoint").clone();
    assert_eq!(handle.as_str(), "run-c-r1");
    assert_eq!(paused.run().status, RunStatus::Paused);
    assert!(!paused.run().should_continue);
    assert_eq!(repairer.calls.get(), 0);
    assert_eq!(dispositions(&paused), vec![(1, 1, AttemptDisposition::Paused)]);
    assert_eq!(
        engine.checkpoints().list("run-c").expect("list"),
        vec![handle.clone()]
    );

    let resumed = engine
        .resume(&handle, Some("print('manual fix')"))
        .expect("resume");
    assert!(resumed.is_succeeded());
    assert_eq!(
        dispositions(&resumed),
        vec![
            (1, 1, AttemptDisposition::Paused),
            (1, 2, AttemptDisposition::Succeeded),
            (2, 1, AttemptDisposition::Succeeded),
        ]
    );
    let round_one_successes = resumed
        .ledger()
        .round(1)
        .filter(|record| record.outcome.success)
        .count();
    assert_eq!(round_one_successes, 1);
    assert_eq!(
        resumed.run().completed_tasks,
        vec!["basic stats".to_string(), "trend".to_string()]
    );
    assert_eq!(
        *sandbox.executed.borrow(),
        vec![
            "broken".to_string(),
            "print('manual fix')".to_string(),
            "run:trend".to_string(),
        ]
    );
}

#[test]
fn engine_module_resume_without_fix_leaves_round_uncompleted() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["basic stats", "trend"]);
    let generator = TaskGenerator::new().with("basic stats", Ok("broken"));
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_intervention(&PauseOnFailure);

    let paused = engine.start_with_id("run-nofix", "sales.csv").expect("start");
    let handle = paused.checkpoint().expect("checkpoint").clone();
    let resumed = engine.resume(&handle, None).expect("resume");
    assert!(resumed.is_succeeded());
    assert_eq!(
        dispositions(&resumed),
        vec![
            (1, 1, AttemptDisposition::Paused),
            (2, 1, AttemptDisposition::Succeeded),
        ]
    );
    assert_eq!(resumed.run().completed_tasks, vec!["trend".to_string()]);
}

/// Pauses only on the second attempt of a round.
struct PauseOnSecondAttempt;

impl InterventionHook for PauseOnSecondAttempt {
    fn on_failure(&self, context: &FailureContext<'_>) -> Option<RecoveryMode> {
        (context.attempt == 2).then_some(RecoveryMode::ManualFix)
    }
}

#[test]
fn engine_module_resume_keeps_round_retry_budget() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["basic stats"]);
    let generator = TaskGenerator::new().with("basic stats", Ok("broken"));
    let repairer = StubRepairer::fixing("broken again");
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_repairer(&repairer)
    .with_intervention(&PauseOnSecondAttempt);

    let paused = engine.start_with_id("run-budget", "sales.csv").expect("start");
    let handle = paused.checkpoint().expect("checkpoint").clone();
    assert_eq!(repairer.calls.get(), 1);

    let resumed = engine
        .resume(&handle, Some("manual but broken"))
        .expect("resume");
    assert_eq!(repairer.calls.get(), 3);
    assert_eq!(
        dispositions(&resumed),
        vec![
            (1, 1, AttemptDisposition::Retried),
            (1, 2, AttemptDisposition::Paused),
            (1, 3, AttemptDisposition::Retried),
            (1, 4, AttemptDisposition::Retried),
            (1, 5, AttemptDisposition::Skipped),
        ]
    );
    assert!(resumed.run().completed_tasks.is_empty());
}

#[test]
fn engine_module_plan_exhaustion_wins_over_oracle() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["basic stats", "trend"]);
    let generator = TaskGenerator::new();
    let oracle = StubOracle::answering(Ok(true));
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_oracle(&oracle);

    let outcome = engine.start("sales.csv").expect("start");
    assert!(outcome.is_succeeded());
    assert_eq!(outcome.run().current_round, 2);
    assert_eq!(oracle.calls.get(), 1);
}

#[test]
fn engine_module_unavailable_oracle_falls_back_to_plan_length() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["a", "b", "c"]);
    let generator = TaskGenerator::new();
    let oracle = StubOracle::answering(Err(CapabilityError::Unavailable("offline".into())));
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_oracle(&oracle);

    let outcome = engine.start("sales.csv").expect("start");
    assert!(outcome.is_succeeded());
    assert_eq!(outcome.run().current_round, 3);
    assert_eq!(outcome.ledger().len(), 3);
    assert_eq!(oracle.calls.get(), 2);
}

#[test]
fn engine_module_oracle_stop_ends_run_early() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["a", "b", "c"]);
    let generator = TaskGenerator::new();
    let oracle = StubOracle::answering(Ok(false));
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_oracle(&oracle);

    let outcome = engine.start("sales.csv").expect("start");
    assert!(outcome.is_succeeded());
    assert_eq!(outcome.run().current_round, 1);
    assert!(!outcome.run().should_continue);
}

#[test]
fn engine_module_round_cap_limits_long_plans() {
    let temp = tempdir().expect("tempdir");
    let mut settings = settings(temp.path());
    settings.limits.max_rounds = 2;
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["a", "b", "c", "d"]);
    let generator = TaskGenerator::new();
    let oracle = StubOracle::answering(Ok(true));
    let engine = WorkflowEngine::new(settings, &sandbox, &schema, &planner, &generator)
        .with_oracle(&oracle);

    let outcome = engine.start("sales.csv").expect("start");
    assert!(outcome.is_succeeded());
    assert_eq!(outcome.run().current_round, 2);
    assert_eq!(oracle.calls.get(), 1);
    assert!(outcome
        .run()
        .progress_log
        .iter()
        .any(|entry| entry.contains("round cap of 2 reached")));
}

#[test]
fn engine_module_plan_is_trimmed_and_capped() {
    let temp = tempdir().expect("tempdir");
    let mut settings = settings(temp.path());
    settings.limits.max_plan_tasks = 2;
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["  a  ", "", "b", "c"]);
    let generator = TaskGenerator::new();
    let engine = WorkflowEngine::new(settings, &sandbox, &schema, &planner, &generator);

    let outcome = engine.start("sales.csv").expect("start");
    assert_eq!(outcome.run().plan, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(
        *generator.seen_completed.borrow(),
        vec![Vec::<String>::new(), vec!["a".to_string()]]
    );
}

#[test]
fn engine_module_unreadable_schema_is_terminal() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = StubSchema(None);
    let planner = FixedPlanner::new(["a"]);
    let generator = TaskGenerator::new();
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    );

    let outcome = engine.start("missing.csv").expect("start");
    assert!(matches!(
        outcome.error(),
        Some(EngineError::SchemaUnreadable { source_ref, .. }) if source_ref == "missing.csv"
    ));
    assert_eq!(outcome.run().status, RunStatus::Failed);
    assert!(outcome.ledger().is_empty());
    assert!(sandbox.executed.borrow().is_empty());
}

#[test]
fn engine_module_empty_plan_fails() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["   "]);
    let generator = TaskGenerator::new();
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    );

    let outcome = engine.start("sales.csv").expect("start");
    assert!(matches!(outcome.error(), Some(EngineError::PlanFailed { .. })));
}

#[test]
fn engine_module_generation_failures_are_terminal() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["a", "b"]);
    let generator = TaskGenerator::new().with("b", Err(CapabilityError::Failed("quota".into())));
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    );

    let outcome = engine.start("sales.csv").expect("start");
    assert!(matches!(
        outcome.error(),
        Some(EngineError::GenerationFailed { round: 2, task, .. }) if task == "b"
    ));
    assert_eq!(outcome.ledger().len(), 1);
    assert_eq!(outcome.run().completed_tasks, vec!["a".to_string()]);

    let empty = TaskGenerator::new().with("a", Ok("```python\n\n```"));
    let engine = WorkflowEngine::new(settings(temp.path()), &sandbox, &schema, &planner, &empty);
    let outcome = engine.start("sales.csv").expect("start");
    assert!(matches!(
        outcome.error(),
        Some(EngineError::GenerationFailed { round: 1, .. })
    ));
}

struct RejectAll;

impl SafetyValidator for RejectAll {
    fn validate(&self, _query: &str) -> ValidationVerdict {
        ValidationVerdict::rejected("not allowed")
    }
}

#[test]
fn engine_module_validation_rejection_skips_execution() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["a"]);
    let generator = TaskGenerator::new();
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_safety_validator(&RejectAll);

    let outcome = engine.start("sales.csv").expect("start");
    assert!(matches!(
        outcome.error(),
        Some(EngineError::ValidationRejected { round: 1, reason }) if reason == "not allowed"
    ));
    assert!(sandbox.executed.borrow().is_empty());
    assert!(outcome.ledger().is_empty());
}

#[test]
fn engine_module_resume_reports_missing_and_corrupt_checkpoints() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["basic stats"]);
    let generator = TaskGenerator::new().with("basic stats", Ok("broken"));
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_intervention(&PauseOnFailure);

    let missing = engine
        .resume(&CheckpointHandle::from("run-none-r1"), None)
        .expect_err("missing");
    assert!(matches!(missing, EngineError::CheckpointNotFound { .. }));

    let paused = engine.start_with_id("run-bad", "sales.csv").expect("start");
    let handle = paused.checkpoint().expect("checkpoint").clone();
    let path = engine.checkpoints().path_for(&handle);
    let raw = fs::read_to_string(&path).expect("read checkpoint");
    fs::write(&path, raw.replace("sales.csv", "other.csv")).expect("tamper");

    let corrupt = engine.resume(&handle, None).expect_err("corrupt");
    assert!(matches!(corrupt, EngineError::CheckpointCorrupt { .. }));
}

#[test]
fn engine_module_writes_reports() {
    let temp = tempdir().expect("tempdir");
    let sandbox = sandbox(fails_when_broken);
    let schema = schema();
    let planner = FixedPlanner::new(["basic stats"]);
    let generator = TaskGenerator::new();
    let report = MarkdownReportSink::new(temp.path().join("reports"));
    let engine = WorkflowEngine::new(
        settings(temp.path()),
        &sandbox,
        &schema,
        &planner,
        &generator,
    )
    .with_report_sink(&report);

    let outcome = engine.start_with_id("run-report", "sales.csv").expect("start");
    let RunOutcome::Succeeded {
        report: Some(path),
        summary,
        ..
    } = outcome
    else {
        panic!("expected a finalized report");
    };
    assert_eq!(path, report.final_path("run-report"));
    assert_eq!(
        summary,
        "1 of 1 planned tasks completed in 1 rounds (1 attempts, 0 failed)."
    );
    let body = fs::read_to_string(path).expect("final report");
    assert!(body.contains("1. [x] basic stats"));
    assert!(body.contains("## Summary"));
    let progress = fs::read_to_string(report.progress_path("run-report")).expect("progress");
    assert!(progress.contains("### Round 1 attempt 1: basic stats"));
}
