//! The workflow state machine.
//!
//! `Read-Schema -> Plan -> {Generate -> [Validate] -> Execute -> (Recover) -> Record
//! -> Continue?}* -> Summarize`, driven synchronously by [`WorkflowEngine`]. Every
//! run ends in exactly one [`RunOutcome`].

pub mod error;
pub mod run;
pub mod step;

pub use error::EngineError;
pub use run::{Run, RunStatus};
pub use step::{Step, Termination};

use crate::capabilities::response::extract_code_block;
use crate::capabilities::{
    Generator, Planner, RepairRequest, Repairer, SafetyValidator, SchemaReader,
};
use crate::checkpoint::{CheckpointHandle, CheckpointStore};
use crate::config::EngineSettings;
use crate::ledger::{AttemptDisposition, RoundLedger, RoundRecord};
use crate::oracle::{fallback_decision, ContinuationContext, ContinuationOracle};
use crate::recovery::{
    FailureContext, InterventionHook, RecoveryDecision, RecoveryPolicy, RecoveryState,
};
use crate::report::{render_summary, ReportSink};
use crate::sandbox::{Bindings, ExecutionOutcome, ExecutionSandbox};
use crate::shared::ids::{generate_run_id, validate_identifier_value};
use crate::shared::logging::append_engine_log;
use crate::shared::now_secs;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug)]
pub enum RunOutcome {
    Succeeded {
        run: Run,
        ledger: RoundLedger,
        summary: String,
        report: Option<PathBuf>,
    },
    Paused {
        checkpoint: CheckpointHandle,
        run: Run,
        ledger: RoundLedger,
    },
    Failed {
        error: EngineError,
        run: Run,
        ledger: RoundLedger,
    },
}

impl RunOutcome {
    pub fn run(&self) -> &Run {
        match self {
            RunOutcome::Succeeded { run, .. }
            | RunOutcome::Paused { run, .. }
            | RunOutcome::Failed { run, .. } => run,
        }
    }

    pub fn ledger(&self) -> &RoundLedger {
        match self {
            RunOutcome::Succeeded { ledger, .. }
            | RunOutcome::Paused { ledger, .. }
            | RunOutcome::Failed { ledger, .. } => ledger,
        }
    }

    pub fn checkpoint(&self) -> Option<&CheckpointHandle> {
        match self {
            RunOutcome::Paused { checkpoint, .. } => Some(checkpoint),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            RunOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, RunOutcome::Succeeded { .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, RunOutcome::Paused { .. })
    }
}

/// Mutable state threaded through the steps of one invocation.
struct ActiveRun {
    run: Run,
    ledger: RoundLedger,
    recovery: RecoveryState,
}

pub struct WorkflowEngine<'a> {
    settings: EngineSettings,
    policy: RecoveryPolicy,
    checkpoints: CheckpointStore,
    sandbox: &'a dyn ExecutionSandbox,
    schema_reader: &'a dyn SchemaReader,
    planner: &'a dyn Planner,
    generator: &'a dyn Generator,
    repairer: Option<&'a dyn Repairer>,
    oracle: Option<&'a dyn ContinuationOracle>,
    validator: Option<&'a dyn SafetyValidator>,
    report: Option<&'a dyn ReportSink>,
    intervention: Option<&'a dyn InterventionHook>,
    bindings: Bindings,
    source_binding: Option<String>,
    extract_source: fn(&str) -> String,
}

impl<'a> WorkflowEngine<'a> {
    pub fn new(
        settings: EngineSettings,
        sandbox: &'a dyn ExecutionSandbox,
        schema_reader: &'a dyn SchemaReader,
        planner: &'a dyn Planner,
        generator: &'a dyn Generator,
    ) -> Self {
        Self {
            policy: RecoveryPolicy::from_settings(&settings.limits, &settings.recovery),
            checkpoints: CheckpointStore::new(settings.checkpoint_root()),
            settings,
            sandbox,
            schema_reader,
            planner,
            generator,
            repairer: None,
            oracle: None,
            validator: None,
            report: None,
            intervention: None,
            bindings: Bindings::new(),
            source_binding: None,
            extract_source: extract_code_block,
        }
    }

    pub fn with_repairer(mut self, repairer: &'a dyn Repairer) -> Self {
        self.repairer = Some(repairer);
        self
    }

    pub fn with_oracle(mut self, oracle: &'a dyn ContinuationOracle) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_safety_validator(mut self, validator: &'a dyn SafetyValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_report_sink(mut self, report: &'a dyn ReportSink) -> Self {
        self.report = Some(report);
        self
    }

    pub fn with_intervention(mut self, hook: &'a dyn InterventionHook) -> Self {
        self.intervention = Some(hook);
        self
    }

    pub fn with_bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    /// Injects the run's source reference into every execution under `name`.
    pub fn with_source_binding(mut self, name: impl Into<String>) -> Self {
        self.source_binding = Some(name.into());
        self
    }

    /// Replaces how generated and repaired text is turned into executable source.
    pub fn with_source_extractor(mut self, extract: fn(&str) -> String) -> Self {
        self.extract_source = extract;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn start(&self, source_ref: &str) -> Result<RunOutcome, EngineError> {
        let run_id = generate_run_id(now_secs()).map_err(EngineError::RunId)?;
        self.start_with_id(&run_id, source_ref)
    }

    pub fn start_with_id(&self, run_id: &str, source_ref: &str) -> Result<RunOutcome, EngineError> {
        validate_identifier_value("run id", run_id).map_err(EngineError::RunId)?;
        let mut active = ActiveRun {
            run: Run::new(run_id, source_ref, now_secs()),
            ledger: RoundLedger::new(),
            recovery: RecoveryState::default(),
        };
        self.note(&mut active.run, "start", format!("source={source_ref}"));
        Ok(self.drive(active, Step::ReadSchema))
    }

    /// Continues a paused run. With `fixed_source` the paused round gets one more
    /// attempt through the normal execute path; without it the round stays
    /// uncompleted and the run proceeds from the continue decision.
    pub fn resume(
        &self,
        handle: &CheckpointHandle,
        fixed_source: Option<&str>,
    ) -> Result<RunOutcome, EngineError> {
        let checkpoint = self.checkpoints.load(handle)?;
        let mut active = ActiveRun {
            run: checkpoint.run,
            ledger: checkpoint.ledger,
            recovery: checkpoint.recovery,
        };
        active.run.transition_to(RunStatus::Running, now_secs())?;
        active.run.should_continue = true;
        active.recovery.resume();

        let step = match fixed_source.map(str::trim).filter(|source| !source.is_empty()) {
            Some(source) => {
                self.note(
                    &mut active.run,
                    "resume",
                    format!("checkpoint={handle} fixed_source=true"),
                );
                self.gate(source.to_string())
            }
            None => {
                self.note(
                    &mut active.run,
                    "resume",
                    format!("checkpoint={handle} fixed_source=false"),
                );
                Step::Continue
            }
        };
        Ok(self.drive(active, step))
    }

    fn drive(&self, mut active: ActiveRun, mut step: Step) -> RunOutcome {
        loop {
            tracing::debug!(run_id = %active.run.run_id, step = step.name(), "workflow step");
            step = match step {
                Step::ReadSchema => self.read_schema(&mut active),
                Step::Plan => self.plan(&mut active),
                Step::Generate => self.generate(&mut active),
                Step::Validate { source } => self.validate(&mut active, source),
                Step::Execute { source } => self.execute(&mut active, source),
                Step::Recover { source, outcome } => self.recover(&mut active, source, outcome),
                Step::Record { source, outcome } => self.record(&mut active, source, outcome),
                Step::Continue => self.decide_continue(&mut active),
                Step::Summarize(termination) => return self.summarize(active, termination),
            };
        }
    }

    fn read_schema(&self, active: &mut ActiveRun) -> Step {
        match self.schema_reader.read(&active.run.source_ref) {
            Ok(schema) => {
                let detail = format!(
                    "rows={} columns={}",
                    schema.row_count,
                    schema.columns.len()
                );
                active.run.schema = schema;
                self.note(&mut active.run, "read_schema", detail);
                Step::Plan
            }
            Err(err) => Step::Summarize(Termination::Failed(EngineError::SchemaUnreadable {
                source_ref: active.run.source_ref.clone(),
                reason: err.to_string(),
            })),
        }
    }

    fn plan(&self, active: &mut ActiveRun) -> Step {
        let tasks = match self.planner.plan(&active.run.schema) {
            Ok(tasks) => tasks,
            Err(err) => {
                return Step::Summarize(Termination::Failed(EngineError::PlanFailed {
                    reason: err.to_string(),
                }))
            }
        };
        let plan = tasks
            .iter()
            .map(|task| task.trim())
            .filter(|task| !task.is_empty())
            .take(self.settings.limits.max_plan_tasks)
            .map(str::to_string)
            .collect::<Vec<_>>();
        if plan.is_empty() {
            return Step::Summarize(Termination::Failed(EngineError::PlanFailed {
                reason: "planner returned no tasks".to_string(),
            }));
        }
        active.run.plan = plan;
        let detail = format!("tasks={}", active.run.plan.len());
        self.note(&mut active.run, "plan", detail);
        Step::Generate
    }

    fn generate(&self, active: &mut ActiveRun) -> Step {
        if let Some(step) = self.stop_before_round(&active.run) {
            return step;
        }
        let run = &mut active.run;
        run.current_round += 1;
        active.recovery.reset_for_round();
        let round = run.current_round;
        let Some(task) = run.current_task().map(str::to_string) else {
            return Step::Summarize(Termination::Completed {
                reason: "all planned tasks attempted".to_string(),
            });
        };

        let raw = match self
            .generator
            .generate(&task, &run.schema, &run.completed_tasks)
        {
            Ok(raw) => raw,
            Err(err) => {
                return Step::Summarize(Termination::Failed(EngineError::GenerationFailed {
                    round,
                    task,
                    reason: err.to_string(),
                }))
            }
        };
        let source = (self.extract_source)(&raw);
        if source.trim().is_empty() {
            return Step::Summarize(Termination::Failed(EngineError::GenerationFailed {
                round,
                task,
                reason: "generator returned empty source".to_string(),
            }));
        }
        self.note(run, "generate", format!("round={round} task={task:?}"));
        self.gate(source)
    }

    /// Routes source to validation when a validator is configured.
    fn gate(&self, source: String) -> Step {
        if self.validator.is_some() {
            Step::Validate { source }
        } else {
            Step::Execute { source }
        }
    }

    fn validate(&self, active: &mut ActiveRun, source: String) -> Step {
        let Some(validator) = self.validator else {
            return Step::Execute { source };
        };
        let verdict = validator.validate(&source);
        let round = active.run.current_round;
        if verdict.is_safe {
            self.note(&mut active.run, "validate", format!("round={round} safe=true"));
            Step::Execute { source }
        } else {
            Step::Summarize(Termination::Failed(EngineError::ValidationRejected {
                round,
                reason: verdict.reason,
            }))
        }
    }

    fn execute(&self, active: &mut ActiveRun, source: String) -> Step {
        let timeout = self.settings.limits.execution_timeout();
        let mut bindings = self.bindings.clone();
        if let Some(name) = &self.source_binding {
            bindings.insert(name.clone(), Value::from(active.run.source_ref.clone()));
        }
        let outcome = self
            .sandbox
            .execute(&source, &bindings, timeout)
            .unwrap_or_else(|err| {
                tracing::warn!(run_id = %active.run.run_id, error = %err, "sandbox setup failed");
                err.into_outcome()
            });
        active.run.current_source = Some(source.clone());
        let round = active.run.current_round;
        let attempt = active.ledger.next_attempt(round);
        self.note(
            &mut active.run,
            "execute",
            format!(
                "round={round} attempt={attempt} success={}",
                outcome.success
            ),
        );
        if outcome.success {
            Step::Record { source, outcome }
        } else {
            Step::Recover { source, outcome }
        }
    }

    fn recover(&self, active: &mut ActiveRun, source: String, outcome: ExecutionOutcome) -> Step {
        let round = active.run.current_round;
        let attempt = active.ledger.next_attempt(round);
        let task = active.run.current_task().unwrap_or_default().to_string();
        active.run.last_error = Some(
            EngineError::ExecutionFailed {
                round,
                attempt,
                reason: outcome.error.lines().next().unwrap_or_default().to_string(),
            }
            .to_string(),
        );

        let requested = self.intervention.and_then(|hook| {
            hook.on_failure(&FailureContext {
                run_id: &active.run.run_id,
                round,
                attempt,
                task: &task,
                source: &source,
                outcome: &outcome,
                retry_count: active.recovery.retry_count,
            })
        });
        let request = RepairRequest {
            original_source: &source,
            error_text: &outcome.error,
            task: &task,
            schema: &active.run.schema,
        };
        let decision = self.policy.recover(
            &mut active.recovery,
            requested,
            &request,
            &outcome,
            self.repairer,
            self.extract_source,
        );

        let disposition = match &decision {
            RecoveryDecision::Retry { .. } => AttemptDisposition::Retried,
            RecoveryDecision::Skip { .. } => AttemptDisposition::Skipped,
            RecoveryDecision::Pause => AttemptDisposition::Paused,
        };
        if let Err(err) = self.append_record(active, &task, source, outcome, disposition) {
            return Step::Summarize(Termination::Failed(err));
        }

        match decision {
            RecoveryDecision::Retry {
                source,
                explanation,
            } => {
                let retry_count = active.recovery.retry_count;
                self.note(
                    &mut active.run,
                    "recover",
                    format!(
                        "round={round} mode=auto_fix retry={retry_count} explanation={explanation:?}"
                    ),
                );
                self.gate(source)
            }
            RecoveryDecision::Skip { reason } => {
                active.run.current_source = None;
                active.run.last_error = None;
                self.note(
                    &mut active.run,
                    "recover",
                    format!("round={round} mode=skip reason={reason:?}"),
                );
                Step::Continue
            }
            RecoveryDecision::Pause => {
                let now = now_secs();
                if let Err(err) = active.run.transition_to(RunStatus::Paused, now) {
                    return Step::Summarize(Termination::Failed(err));
                }
                match self
                    .checkpoints
                    .save(&active.run, &active.ledger, &active.recovery, now)
                {
                    Ok(checkpoint) => {
                        self.note(
                            &mut active.run,
                            "recover",
                            format!("round={round} mode=manual_fix checkpoint={checkpoint}"),
                        );
                        Step::Summarize(Termination::Paused { checkpoint })
                    }
                    Err(err) => Step::Summarize(Termination::Failed(err.into())),
                }
            }
        }
    }

    fn record(&self, active: &mut ActiveRun, source: String, outcome: ExecutionOutcome) -> Step {
        let round = active.run.current_round;
        let task = active.run.current_task().unwrap_or_default().to_string();
        if let Err(err) =
            self.append_record(active, &task, source, outcome, AttemptDisposition::Succeeded)
        {
            return Step::Summarize(Termination::Failed(err));
        }
        active.run.mark_completed(&task);
        active.run.current_source = None;
        active.run.last_error = None;
        active.recovery.reset_for_round();
        self.note(&mut active.run, "record", format!("round={round} completed={task:?}"));
        Step::Continue
    }

    fn decide_continue(&self, active: &mut ActiveRun) -> Step {
        if let Some(step) = self.stop_before_round(&active.run) {
            return step;
        }
        let run = &mut active.run;
        let context = ContinuationContext::new(
            &run.plan,
            &run.completed_tasks,
            &active.ledger,
            run.current_round,
            &self.settings.oracle,
        );
        let decision = match self.oracle {
            Some(oracle) => oracle.decide(&context).unwrap_or_else(|err| {
                tracing::warn!(run_id = %run.run_id, error = %err, "continuation oracle failed; using fallback");
                fallback_decision(&context)
            }),
            None => fallback_decision(&context),
        };
        let detail = format!(
            "round={} continue={} reason={:?}",
            run.current_round, decision.should_continue, decision.reason
        );
        self.note(run, "continue", detail);
        if decision.should_continue {
            Step::Generate
        } else {
            run.should_continue = false;
            Step::Summarize(Termination::Completed {
                reason: decision.reason,
            })
        }
    }

    /// Round cap and plan exhaustion end a run before any oracle is consulted.
    fn stop_before_round(&self, run: &Run) -> Option<Step> {
        if run.current_round >= self.settings.limits.max_rounds {
            return Some(Step::Summarize(Termination::Completed {
                reason: format!(
                    "round cap of {} reached",
                    self.settings.limits.max_rounds
                ),
            }));
        }
        if run.plan_exhausted() {
            return Some(Step::Summarize(Termination::Completed {
                reason: "all planned tasks attempted".to_string(),
            }));
        }
        None
    }

    fn summarize(&self, mut active: ActiveRun, termination: Termination) -> RunOutcome {
        let now = now_secs();
        let error = match termination {
            Termination::Paused { checkpoint } => {
                tracing::info!(run_id = %active.run.run_id, %checkpoint, "run paused for manual fix");
                return RunOutcome::Paused {
                    checkpoint,
                    run: active.run,
                    ledger: active.ledger,
                };
            }
            Termination::Completed { reason } => {
                match active.run.transition_to(RunStatus::Succeeded, now) {
                    Ok(()) => {
                        self.note(
                            &mut active.run,
                            "summarize",
                            format!("status=succeeded reason={reason:?}"),
                        );
                        let report = self.finalize_report(&active);
                        return RunOutcome::Succeeded {
                            summary: render_summary(&active.run, &active.ledger),
                            report,
                            run: active.run,
                            ledger: active.ledger,
                        };
                    }
                    Err(err) => err,
                }
            }
            Termination::Failed(error) => error,
        };

        active.run.last_error = Some(error.to_string());
        if let Err(err) = active.run.transition_to(RunStatus::Failed, now) {
            tracing::warn!(run_id = %active.run.run_id, error = %err, "run already terminal");
        }
        self.note(
            &mut active.run,
            "summarize",
            format!("status=failed kind={} error={:?}", error.kind(), error.to_string()),
        );
        self.finalize_report(&active);
        RunOutcome::Failed {
            error,
            run: active.run,
            ledger: active.ledger,
        }
    }

    fn append_record(
        &self,
        active: &mut ActiveRun,
        task: &str,
        source: String,
        outcome: ExecutionOutcome,
        disposition: AttemptDisposition,
    ) -> Result<(), EngineError> {
        let round = active.run.current_round;
        let record = RoundRecord {
            round,
            attempt: active.ledger.next_attempt(round),
            task: task.to_string(),
            source,
            outcome,
            timestamp: now_secs(),
            disposition,
        };
        if let Some(report) = self.report {
            if let Err(err) = report.append(&active.run, &record) {
                tracing::warn!(run_id = %active.run.run_id, error = %err, "progress report append failed");
            }
        }
        active.ledger.append(record)?;
        Ok(())
    }

    fn finalize_report(&self, active: &ActiveRun) -> Option<PathBuf> {
        let report = self.report?;
        match report.finalize(&active.run, &active.ledger) {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::warn!(run_id = %active.run.run_id, error = %err, "final report failed");
                None
            }
        }
    }

    /// Progress log entry, tracing event and engine log line for one step.
    fn note(&self, run: &mut Run, step: &'static str, detail: impl Into<String>) {
        let detail = detail.into();
        let now = now_secs();
        run.updated_at = now;
        tracing::info!(run_id = %run.run_id, step, "{detail}");
        append_engine_log(
            &self.settings.state_root,
            now,
            &run.run_id,
            &format!("step={step} {detail}"),
        );
        run.log(format!("{step}: {detail}"));
    }
}
