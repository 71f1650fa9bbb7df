use crate::capabilities::{CommandCapability, Generator, Planner, Repairer, SchemaReader};
use crate::checkpoint::CheckpointHandle;
use crate::config::EngineSettings;
use crate::engine::{EngineError, RunOutcome, WorkflowEngine};
use crate::oracle::ContinuationOracle;
use crate::recovery::InterventionHook;
use crate::report::MarkdownReportSink;
use crate::sandbox::ProcessSandbox;
use crate::shared::fs_atomic::canonicalize_existing;
use std::path::Path;

/// Iterative dataset analysis: plan a handful of analysis tasks, then generate and
/// run a script per task with the dataset path injected.
pub struct AnalysisPipeline {
    settings: EngineSettings,
    sandbox: ProcessSandbox,
    schema_reader: Box<dyn SchemaReader>,
    planner: Box<dyn Planner>,
    generator: Box<dyn Generator>,
    repairer: Option<Box<dyn Repairer>>,
    oracle: Option<Box<dyn ContinuationOracle>>,
    intervention: Option<Box<dyn InterventionHook>>,
    report: Option<MarkdownReportSink>,
}

impl AnalysisPipeline {
    pub fn new(
        settings: EngineSettings,
        schema_reader: impl SchemaReader + 'static,
        planner: impl Planner + 'static,
        generator: impl Generator + 'static,
    ) -> Self {
        let sandbox = ProcessSandbox::from_settings(&settings.sandbox, settings.sandbox_work_dir());
        let report = settings
            .reports
            .enabled
            .then(|| MarkdownReportSink::new(settings.report_root()));
        Self {
            settings,
            sandbox,
            schema_reader: Box::new(schema_reader),
            planner: Box::new(planner),
            generator: Box::new(generator),
            repairer: None,
            oracle: None,
            intervention: None,
            report,
        }
    }

    /// Every capability served by one external command.
    pub fn from_command(settings: EngineSettings, capability: CommandCapability) -> Self {
        Self::new(
            settings,
            capability.clone(),
            capability.clone(),
            capability.clone(),
        )
        .with_repairer(capability.clone())
        .with_oracle(capability)
    }

    pub fn with_repairer(mut self, repairer: impl Repairer + 'static) -> Self {
        self.repairer = Some(Box::new(repairer));
        self
    }

    pub fn with_oracle(mut self, oracle: impl ContinuationOracle + 'static) -> Self {
        self.oracle = Some(Box::new(oracle));
        self
    }

    pub fn with_intervention(mut self, hook: impl InterventionHook + 'static) -> Self {
        self.intervention = Some(Box::new(hook));
        self
    }

    pub fn with_sandbox(mut self, sandbox: ProcessSandbox) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn engine(&self) -> WorkflowEngine<'_> {
        let mut engine = WorkflowEngine::new(
            self.settings.clone(),
            &self.sandbox,
            self.schema_reader.as_ref(),
            self.planner.as_ref(),
            self.generator.as_ref(),
        )
        .with_source_binding(self.settings.sandbox.dataset_binding.clone());
        if let Some(repairer) = &self.repairer {
            engine = engine.with_repairer(repairer.as_ref());
        }
        if let Some(oracle) = &self.oracle {
            engine = engine.with_oracle(oracle.as_ref());
        }
        if let Some(hook) = &self.intervention {
            engine = engine.with_intervention(hook.as_ref());
        }
        if let Some(report) = &self.report {
            engine = engine.with_report_sink(report);
        }
        engine
    }

    pub fn run(&self, dataset: &str) -> Result<RunOutcome, EngineError> {
        self.engine().start(&dataset_ref(dataset))
    }

    pub fn run_with_id(&self, run_id: &str, dataset: &str) -> Result<RunOutcome, EngineError> {
        self.engine().start_with_id(run_id, &dataset_ref(dataset))
    }

    pub fn resume(
        &self,
        handle: &CheckpointHandle,
        fixed_source: Option<&str>,
    ) -> Result<RunOutcome, EngineError> {
        self.engine().resume(handle, fixed_source)
    }
}

/// Scripts run inside the sandbox work dir, so a dataset that exists relative to
/// the caller is bound by its absolute path. Anything else passes through as given.
fn dataset_ref(dataset: &str) -> String {
    match canonicalize_existing(Path::new(dataset)) {
        Ok(path) => path.display().to_string(),
        Err(_) => dataset.to_string(),
    }
}
