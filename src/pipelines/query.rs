use crate::capabilities::response::extract_sql;
use crate::capabilities::{
    CapabilityError, CommandCapability, FixedPlanner, Generator, InterpretRequest, Interpreter,
    KeywordSafetyValidator, Repairer, SchemaInfo, SqliteSchemaReader,
};
use crate::config::EngineSettings;
use crate::engine::{EngineError, RunOutcome, WorkflowEngine};
use crate::report::MarkdownReportSink;
use crate::sandbox::{Bindings, SqliteQuerySandbox};
use std::path::{Path, PathBuf};

/// Natural-language question to SQL over one SQLite database. Each question is its
/// own single-round run with the safety gate in front of execution.
pub struct QueryPipeline {
    settings: EngineSettings,
    db_path: PathBuf,
    schema_reader: SqliteSchemaReader,
    sandbox: SqliteQuerySandbox,
    validator: KeywordSafetyValidator,
    generator: Box<dyn Generator>,
    repairer: Option<Box<dyn Repairer>>,
    interpreter: Option<Box<dyn Interpreter>>,
    report: Option<MarkdownReportSink>,
}

/// Rows shown to the interpreter.
const INTERPRET_SAMPLE_ROWS: usize = 10;

#[derive(Debug)]
pub struct QueryRun {
    pub query: String,
    pub outcome: Result<RunOutcome, EngineError>,
    /// Plain-language reading of an answered query, when an interpreter is set
    /// and it succeeded.
    pub interpretation: Option<String>,
}

impl QueryRun {
    pub fn answered(&self) -> bool {
        matches!(&self.outcome, Ok(outcome) if outcome.is_succeeded())
    }
}

/// Shows the generator queries answered earlier in a batch as completed work.
struct WithHistory<'a> {
    inner: &'a dyn Generator,
    history: &'a [String],
}

impl Generator for WithHistory<'_> {
    fn generate(
        &self,
        task: &str,
        schema: &SchemaInfo,
        completed_tasks: &[String],
    ) -> Result<String, CapabilityError> {
        let mut prior = self.history.to_vec();
        prior.extend(completed_tasks.iter().cloned());
        self.inner.generate(task, schema, &prior)
    }
}

impl QueryPipeline {
    pub fn new(
        settings: EngineSettings,
        db_path: impl Into<PathBuf>,
        generator: impl Generator + 'static,
    ) -> Self {
        let db_path = db_path.into();
        let sandbox = SqliteQuerySandbox::from_settings(&db_path, &settings.query);
        let report = settings
            .reports
            .enabled
            .then(|| MarkdownReportSink::new(settings.report_root()));
        Self {
            settings,
            db_path,
            schema_reader: SqliteSchemaReader::new(),
            sandbox,
            validator: KeywordSafetyValidator::new(),
            generator: Box::new(generator),
            repairer: None,
            interpreter: None,
            report,
        }
    }

    /// Generation, repair and interpretation served by one external command.
    pub fn from_command(
        settings: EngineSettings,
        db_path: impl Into<PathBuf>,
        capability: CommandCapability,
    ) -> Self {
        Self::new(settings, db_path, capability.clone())
            .with_repairer(capability.clone())
            .with_interpreter(capability)
    }

    pub fn with_repairer(mut self, repairer: impl Repairer + 'static) -> Self {
        self.repairer = Some(Box::new(repairer));
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Interpreter + 'static) -> Self {
        self.interpreter = Some(Box::new(interpreter));
        self
    }

    pub fn with_validator(mut self, validator: KeywordSafetyValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn run(&self, query: &str) -> Result<RunOutcome, EngineError> {
        self.run_with_history(query, &[])
    }

    /// One query run followed by interpretation of its answer.
    pub fn ask(&self, query: &str) -> QueryRun {
        self.ask_with_history(query.trim(), &[])
    }

    /// Runs every query in order. Answered queries are passed to later generations;
    /// a rejected or failed query does not stop the batch.
    pub fn run_batch<S: AsRef<str>>(&self, queries: &[S]) -> Vec<QueryRun> {
        let mut answered = Vec::new();
        let mut runs = Vec::with_capacity(queries.len());
        for query in queries {
            let run = self.ask_with_history(query.as_ref().trim(), &answered);
            if run.answered() {
                answered.push(run.query.clone());
            } else if let Err(err) = &run.outcome {
                tracing::warn!(query = %run.query, error = %err, "query run could not start");
            }
            runs.push(run);
        }
        runs
    }

    fn ask_with_history(&self, query: &str, history: &[String]) -> QueryRun {
        let outcome = self.run_with_history(query, history);
        let interpretation = match &outcome {
            Ok(outcome) if outcome.is_succeeded() => self.interpret(query, outcome),
            _ => None,
        };
        QueryRun {
            query: query.to_string(),
            outcome,
            interpretation,
        }
    }

    /// Re-reads the answered query's rows and asks the interpreter about them.
    /// Any failure is logged and leaves the run without an interpretation.
    fn interpret(&self, query: &str, outcome: &RunOutcome) -> Option<String> {
        let interpreter = self.interpreter.as_ref()?;
        let sql = outcome
            .ledger()
            .records()
            .iter()
            .rev()
            .find(|record| record.outcome.success)?
            .source
            .as_str();
        let run_id = outcome.run().run_id.as_str();
        let rows = self
            .sandbox
            .query(sql, &Bindings::new(), self.settings.limits.execution_timeout())
            .map_err(|err| err.to_string())
            .and_then(|result| result.map_err(|err| err.to_string()));
        let result = match rows {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(%run_id, %error, "query rows unavailable for interpretation");
                return None;
            }
        };
        let sample = result.rows.len().min(INTERPRET_SAMPLE_ROWS);
        let request = InterpretRequest {
            question: query,
            sql,
            row_count: result.rows.len(),
            columns: &result.columns,
            sample_rows: &result.rows[..sample],
        };
        match interpreter.interpret(&request) {
            Ok(text) => Some(text),
            Err(err) => {
                tracing::warn!(%run_id, error = %err, "result interpretation failed");
                None
            }
        }
    }

    fn run_with_history(&self, query: &str, history: &[String]) -> Result<RunOutcome, EngineError> {
        let planner = FixedPlanner::new([query]);
        let generator = WithHistory {
            inner: self.generator.as_ref(),
            history,
        };
        let mut engine = WorkflowEngine::new(
            self.settings.clone(),
            &self.sandbox,
            &self.schema_reader,
            &planner,
            &generator,
        )
        .with_safety_validator(&self.validator)
        .with_source_extractor(extract_sql);
        if let Some(repairer) = &self.repairer {
            engine = engine.with_repairer(repairer.as_ref());
        }
        if let Some(report) = &self.report {
            engine = engine.with_report_sink(report);
        }
        engine.start(&self.db_path.display().to_string())
    }
}
