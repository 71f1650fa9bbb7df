use super::response::{extract_code_block, extract_json};
use super::{
    CapabilityError, Generator, InterpretRequest, Interpreter, Planner, RepairOutcome,
    RepairRequest, Repairer, SchemaInfo, SchemaReader,
};
use crate::oracle::{ContinuationContext, ContinuationOracle, Decision};
use crate::sandbox::run_with_timeout;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Capability adapter backed by an external command.
///
/// Each call spawns the command once, writes a JSON request with a `capability`
/// field to its stdin and parses the response from stdout. Responses may be
/// wrapped in a fenced code block.
#[derive(Debug, Clone)]
pub struct CommandCapability {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    work_dir: Option<PathBuf>,
}

impl CommandCapability {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(120),
            work_dir: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    /// Runs the command with `request` on stdin and returns its stdout.
    pub fn invoke(&self, request: &Value) -> Result<String, CapabilityError> {
        let payload = serde_json::to_vec(request)
            .map_err(|err| CapabilityError::Failed(format!("request encoding failed: {err}")))?;
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.work_dir {
            command.current_dir(dir);
        }

        let output = match run_with_timeout(&mut command, Some(&payload), self.timeout) {
            Ok(output) => output,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CapabilityError::Unavailable(format!(
                    "command `{}` was not found",
                    self.program
                )))
            }
            Err(err) => {
                return Err(CapabilityError::Unavailable(format!(
                    "command `{}` could not run: {err}",
                    self.program
                )))
            }
        };

        if output.timed_out {
            return Err(CapabilityError::Unavailable(format!(
                "command `{}` timed out after {}ms",
                self.program,
                self.timeout.as_millis()
            )));
        }
        if !output.success() {
            let code = output
                .exit_code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(CapabilityError::Failed(format!(
                "command `{}` exited with {code}: {}",
                self.program,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    fn invoke_json(&self, request: &Value) -> Result<Value, CapabilityError> {
        let stdout = self.invoke(request)?;
        extract_json(&stdout).map_err(CapabilityError::Unparseable)
    }
}

impl SchemaReader for CommandCapability {
    fn read(&self, source_ref: &str) -> Result<SchemaInfo, CapabilityError> {
        let value = self.invoke_json(&json!({
            "capability": "read_schema",
            "sourceRef": source_ref,
        }))?;
        let mut schema: SchemaInfo = serde_json::from_value(value)
            .map_err(|err| CapabilityError::Unparseable(format!("schema: {err}")))?;
        if schema.source.is_empty() {
            schema.source = source_ref.to_string();
        }
        Ok(schema)
    }
}

impl Planner for CommandCapability {
    fn plan(&self, schema: &SchemaInfo) -> Result<Vec<String>, CapabilityError> {
        let value = self.invoke_json(&json!({
            "capability": "plan",
            "schema": schema,
        }))?;
        parse_tasks(&value)
    }
}

impl Generator for CommandCapability {
    fn generate(
        &self,
        task: &str,
        schema: &SchemaInfo,
        completed_tasks: &[String],
    ) -> Result<String, CapabilityError> {
        let stdout = self.invoke(&json!({
            "capability": "generate",
            "task": task,
            "schema": schema,
            "completedTasks": completed_tasks,
        }))?;
        if let Ok(value) = extract_json(&stdout) {
            if let Some(source) = value.get("source").and_then(Value::as_str) {
                return Ok(source.to_string());
            }
        }
        let source = extract_code_block(&stdout);
        if source.is_empty() {
            return Err(CapabilityError::Unparseable(
                "generate response carried no source".to_string(),
            ));
        }
        Ok(source)
    }
}

impl Repairer for CommandCapability {
    fn repair(&self, request: &RepairRequest<'_>) -> Result<RepairOutcome, CapabilityError> {
        let mut body = serde_json::to_value(request)
            .map_err(|err| CapabilityError::Failed(format!("request encoding failed: {err}")))?;
        if let Some(map) = body.as_object_mut() {
            map.insert("capability".to_string(), Value::from("repair"));
        }
        let value = self.invoke_json(&body)?;
        let fixed_source = value
            .get("fixedSource")
            .and_then(Value::as_str)
            .map(extract_code_block)
            .unwrap_or_default();
        let explanation = value
            .get("explanation")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let ok = value
            .get("ok")
            .and_then(Value::as_bool)
            .unwrap_or(!fixed_source.is_empty());
        Ok(RepairOutcome {
            ok,
            fixed_source,
            explanation,
        })
    }
}

impl ContinuationOracle for CommandCapability {
    fn decide(&self, context: &ContinuationContext) -> Result<Decision, CapabilityError> {
        let mut body = serde_json::to_value(context)
            .map_err(|err| CapabilityError::Failed(format!("request encoding failed: {err}")))?;
        if let Some(map) = body.as_object_mut() {
            map.insert("capability".to_string(), Value::from("decide"));
        }
        parse_decision(&self.invoke_json(&body)?)
    }
}

impl Interpreter for CommandCapability {
    fn interpret(&self, request: &InterpretRequest<'_>) -> Result<String, CapabilityError> {
        let mut body = serde_json::to_value(request)
            .map_err(|err| CapabilityError::Failed(format!("request encoding failed: {err}")))?;
        if let Some(map) = body.as_object_mut() {
            map.insert("capability".to_string(), Value::from("interpret"));
        }
        // `{"interpretation": "..."}` or plain prose.
        let stdout = self.invoke(&body)?;
        let text = extract_json(&stdout)
            .ok()
            .and_then(|value| {
                value
                    .get("interpretation")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or(stdout);
        let text = text.trim();
        if text.is_empty() {
            return Err(CapabilityError::Unparseable(
                "interpret response was empty".to_string(),
            ));
        }
        Ok(text.to_string())
    }
}

fn parse_tasks(value: &Value) -> Result<Vec<String>, CapabilityError> {
    let tasks = value
        .get("tasks")
        .unwrap_or(value)
        .as_array()
        .ok_or_else(|| CapabilityError::Unparseable("plan response has no `tasks` array".into()))?;
    tasks
        .iter()
        .map(|task| match task {
            Value::String(text) => Ok(text.clone()),
            Value::Object(map) => map
                .get("description")
                .or_else(|| map.get("task"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    CapabilityError::Unparseable("plan task object has no description".into())
                }),
            other => Err(CapabilityError::Unparseable(format!(
                "plan task must be a string, got {other}"
            ))),
        })
        .collect()
}

fn parse_decision(value: &Value) -> Result<Decision, CapabilityError> {
    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let should_continue = match value.get("decision") {
        Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "continue" => true,
            "stop" | "end" => false,
            other => {
                return Err(CapabilityError::Unparseable(format!(
                    "unknown decision `{other}`"
                )))
            }
        },
        Some(Value::Bool(flag)) => *flag,
        _ => value
            .get("shouldContinue")
            .and_then(Value::as_bool)
            .ok_or_else(|| CapabilityError::Unparseable("decision response has no decision".into()))?,
    };
    Ok(Decision {
        should_continue,
        reason,
    })
}
