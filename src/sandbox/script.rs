use super::process::run_with_timeout;
use super::{io_error, Bindings, ExecutionOutcome, ExecutionSandbox, SandboxError};
use crate::config::SandboxSettings;
use crate::shared::ids::validate_binding_name;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How bindings are rendered into the script prelude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStyle {
    /// `name = __import__("json").loads("<json>")`
    Python,
    /// `name='<text>'`; strings are passed raw, other values as JSON text.
    Shell,
}

impl BindingStyle {
    pub fn for_extension(extension: &str) -> Self {
        match extension {
            "sh" | "bash" => Self::Shell,
            _ => Self::Python,
        }
    }
}

/// Runs source through an external interpreter in a child process.
///
/// Isolation is only that of a separate process with the engine's privileges; the
/// time limit is enforced by killing the child.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    interpreter: String,
    interpreter_args: Vec<String>,
    prelude: Vec<String>,
    script_extension: String,
    binding_style: BindingStyle,
    work_dir: PathBuf,
}

impl ProcessSandbox {
    pub fn new(interpreter: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            interpreter_args: Vec::new(),
            prelude: Vec::new(),
            script_extension: "py".to_string(),
            binding_style: BindingStyle::Python,
            work_dir: work_dir.into(),
        }
    }

    pub fn from_settings(settings: &SandboxSettings, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: settings.interpreter.clone(),
            interpreter_args: settings.interpreter_args.clone(),
            prelude: settings.prelude.clone(),
            script_extension: settings.script_extension.clone(),
            binding_style: BindingStyle::for_extension(&settings.script_extension),
            work_dir: work_dir.into(),
        }
    }

    pub fn with_prelude(mut self, lines: Vec<String>) -> Self {
        self.prelude = lines;
        self
    }

    pub fn with_script_extension(mut self, extension: impl Into<String>) -> Self {
        self.script_extension = extension.into();
        self.binding_style = BindingStyle::for_extension(&self.script_extension);
        self
    }

    pub fn with_interpreter_args(mut self, args: Vec<String>) -> Self {
        self.interpreter_args = args;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn render_script(&self, source: &str, bindings: &Bindings) -> Result<String, SandboxError> {
        let mut lines = self.prelude.clone();
        for (name, value) in bindings {
            validate_binding_name(name).map_err(SandboxError::InvalidBinding)?;
            lines.push(render_binding(self.binding_style, name, value)?);
        }
        lines.push(source.to_string());
        let mut script = lines.join("\n");
        script.push('\n');
        Ok(script)
    }

    /// File name of a fresh script; the child runs with `work_dir` as its cwd.
    fn script_name(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!(
            "script-{}-{nanos}.{}",
            std::process::id(),
            self.script_extension
        )
    }
}

impl ExecutionSandbox for ProcessSandbox {
    fn execute(
        &self,
        source: &str,
        bindings: &Bindings,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let script = self.render_script(source, bindings)?;
        fs::create_dir_all(&self.work_dir).map_err(|e| io_error(&self.work_dir, e))?;
        let script_name = self.script_name();
        let script_path = self.work_dir.join(&script_name);
        fs::write(&script_path, script).map_err(|e| io_error(&script_path, e))?;

        let mut command = Command::new(&self.interpreter);
        command
            .current_dir(&self.work_dir)
            .args(&self.interpreter_args)
            .arg(&script_name);
        let result = run_with_timeout(&mut command, None, timeout);
        let _ = fs::remove_file(&script_path);

        let output = match result {
            Ok(output) => output,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandboxError::MissingInterpreter {
                    interpreter: self.interpreter.clone(),
                })
            }
            Err(err) => return Err(io_error(&script_path, err)),
        };

        if output.timed_out {
            return Ok(ExecutionOutcome::timed_out(timeout, output.stdout));
        }
        if output.success() {
            return Ok(ExecutionOutcome::succeeded(output.stdout));
        }

        let (error_type, message) = classify_failure(&output.stderr, output.exit_code());
        let mut outcome = ExecutionOutcome::raised(error_type, message, output.stdout);
        let traceback = output.stderr.trim_end();
        if !traceback.is_empty() {
            outcome.error.push('\n');
            outcome.error.push_str(traceback);
        }
        Ok(outcome)
    }
}

fn render_binding(style: BindingStyle, name: &str, value: &Value) -> Result<String, SandboxError> {
    match style {
        BindingStyle::Python => {
            let json = serde_json::to_string(value)
                .map_err(|e| SandboxError::InvalidBinding(format!("`{name}`: {e}")))?;
            // A JSON string literal is also a valid Python string literal.
            let literal = serde_json::to_string(&json)
                .map_err(|e| SandboxError::InvalidBinding(format!("`{name}`: {e}")))?;
            Ok(format!("{name} = __import__(\"json\").loads({literal})"))
        }
        BindingStyle::Shell => {
            let text = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            Ok(format!("{name}='{}'", text.replace('\'', "'\\''")))
        }
    }
}

fn exception_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?:[A-Za-z_][A-Za-z0-9_]*\.)*([A-Z][A-Za-z0-9_]*(?:Error|Exception|Exit|Interrupt|Iteration|Warning))(?::\s*(.*))?$",
        )
        .expect("exception pattern compiles")
    })
}

/// Picks the exception type from the last matching stderr line (Python puts the
/// `Type: message` line last); falls back to the exit code.
pub fn classify_failure(stderr: &str, exit_code: Option<i32>) -> (String, String) {
    for line in stderr.lines().rev() {
        let line = line.trim();
        if let Some(captures) = exception_line().captures(line) {
            let error_type = captures[1].to_string();
            let message = captures
                .get(2)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            return (error_type, message);
        }
    }
    let message = match exit_code {
        Some(code) => format!("process exited with code {code}"),
        None => "process terminated by signal".to_string(),
    };
    ("NonZeroExit".to_string(), message)
}
