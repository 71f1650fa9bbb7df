use super::ConfigError;
use crate::shared::ids::validate_binding_name;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration, read from a YAML file. Every section is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineSettings {
    #[serde(default = "default_state_root")]
    pub state_root: PathBuf,
    #[serde(default)]
    pub limits: EngineLimits,
    #[serde(default)]
    pub recovery: RecoverySettings,
    #[serde(default)]
    pub oracle: OracleSettings,
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub query: QuerySettings,
    #[serde(default)]
    pub reports: ReportSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            state_root: default_state_root(),
            limits: EngineLimits::default(),
            recovery: RecoverySettings::default(),
            oracle: OracleSettings::default(),
            sandbox: SandboxSettings::default(),
            query: QuerySettings::default(),
            reports: ReportSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineLimits {
    /// Hard cap on rounds per run, independent of plan length.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Auto-fix attempts allowed per round.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_plan_tasks")]
    pub max_plan_tasks: usize,
    #[serde(default = "default_execution_timeout_seconds")]
    pub execution_timeout_seconds: u64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_retries: default_max_retries(),
            max_plan_tasks: default_max_plan_tasks(),
            execution_timeout_seconds: default_execution_timeout_seconds(),
        }
    }
}

impl EngineLimits {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_seconds)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecoverySettings {
    /// When false, a timed-out execution is skipped instead of repaired.
    #[serde(default)]
    pub retry_timeouts: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct OracleSettings {
    #[serde(default = "default_recent_rounds")]
    pub recent_rounds: usize,
    #[serde(default = "default_output_preview_chars")]
    pub output_preview_chars: usize,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            recent_rounds: default_recent_rounds(),
            output_preview_chars: default_output_preview_chars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SandboxSettings {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default)]
    pub interpreter_args: Vec<String>,
    /// Lines placed before injected bindings, e.g. `import pandas as pd`.
    #[serde(default)]
    pub prelude: Vec<String>,
    #[serde(default = "default_script_extension")]
    pub script_extension: String,
    /// Binding name under which the dataset reference is injected.
    #[serde(default = "default_dataset_binding")]
    pub dataset_binding: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            interpreter_args: Vec::new(),
            prelude: Vec::new(),
            script_extension: default_script_extension(),
            dataset_binding: default_dataset_binding(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct QuerySettings {
    #[serde(default = "default_row_limit")]
    pub row_limit: usize,
    #[serde(default = "default_display_rows")]
    pub display_rows: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            row_limit: default_row_limit(),
            display_rows: default_display_rows(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReportSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Relative paths resolve against `state_root`.
    #[serde(default = "default_report_dir")]
    pub output_dir: PathBuf,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: default_report_dir(),
        }
    }
}

impl EngineSettings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_root.as_os_str().is_empty() {
            return Err(ConfigError::Settings(
                "`state_root` must be non-empty".to_string(),
            ));
        }
        if self.limits.max_rounds == 0 {
            return Err(ConfigError::Settings(
                "`limits.max_rounds` must be >= 1".to_string(),
            ));
        }
        if self.limits.max_plan_tasks == 0 {
            return Err(ConfigError::Settings(
                "`limits.max_plan_tasks` must be >= 1".to_string(),
            ));
        }
        if self.limits.execution_timeout_seconds == 0 {
            return Err(ConfigError::Settings(
                "`limits.execution_timeout_seconds` must be >= 1".to_string(),
            ));
        }
        if self.sandbox.interpreter.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`sandbox.interpreter` must be non-empty".to_string(),
            ));
        }
        if self.sandbox.script_extension.contains(['/', '\\', '.']) {
            return Err(ConfigError::Settings(
                "`sandbox.script_extension` must be a bare extension such as `py`".to_string(),
            ));
        }
        if self.sandbox.prelude.iter().any(|line| line.contains('\n')) {
            return Err(ConfigError::Settings(
                "`sandbox.prelude` entries must be single lines".to_string(),
            ));
        }
        validate_binding_name(&self.sandbox.dataset_binding)
            .map_err(|err| ConfigError::Settings(format!("`sandbox.dataset_binding`: {err}")))?;
        if self.query.row_limit == 0 {
            return Err(ConfigError::Settings(
                "`query.row_limit` must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn checkpoint_root(&self) -> PathBuf {
        self.state_root.join("checkpoints")
    }

    pub fn report_root(&self) -> PathBuf {
        if self.reports.output_dir.is_absolute() {
            self.reports.output_dir.clone()
        } else {
            self.state_root.join(&self.reports.output_dir)
        }
    }

    pub fn sandbox_work_dir(&self) -> PathBuf {
        self.state_root.join("sandbox")
    }
}

fn default_state_root() -> PathBuf {
    PathBuf::from(".autoanalyst")
}

fn default_max_rounds() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_plan_tasks() -> usize {
    5
}

fn default_execution_timeout_seconds() -> u64 {
    30
}

fn default_recent_rounds() -> usize {
    2
}

fn default_output_preview_chars() -> usize {
    200
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_script_extension() -> String {
    "py".to_string()
}

fn default_dataset_binding() -> String {
    "csv_path".to_string()
}

fn default_row_limit() -> usize {
    1000
}

fn default_display_rows() -> usize {
    20
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_uses_defaults() {
        let settings: EngineSettings = serde_yaml::from_str("{}").expect("parse settings");
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.limits.max_rounds, 5);
        assert_eq!(settings.limits.max_retries, 3);
        settings.validate().expect("defaults validate");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let settings: EngineSettings = serde_yaml::from_str(
            r#"
state_root: /tmp/analyst
limits:
  max_rounds: 2
sandbox:
  interpreter: /bin/sh
  script_extension: sh
"#,
        )
        .expect("parse settings");
        assert_eq!(settings.limits.max_rounds, 2);
        assert_eq!(settings.limits.max_retries, 3);
        assert_eq!(settings.sandbox.dataset_binding, "csv_path");
        assert_eq!(settings.report_root(), PathBuf::from("/tmp/analyst/reports"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut settings = EngineSettings::default();
        settings.limits.max_rounds = 0;
        let err = settings.validate().expect_err("zero rounds");
        assert!(err.to_string().contains("max_rounds"));

        let mut settings = EngineSettings::default();
        settings.sandbox.dataset_binding = "csv-path".to_string();
        assert!(settings.validate().is_err());
    }
}
