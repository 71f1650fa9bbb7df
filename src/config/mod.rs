pub mod error;
pub mod load;
pub mod settings;

pub use error::ConfigError;
pub use load::load_settings;
pub use settings::{
    EngineLimits, EngineSettings, OracleSettings, QuerySettings, RecoverySettings,
    ReportSettings, SandboxSettings,
};
