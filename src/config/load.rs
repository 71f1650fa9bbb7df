use super::{ConfigError, EngineSettings};
use std::path::Path;

pub fn load_settings(path: &Path) -> Result<EngineSettings, ConfigError> {
    let settings = EngineSettings::from_path(path)?;
    settings.validate()?;
    Ok(settings)
}
