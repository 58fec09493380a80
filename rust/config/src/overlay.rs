//! Layering a TOML run file over command-line parameters.

use std::path::Path;

use crate::TrainParams;

/// Write every key of `overlay` into `base`, descending into tables present
/// on both sides. Anything else in `overlay` replaces what `base` had.
pub fn overlay_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => overlay_toml(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

impl TrainParams {
    /// Layer a TOML file over these parameters.
    ///
    /// Precedence, lowest first: the values already in `self` (CLI defaults),
    /// the file, then every key for which `is_explicit` returns true (flags the
    /// user actually passed).
    pub fn with_file_overrides(
        &self,
        path: impl AsRef<Path>,
        is_explicit: impl Fn(&str) -> bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e))?;
        let file: toml::Value =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut merged =
            toml::Value::try_from(self).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let explicit: toml::Table = match &merged {
            toml::Value::Table(t) => t
                .iter()
                .filter(|(k, _)| is_explicit(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => toml::Table::new(),
        };

        overlay_toml(&mut merged, file);
        overlay_toml(&mut merged, toml::Value::Table(explicit));
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))
    }

    /// Render the configuration as TOML, without the blob credential.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let mut redacted = self.clone();
        redacted.blob.credential.clear();
        toml::to_string_pretty(&redacted).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}
