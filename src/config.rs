//! CDM configuration loaded from YAML.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default upper bound on init data size (64 KiB).
pub const DEFAULT_MAX_INIT_DATA_LENGTH: usize = 64 * 1024;
/// Default upper bound on a single key id taken from init data.
pub const DEFAULT_MAX_KEY_ID_LENGTH: usize = 512;

/// Tunables for a [`ClearKeyCdm`](crate::cdm::ClearKeyCdm) instance.
///
/// Missing fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdmConfig {
    /// Maximum number of concurrently open sessions (`None` = unlimited).
    pub max_sessions: Option<usize>,
    /// Maximum accepted init data length in bytes.
    pub max_init_data_length: usize,
    /// Maximum length of a key id extracted from init data.
    pub max_key_id_length: usize,
    /// Whether persistent-license sessions may be created.
    pub allow_persistent_sessions: bool,
}

impl Default for CdmConfig {
    fn default() -> Self {
        Self {
            max_sessions: None,
            max_init_data_length: DEFAULT_MAX_INIT_DATA_LENGTH,
            max_key_id_length: DEFAULT_MAX_KEY_ID_LENGTH,
            allow_persistent_sessions: true,
        }
    }
}

impl CdmConfig {
    /// Parse a config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a config from a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::CdmConfig;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = CdmConfig::from_yaml("max_sessions: 4\n").expect("parse config");
        assert_eq!(config.max_sessions, Some(4));
        assert_eq!(config.max_init_data_length, 64 * 1024);
        assert_eq!(config.max_key_id_length, 512);
        assert!(config.allow_persistent_sessions);
    }

    #[test]
    fn invalid_yaml_is_error() {
        let err = CdmConfig::from_yaml("max_sessions: [").expect_err("bad yaml should fail");
        assert!(err.to_string().starts_with("Config error"));
    }
}
