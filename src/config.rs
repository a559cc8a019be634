//==============================================================================
// Demo configuration
//==============================================================================

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable naming the TOML file `DemoConfig::from_env` reads.
pub const CONFIG_ENV: &str = "SINGLETON_DEMO_CONFIG";

/// DemoConfig: knobs for one contention run.
///
/// Every key is optional in the file:
///
/// ```toml
/// callers = 100
/// construction_delay_ms = 25
/// fail_first = 1
/// max_attempts = 3
/// read_storm = 10000
/// log_level = "debug"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemoConfig {
    pub callers: usize,
    pub construction_delay_ms: u64,
    pub fail_first: u32,
    pub max_attempts: u32,
    pub read_storm: usize,
    pub log_level: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        DemoConfig {
            callers: 100,
            construction_delay_ms: 25,
            fail_first: 0,
            max_attempts: 3,
            read_storm: 10_000,
            log_level: "info".to_string(),
        }
    }
}

impl DemoConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DemoConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Loads the file named by `SINGLETON_DEMO_CONFIG`, or the defaults when
    /// the variable is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.callers == 0 {
            return Err(ConfigError::Invalid {
                field: "callers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.fail_first >= self.max_attempts {
            return Err(ConfigError::Invalid {
                field: "fail_first",
                reason: format!(
                    "{} scheduled failures leave no successful attempt within max_attempts = {}",
                    self.fail_first, self.max_attempts
                ),
            });
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "log_level",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn construction_delay(&self) -> Duration {
        Duration::from_millis(self.construction_delay_ms)
    }
}
