//==============================================================================
// Error types
//==============================================================================

use std::error::Error as StdError;
use std::path::PathBuf;

use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// ConstructionFailure: the factory could not build the resource.
///
/// Only the caller that triggered construction ever sees this value; the slot
/// goes back to empty so the next caller retries.
#[derive(Error, Debug)]
#[error("failed to construct {resource}: {message}")]
pub struct ConstructionFailure {
    resource: &'static str,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ConstructionFailure {
    pub fn new<T: ?Sized>(message: impl Into<String>) -> Self {
        ConstructionFailure {
            resource: std::any::type_name::<T>(),
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an underlying error, keeping it reachable through `source()`.
    pub fn with_source<T: ?Sized>(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        ConstructionFailure {
            resource: std::any::type_name::<T>(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn resource(&self) -> &'static str {
        self.resource
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// DemoError: everything that can stop a driver run.
#[derive(Error, Debug)]
pub enum DemoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("resource still unavailable after {attempts} attempt(s)")]
    Exhausted {
        attempts: u32,
        #[source]
        last: ConstructionFailure,
    },

    #[error("demo thread panicked")]
    WorkerPanicked,
}
