//! Error types for duplex-core.

use std::path::PathBuf;

use thiserror::Error;

/// Construction-time configuration errors. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting failed validation.
    #[error("invalid configuration: {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// Underlying I/O failure while reading the config file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with the offending path.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field,
        reason: reason.into(),
    }
}
