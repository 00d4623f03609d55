//! Why a configuration could not be loaded.

use std::path::PathBuf;
use thiserror::Error;

/// A configuration loading or validation failure.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required file does not exist.
    #[error("{} does not exist", path.display())]
    MissingFile {
        /// The path that was asked for.
        path: PathBuf,
    },

    /// A file exists but could not be read.
    #[error("cannot read {}", path.display())]
    Io {
        /// The file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Only TOML and JSON layers are understood.
    #[error("unsupported configuration format {format:?}")]
    UnsupportedFormat {
        /// The extension or format name that was given.
        format: String,
    },

    /// A TOML layer is malformed or names a field no section has.
    #[error("invalid TOML layer: {0}")]
    Toml(#[from] toml::de::Error),

    /// A JSON layer is malformed.
    #[error("invalid JSON layer: {0}")]
    Json(#[from] serde_json::Error),

    /// A `.env` file is malformed.
    #[error("invalid .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),

    /// A variable under the prefix does not map to any setting.
    #[error("{var} does not name a setting")]
    UnknownEnvKey {
        /// The full variable name.
        var: String,
    },

    /// A variable maps to a setting but its value has the wrong shape.
    #[error("{var}: {expected}")]
    MalformedEnv {
        /// The full variable name.
        var: String,
        /// What the setting accepts.
        expected: &'static str,
    },

    /// The merged configuration breaks a constraint.
    #[error("{field} {reason}")]
    Invalid {
        /// Dotted setting path, e.g. `token.signing_key`.
        field: &'static str,
        /// The constraint that failed.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn missing_file(path: impl Into<PathBuf>) -> Self {
        Self::MissingFile { path: path.into() }
    }

    pub(crate) fn malformed_env(var: impl Into<String>, expected: &'static str) -> Self {
        Self::MalformedEnv {
            var: var.into(),
            expected,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// The dotted setting path for [`ConfigError::Invalid`].
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { field, .. } => Some(*field),
            _ => None,
        }
    }
}
