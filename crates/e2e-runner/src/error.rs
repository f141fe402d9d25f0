//! Error types for the runner

use std::path::PathBuf;

use e2e_common::{ClassifyError, ErrorKind};

/// Runner Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Runner errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Common(#[from] e2e_common::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("config error: {message}")]
    Config { message: String },

    #[error("invalid manifest {}: {message}", .path.display())]
    InvalidManifest { path: PathBuf, message: String },

    #[error("command failed: {message}")]
    CommandFailed { message: String },
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub fn invalid_manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::InvalidManifest {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }
}

impl ClassifyError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Kube(e) => e.kind(),
            Error::Common(e) => e.kind(),
            _ => ErrorKind::Other,
        }
    }
}
