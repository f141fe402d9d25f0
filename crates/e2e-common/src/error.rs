//! Error types and Kubernetes failure classification
//!
//! Retry decisions are made on an [`ErrorKind`] rather than on the concrete
//! error type. Anything that can fail against the API server implements
//! [`ClassifyError`] so the poller can decide whether an attempt is worth
//! repeating.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Coarse classification of a failed cluster operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The object being created is already present (HTTP 409, reason `AlreadyExists`)
    AlreadyExists,
    /// The object does not exist (HTTP 404)
    NotFound,
    /// A write conflicted with another writer (HTTP 409, any other reason)
    Conflict,
    /// Throttling, server-side hiccups and connection failures
    Transient,
    /// Anything else: bad credentials, malformed requests, decode failures
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transient => "transient",
            ErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Errors that can be mapped onto an [`ErrorKind`]
pub trait ClassifyError {
    /// Classify this error
    fn kind(&self) -> ErrorKind;

    /// Whether this error's kind is one of `kinds`
    fn is_any_of(&self, kinds: &[ErrorKind]) -> bool {
        kinds.contains(&self.kind())
    }
}

/// Classify an API server status response by HTTP code and reason.
pub fn classify_status(code: u16, reason: &str) -> ErrorKind {
    match code {
        404 => ErrorKind::NotFound,
        409 if reason == "AlreadyExists" => ErrorKind::AlreadyExists,
        409 => ErrorKind::Conflict,
        429 | 500 | 502 | 503 | 504 => ErrorKind::Transient,
        _ => ErrorKind::Other,
    }
}

impl ClassifyError for kube::Error {
    fn kind(&self) -> ErrorKind {
        match self {
            kube::Error::Api(resp) => classify_status(resp.code, &resp.reason),
            kube::Error::HyperError(_) | kube::Error::Service(_) => ErrorKind::Transient,
            _ => ErrorKind::Other,
        }
    }
}

/// Main error type for shared e2e operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Kubeconfig could not be read or turned into a client
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// A polled condition never held within its budget
    #[error("timed out after {elapsed:?} waiting for {description}{}", last_error_suffix(.last_error))]
    Timeout {
        /// What was being waited for
        description: String,
        /// Time spent polling
        elapsed: Duration,
        /// Error from the final attempt, if it failed
        last_error: Option<String>,
    },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {})", e),
        None => String::new(),
    }
}

impl Error {
    /// Create a kubeconfig error with the given message
    pub fn kubeconfig(msg: impl Into<String>) -> Self {
        Self::Kubeconfig(msg.into())
    }

    /// Create a timeout error for the described condition
    pub fn timeout(
        description: impl Into<String>,
        elapsed: Duration,
        last_error: Option<String>,
    ) -> Self {
        Self::Timeout {
            description: description.into(),
            elapsed,
            last_error,
        }
    }
}

impl ClassifyError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Kube { source } => source.kind(),
            Error::Kubeconfig(_) | Error::Timeout { .. } => ErrorKind::Other,
        }
    }
}
