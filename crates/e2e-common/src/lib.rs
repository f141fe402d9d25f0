//! Shared building blocks for the e2e runner
//!
//! # Modules
//!
//! - [`poll`] - Condition polling and retry primitives for eventually-consistent cluster state
//! - [`error`] - Error types and classification of Kubernetes API failures
//! - [`kube_utils`] - Client construction and pod status helpers

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod poll;

pub use error::{ClassifyError, Error, ErrorKind};
pub use poll::{
    call_eventually_succeeds, ignore_if_already_exists, ignore_if_doesnt_exist, wait, Outcome,
    PollSettings,
};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
