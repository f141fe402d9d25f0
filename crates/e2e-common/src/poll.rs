//! Condition polling for eventually-consistent cluster state
//!
//! Everything the runner waits on (pods disappearing, pods starting, objects
//! becoming creatable) goes through the primitives here instead of ad-hoc
//! loops at each call site.
//!
//! A timeout is a normal [`Outcome::TimedOut`], not an error. Whether a
//! condition that never held is fatal is the caller's decision. Errors whose
//! [`ErrorKind`] is in the caller's ignore list count as "not yet"; every
//! other error aborts polling on the attempt it happens.
//!
//! # Example
//!
//! ```ignore
//! use e2e_common::{wait, ErrorKind, PollSettings};
//!
//! let pod = wait(
//!     "pod to be running",
//!     PollSettings::new(Duration::from_secs(180), Duration::from_secs(5)),
//!     &[ErrorKind::NotFound],
//!     || pods.get("e2e-test"),
//!     |pod| pod_phase(pod) == PodPhase::Running,
//! )
//! .await?
//! .ready_or_timeout("pod to be running")?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{ClassifyError, ErrorKind};

/// Timing for a poll loop.
///
/// `timeout` is a hard deadline measured from the first attempt. `interval`
/// is the pause between attempts and is never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSettings {
    timeout: Duration,
    interval: Duration,
}

impl PollSettings {
    /// Create poll settings.
    ///
    /// # Panics
    /// If `interval` is zero. In a `const` this fails the build instead.
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        assert!(!interval.is_zero(), "poll interval must be non-zero");
        Self { timeout, interval }
    }
}

/// Result of a poll loop that did not hit a fatal error.
#[derive(Debug)]
#[must_use]
pub enum Outcome<T, E> {
    /// The condition held; carries the state that satisfied it
    Ready(T),
    /// The budget ran out first
    TimedOut {
        /// Number of attempts made
        attempts: u32,
        /// Time from the first attempt to giving up
        elapsed: Duration,
        /// Error from the final attempt, if it failed with an ignored kind
        last_error: Option<E>,
    },
}

impl<T, E> Outcome<T, E> {
    /// Whether the condition held
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready(_))
    }

    /// The ready value, discarding timeout details
    pub fn ready(self) -> Option<T> {
        match self {
            Outcome::Ready(value) => Some(value),
            Outcome::TimedOut { .. } => None,
        }
    }

    /// Turn a timeout into [`crate::Error::Timeout`] describing what was awaited.
    pub fn ready_or_timeout(self, description: impl Into<String>) -> crate::Result<T>
    where
        E: Display,
    {
        match self {
            Outcome::Ready(value) => Ok(value),
            Outcome::TimedOut {
                elapsed,
                last_error,
                ..
            } => Err(crate::Error::timeout(
                description,
                elapsed,
                last_error.map(|e| e.to_string()),
            )),
        }
    }
}

/// Poll `query` until `predicate` holds for its result.
///
/// Returns `Ok(Outcome::Ready(state))` with the first state that satisfied the
/// predicate, `Ok(Outcome::TimedOut { .. })` if the deadline passed first, or
/// `Err` with the first query error whose kind is not in `ignore`.
///
/// A predicate that holds on the first query returns without sleeping.
pub async fn wait<T, E, Q, Fut, P>(
    description: &str,
    settings: PollSettings,
    ignore: &[ErrorKind],
    query: Q,
    predicate: P,
) -> Result<Outcome<T, E>, E>
where
    Q: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&T) -> bool,
    E: ClassifyError + Display,
{
    poll_loop(description, settings, ignore, query, predicate).await
}

/// Call `action` until it succeeds.
///
/// Errors whose kind is in `ignore` are retried every `interval` until the
/// budget is spent, after which `Ok(Outcome::TimedOut { last_error, .. })`
/// carries the final failure. Any other error is returned immediately.
pub async fn call_eventually_succeeds<T, E, A, Fut>(
    description: &str,
    settings: PollSettings,
    ignore: &[ErrorKind],
    action: A,
) -> Result<Outcome<T, E>, E>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ClassifyError + Display,
{
    poll_loop(description, settings, ignore, action, |_: &T| true).await
}

/// Run a create-style action once, treating "already exists" as success.
///
/// Returns `Ok(Some(value))` when the action succeeded, `Ok(None)` when the
/// object was already present.
pub async fn ignore_if_already_exists<T, E, Fut>(
    description: &str,
    action: Fut,
) -> Result<Option<T>, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: ClassifyError,
{
    ignore_kind(description, ErrorKind::AlreadyExists, action).await
}

/// Run a delete-style action once, treating "not found" as success.
pub async fn ignore_if_doesnt_exist<T, E, Fut>(
    description: &str,
    action: Fut,
) -> Result<Option<T>, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: ClassifyError,
{
    ignore_kind(description, ErrorKind::NotFound, action).await
}

async fn ignore_kind<T, E, Fut>(
    description: &str,
    kind: ErrorKind,
    action: Fut,
) -> Result<Option<T>, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: ClassifyError,
{
    match action.await {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == kind => {
            debug!(operation = %description, %kind, "Ignoring error");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Shared loop behind [`wait`] and [`call_eventually_succeeds`].
async fn poll_loop<T, E, F, Fut, D>(
    description: &str,
    settings: PollSettings,
    ignore: &[ErrorKind],
    mut attempt: F,
    mut done: D,
) -> Result<Outcome<T, E>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    D: FnMut(&T) -> bool,
    E: ClassifyError + Display,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let last_error = match attempt().await {
            Ok(value) if done(&value) => {
                debug!(operation = %description, attempts, "Condition met");
                return Ok(Outcome::Ready(value));
            }
            Ok(_) => {
                trace!(operation = %description, attempts, "Condition not met yet");
                None
            }
            Err(e) if e.is_any_of(ignore) => {
                debug!(
                    operation = %description,
                    attempts,
                    kind = %e.kind(),
                    error = %e,
                    "Ignoring error while polling"
                );
                Some(e)
            }
            Err(e) => return Err(e),
        };

        let elapsed = start.elapsed();
        if elapsed >= settings.timeout {
            warn!(
                operation = %description,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "Gave up waiting"
            );
            return Ok(Outcome::TimedOut {
                attempts,
                elapsed,
                last_error,
            });
        }

        // Clamp so the final attempt lands on the deadline rather than past it.
        tokio::time::sleep(settings.interval.min(settings.timeout - elapsed)).await;
    }
}
