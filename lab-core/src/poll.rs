//! Bounded poll loop for asynchronous cloud operations.
//!
//! Cluster boot, library installation and statement execution all complete on
//! the platform's schedule. Each is observed with a fixed interval and a
//! caller-supplied timeout; running out of time is a [`LabError::Timeout`],
//! never an indefinite wait.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{LabError, Result};

/// Interval and deadline for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn from_secs(interval_secs: u64, timeout_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(timeout_secs),
        )
    }
}

/// Result of a single check inside [`poll_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Done(T),
    Waiting,
}

/// Run `check` every `policy.interval` until it reports [`PollStatus::Done`].
///
/// The check always runs at least once, so a zero timeout still observes an
/// operation that has already finished. Errors returned by `check` end the
/// loop immediately. With a 5s timeout and a 1s interval the check runs five
/// times before the timeout is reported.
pub async fn poll_until<T, F, Fut>(policy: PollPolicy, operation: &str, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>>>,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        if let PollStatus::Done(value) = check().await? {
            debug!(operation, attempts, "poll finished");
            return Ok(value);
        }

        sleep(policy.interval).await;
        if start.elapsed() >= policy.timeout {
            break;
        }
        debug!(
            operation,
            attempts,
            elapsed_secs = start.elapsed().as_secs(),
            "still waiting"
        );
    }

    Err(LabError::timeout(operation, policy.timeout.as_secs()))
}
