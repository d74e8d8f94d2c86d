//! Bounded retry of session RPCs under backpressure.
//!
//! A session method either accepts a call or refuses it with
//! [`Submission::Backpressure`]. On refusal the caller waits for the
//! session's next readiness event and submits the same call again, up to
//! [`RetryConfig::max_retries`] times. The readiness subscription is taken
//! before the first submission, so events fired between a refusal and the
//! wait are not lost. There is no time bound: a session that never signals
//! readiness stalls the call.

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::error::{SftpError, SftpResult};
use crate::protocol::{SftpChannel, Submission};

/// Configuration for backpressure retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Readiness waits allowed per call before failing with `Busy`
    /// (default: 3).
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Submits `action` on `channel`, retrying while the channel applies
/// backpressure.
///
/// Only the [`Submission`] returned by `action` decides acceptance. An
/// accepted call is awaited to completion; a call still refused once the
/// budget is spent fails with [`SftpError::Busy`] and is never completed.
pub async fn call<C, T, F>(
    channel: &C,
    config: &RetryConfig,
    op: &'static str,
    mut action: F,
) -> SftpResult<T>
where
    C: SftpChannel + ?Sized,
    F: FnMut(&C) -> Submission<T>,
{
    let mut readiness = channel.readiness();
    let mut remaining = config.max_retries;
    loop {
        match action(channel) {
            Submission::Accepted(pending) => return pending.await.map_err(SftpError::from),
            Submission::Backpressure if remaining > 0 => {
                remaining -= 1;
                trace!(op, remaining, "backpressure, waiting for continue");
                readiness.continued().await;
            }
            Submission::Backpressure => {
                warn!(
                    op,
                    attempts = config.max_retries + 1,
                    "retry budget exhausted under backpressure"
                );
                return Err(SftpError::Busy);
            }
        }
    }
}
