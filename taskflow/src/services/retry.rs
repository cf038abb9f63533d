//! Poll-with-backoff helper
//!
//! Used where the client waits on a server-side effect it cannot observe
//! directly, such as the profile row a signup trigger creates.

use crate::config::ProfilePolling;
use crate::error::{AppError, Result};
use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error)]
enum PollError {
    #[error("not available yet")]
    NotYet,
    #[error(transparent)]
    Failed(#[from] AppError),
}

/// Call `check` until it yields `Some`, backing off exponentially between
/// attempts. Returns `Ok(None)` once the attempts are used up. Errors from
/// `check` end the polling immediately.
pub async fn poll_until_some<T, F, Fut>(
    polling: ProfilePolling,
    what: &str,
    mut check: F,
) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let outcome = (|| {
        let attempt = check();
        async move { attempt.await?.ok_or(PollError::NotYet) }
    })
    .retry(
        ExponentialBuilder::default()
            .with_min_delay(polling.min_delay)
            .with_max_delay(polling.max_delay)
            .with_max_times(polling.attempts),
    )
    .when(|e: &PollError| matches!(e, PollError::NotYet))
    .notify(|_, dur| {
        tracing::debug!("{} not available, checking again in {:?}", what, dur);
    })
    .await;

    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(PollError::NotYet) => Ok(None),
        Err(PollError::Failed(e)) => Err(e),
    }
}
