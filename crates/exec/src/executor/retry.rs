//! Bounded restart loop for conflicting statements

use crate::error::{Error, Result};
use crate::timer::CancellationToken;

/// Outcome of one attempt at running a statement
#[derive(Debug)]
pub(crate) enum Attempt<T> {
    Done(T),
    /// Conflict the statement may recover from by running again
    Retryable(Error),
    Fatal(Error),
}

impl<T> Attempt<T> {
    /// Classify a result, allowing a retry only when `restartable`
    pub(crate) fn from_result(result: Result<T>, restartable: bool) -> Self {
        match result {
            Ok(value) => Attempt::Done(value),
            Err(e) if restartable && e.is_conflict() => Attempt::Retryable(e),
            Err(e) => Attempt::Fatal(e),
        }
    }
}

/// Run `attempt` until it completes, fails for good, or has been restarted
/// `max_restarts` times. The closure receives the zero-based attempt number.
pub(crate) fn with_restarts<T>(
    max_restarts: u32,
    sql: &str,
    cancel: &CancellationToken,
    mut attempt: impl FnMut(u32) -> Attempt<T>,
) -> Result<T> {
    let mut number = 0;
    loop {
        cancel.check()?;

        match attempt(number) {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(e) => return Err(e),
            Attempt::Retryable(e) => {
                if number >= max_restarts {
                    tracing::warn!(
                        "Update conflict: unable to get a stable set of rows in the source tables after {} attempts of restart. Query: {}",
                        number,
                        sql
                    );
                    return Err(e);
                }
                number += 1;
                tracing::debug!("Restarting request after conflict ({}), attempt {}", e, number);
            }
        }
    }
}
