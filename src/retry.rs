/*!
 # Bounded retry

 Runs an async operation up to a fixed number of times, retrying only the
 faults a caller-supplied predicate accepts. The last fault is returned as-is.
*/

use std::future::Future;

use tracing::{debug, warn};

/// Retry combinator with a fixed attempt budget
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    max_attempts: u8,
}

impl Retry {
    /// `max_attempts` counts the first try; zero is treated as one.
    pub fn new(max_attempts: u8) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }

    /// Calls `operation` with the 1-based attempt number until it succeeds,
    /// fails with a fault `retryable` rejects, or the budget is spent.
    pub async fn run<T, E, F, Fut, P>(&self, mut operation: F, retryable: P) -> Result<T, E>
    where
        F: FnMut(u8) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && retryable(&err) => {
                    warn!(
                        "Attempt {}/{} failed, retrying: {}",
                        attempt, self.max_attempts, err
                    );
                    attempt += 1;
                }
                Err(err) => {
                    debug!("Giving up after attempt {}/{}", attempt, self.max_attempts);
                    return Err(err);
                }
            }
        }
    }
}
