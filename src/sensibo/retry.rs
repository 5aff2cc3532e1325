//! Bounded fixed-floor retry for Sensibo requests

use std::future::Future;
use std::time::Duration;

use crate::error::SensiboError;

/// Which failures a request may be re-issued after
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    /// Reads are safe to repeat: retry every retryable failure
    Read,
    /// Writes are only repeated when the request never reached the vendor
    Write,
}

impl RetryMode {
    fn allows(self, err: &SensiboError) -> bool {
        match self {
            RetryMode::Read => err.is_retryable(),
            RetryMode::Write => err.is_pre_send(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt ceiling is reached. Sleeps `backoff` between attempts.
    pub async fn run<T, F, Fut>(&self, what: &str, mode: RetryMode, mut op: F) -> Result<T, SensiboError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SensiboError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && mode.allows(&e) => {
                    attempt += 1;
                    tracing::warn!(
                        "[Sensibo] {} failed: {} ... retrying (attempt {}/{})",
                        what,
                        e,
                        attempt,
                        self.max_attempts
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(5))
    }
}
