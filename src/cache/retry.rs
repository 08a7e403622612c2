//! Bounded retry with fixed backoff, shared by every reconciliation fetch.

use color_eyre::Result;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts including the first one
  pub max_attempts: u32,
  /// Fixed delay between attempts
  pub backoff_secs: u64,
}

impl Default for RetryPolicy {
  /// One retry after two seconds.
  fn default() -> Self {
    Self {
      max_attempts: 2,
      backoff_secs: 2,
    }
  }
}

impl RetryPolicy {
  pub fn backoff(&self) -> Duration {
    Duration::from_secs(self.backoff_secs)
  }

  /// Run `op` until it succeeds or attempts run out; the last error is returned.
  pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let attempts = self.max_attempts.max(1);
    let mut attempt = 1;

    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(e) if attempt < attempts => {
          warn!(
            attempt,
            of = attempts,
            "{} failed, retrying in {}s: {}",
            label,
            self.backoff_secs,
            e
          );
          tokio::time::sleep(self.backoff()).await;
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }
}
