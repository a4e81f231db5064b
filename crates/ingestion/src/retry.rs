//! Bounded exponential backoff for store nodes that appear asynchronously.

use std::time::Duration;

use storage::StorageResult;
use tracing::{debug, warn};

use crate::config::BackoffConfig;
use crate::error::{IngestionError, Result};

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

impl Backoff {
    /// Probe until it reports `true`, sleeping between attempts with a
    /// doubling delay capped at `max_delay`.
    ///
    /// Probe errors count as failed attempts. Gives up with
    /// [`IngestionError::StoreUnavailable`] after `max_attempts` probes.
    pub async fn wait_until<F>(&self, name: &str, mut probe: F) -> Result<()>
    where
        F: FnMut() -> StorageResult<bool>,
    {
        let mut delay = self.initial_delay;
        for attempt in 1..=self.max_attempts {
            match probe() {
                Ok(true) => {
                    if attempt > 1 {
                        debug!(name = %name, attempt, "Store node available");
                    }
                    return Ok(());
                }
                Ok(false) => {
                    debug!(name = %name, attempt, "Store node not yet available");
                }
                Err(e) => {
                    warn!(name = %name, attempt, error = %e, "Store probe failed");
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, self.max_delay);
            }
        }

        warn!(name = %name, attempts = self.max_attempts, "Giving up waiting for store node");
        Err(IngestionError::StoreUnavailable {
            name: name.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Run `op` until it succeeds, retrying store errors with the same
    /// delays as [`wait_until`](Self::wait_until).
    pub async fn retry<T, F>(&self, name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> StorageResult<T>,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    warn!(name = %name, attempt, error = %e, "Store call failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.max_delay);
                    attempt += 1;
                }
                Err(e) => {
                    warn!(name = %name, attempts = attempt, error = %e, "Store call kept failing");
                    return Err(IngestionError::StoreUnavailable {
                        name: name.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::StorageError;

    fn fast(max_attempts: u32) -> Backoff {
        Backoff {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_retries() {
        let mut calls = 0;
        fast(5)
            .wait_until("run/dimensions", || {
                calls += 1;
                Ok(calls >= 3)
            })
            .await
            .unwrap();
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut calls = 0;
        let err = fast(4)
            .wait_until("run/coords", || {
                calls += 1;
                Err(StorageError::Backend("down".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(calls, 4);
        assert!(matches!(
            err,
            IngestionError::StoreUnavailable { ref name, attempts: 4 } if name == "run/coords"
        ));
    }

    #[tokio::test]
    async fn test_retry_returns_value_after_errors() {
        let mut calls = 0;
        let found = fast(3)
            .retry("run/variables", || {
                calls += 1;
                if calls < 3 {
                    Err(StorageError::Backend("flaky".to_string()))
                } else {
                    Ok(false)
                }
            })
            .await
            .unwrap();
        assert!(!found);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let mut calls = 0;
        let err = fast(2)
            .retry("run/attributes", || -> StorageResult<()> {
                calls += 1;
                Err(StorageError::Backend("down".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(calls, 2);
        assert!(matches!(err, IngestionError::StoreUnavailable { attempts: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_capped() {
        let backoff = Backoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            max_attempts: 4,
        };
        let started = tokio::time::Instant::now();
        let _ = backoff.wait_until("x", || Ok(false)).await;
        // 100 + 200 + 250
        assert_eq!(started.elapsed(), Duration::from_millis(550));
    }

    #[test]
    fn test_from_config_keeps_at_least_one_attempt() {
        let backoff = Backoff::from(&BackoffConfig {
            initial_delay_ms: 10,
            max_delay_ms: 20,
            max_attempts: 0,
        });
        assert_eq!(backoff.max_attempts, 1);
        assert_eq!(backoff.initial_delay, Duration::from_millis(10));
    }
}
