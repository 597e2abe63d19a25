//! Bounded retries for store round trips
//!
//! Only errors classified as recoverable (connection drops, pool exhaustion)
//! are retried; everything else is returned on the first failure. Delays grow
//! exponentially up to a cap, with random jitter so a fleet of coordinators
//! recovering from the same outage does not hammer the store in lockstep.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{RecrawlErrorTrait, Result};

/// Backoff schedule for a retried store operation
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Retries after the first attempt
    pub retries: u32,

    /// Delay before the first retry
    pub initial: Duration,

    /// Upper bound for any single delay
    pub cap: Duration,

    /// Fraction of each delay that is randomized (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            retries: 3,
            initial: Duration::from_millis(100),
            cap: Duration::from_secs(5),
            jitter: 0.2,
        }
    }
}

impl Backoff {
    /// Schedule used when handing drained items back to the durable queue
    ///
    /// Items that still fail after this are reported as lost, so it retries
    /// longer than the default.
    pub fn for_requeue() -> Self {
        Self {
            retries: 5,
            ..Self::default()
        }
    }

    /// Deterministic schedule with no jitter
    pub fn fixed(retries: u32, initial: Duration, cap: Duration) -> Self {
        Self {
            retries,
            initial,
            cap,
            jitter: 0.0,
        }
    }

    /// Nominal delay before retry number `retry` (1-based), before jitter
    fn nominal(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial.saturating_mul(factor).min(self.cap)
    }

    fn delay(&self, retry: u32) -> Duration {
        let nominal = self.nominal(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return nominal;
        }
        let scale = 1.0 - jitter * rand::thread_rng().gen::<f64>();
        nominal.mul_f64(scale)
    }
}

/// Run `operation`, retrying recoverable errors per `backoff`
///
/// `what` names the operation in logs. Returns the first success, the first
/// non-recoverable error, or the last error once retries are exhausted.
pub async fn retry_store<T, F, Fut>(what: &str, backoff: &Backoff, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if retry > 0 {
                    tracing::info!(op = what, retries = retry, "Store operation recovered");
                }
                return Ok(value);
            }
            Err(e) if !e.is_recoverable() => return Err(e),
            Err(e) if retry >= backoff.retries => {
                tracing::warn!(op = what, retries = retry, error = %e, "Giving up on store operation");
                return Err(e);
            }
            Err(e) => {
                retry += 1;
                let delay = backoff.delay(retry);
                tracing::debug!(
                    op = what,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Store operation failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
