//! Shared retryable HTTP client construction (component M).
//!
//! Every networked source and location builds its `reqwest::blocking::Client`
//! through here so timeout, redirect, and retry/backoff policy stay
//! consistent without each call site re-deriving them.

use std::time::Duration;

use tracing::warn;

/// Retry/backoff policy for a single logical HTTP operation (not built into
/// `reqwest::blocking::Client` itself, which has no retry support).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        RetryPolicy {
            max_retries,
            base_delay_ms: 200,
        }
    }

    pub fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            base_delay_ms: 0,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.base_delay_ms.saturating_mul(1u64 << attempt.min(10));
        let jitter = (attempt as u64 * 37) % 50;
        Duration::from_millis(backoff + jitter)
    }

    /// Run `op` up to `max_retries + 1` times, sleeping with exponential
    /// backoff between attempts. Stops early and returns immediately if
    /// `ctx` is cancelled. Returns [`crate::error::giving_up_after`] once
    /// every attempt is exhausted.
    pub fn retry<T>(
        &self,
        ctx: &crate::cancel::CancellationToken,
        mut op: impl FnMut() -> Result<T, anyhow::Error>,
    ) -> Result<T, anyhow::Error> {
        let mut attempts = 0;
        let mut last_err = None;
        loop {
            if ctx.is_cancelled() {
                return Err(anyhow::Error::new(crate::error::Error::DownloadInterrupted));
            }
            attempts += 1;
            match op() {
                Ok(v) => return Ok(v),
                Err(e) => {
                    // `ProviderNotFound` is a definitive answer, not a
                    // transient failure -- retrying it would eventually
                    // discard the typed error into a generic "giving up"
                    // message, breaking the no-wrapping guarantee every
                    // caller of this error relies on (spec §4.I).
                    if e.downcast_ref::<crate::error::Error>()
                        .map(|err| err.is_provider_not_found())
                        .unwrap_or(false)
                        || e.downcast_ref::<crate::oci::OciRepositoryNotFound>().is_some()
                    {
                        return Err(e);
                    }
                    warn!(attempt = attempts, error = %e, "request attempt failed");
                    last_err = Some(e.to_string());
                    if attempts > self.max_retries {
                        break;
                    }
                    std::thread::sleep(self.delay_for(attempts));
                }
            }
        }
        Err(crate::error::giving_up_after(
            attempts,
            last_err.unwrap_or_else(|| "unknown error".to_string()),
        ))
    }
}

/// Timeout/redirect configuration for building a `reqwest::blocking::Client`
/// lazily and per-install, so credentials captured by the caller stay scoped
/// to a single operation instead of a long-lived shared client (spec §9's
/// "capability closures" note, expressed here as the builder-struct
/// alternative it names explicitly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    pub max_redirects: usize,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        HttpClientConfig {
            connect_timeout: Duration::from_secs(10),
            max_redirects: 10,
            retry: RetryPolicy::new(3),
        }
    }
}

impl HttpClientConfig {
    pub fn build(&self) -> Result<reqwest::blocking::Client, anyhow::Error> {
        reqwest::blocking::Client::builder()
            .connect_timeout(self.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(self.max_redirects))
            .build()
            .map_err(anyhow::Error::from)
    }
}
