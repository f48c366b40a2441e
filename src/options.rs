use std::{fmt, sync::Arc};

use serde::Deserialize;

use crate::{Error, Result};

/// Upper bound on `max_retries`; beyond this the wait schedule is meaningless.
pub const MAX_RETRIES_LIMIT: usize = 32;

/// Replacement for the exponential wait formula, mapping a retry count to milliseconds.
#[derive(Clone)]
pub struct WaitOverride(Arc<dyn Fn(usize) -> u64 + Send + Sync>);

impl WaitOverride {
    pub fn new(f: impl Fn(usize) -> u64 + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub(crate) fn wait_ms(&self, retry_count: usize) -> u64 {
        (self.0)(retry_count)
    }
}

impl fmt::Debug for WaitOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WaitOverride(<fn>)")
    }
}

/// Callback told about every failed attempt that is about to be retried.
#[derive(Clone)]
pub struct FailureNotifier(Arc<dyn Fn(&Error) + Send + Sync>);

impl FailureNotifier {
    pub fn new(f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub(crate) fn notify(&self, err: &Error) {
        (self.0)(err)
    }
}

impl fmt::Debug for FailureNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FailureNotifier(<fn>)")
    }
}

/// Backoff schedule parameters.
///
/// The wait before retry `n` (0-based) is `round(initial_timeout_ms * growth_factor^n)`
/// unless an override is installed.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Wait before the first retry, in milliseconds.
    pub initial_timeout_ms: u64,
    /// Multiplier applied per further retry.
    pub growth_factor: f64,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Treat `500 Internal Server Error` as transient.
    pub retry_internal_server_error: bool,
    #[serde(skip)]
    pub override_wait: Option<WaitOverride>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_timeout_ms: 2_000,
            growth_factor: 1.4,
            max_retries: 5,
            retry_internal_server_error: false,
            override_wait: None,
        }
    }
}

impl BackoffConfig {
    /// Installs a custom wait function, typically to make tests fast and deterministic.
    pub fn with_override(mut self, f: impl Fn(usize) -> u64 + Send + Sync + 'static) -> Self {
        self.override_wait = Some(WaitOverride::new(f));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.growth_factor.is_finite() || self.growth_factor < 1.0 {
            return Err(Error::Config(format!(
                "growth_factor must be a finite number >= 1.0, got {}",
                self.growth_factor
            )));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(Error::Config(format!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}, got {}",
                self.max_retries
            )));
        }
        Ok(())
    }
}

/// Configures request timeout, backoff and retry behavior of a [`QueueClient`](crate::QueueClient).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Per-request timeout in milliseconds, re-armed for every attempt.
    pub timeout_ms: u64,
    pub backoff: BackoffConfig,
    /// Retry transient failures for requests that do not decide for themselves.
    pub retry_enabled: bool,
    /// Fallback notifier for requests without their own failure callback.
    #[serde(skip)]
    pub connection_error_handler: Option<FailureNotifier>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            backoff: BackoffConfig::default(),
            retry_enabled: false,
            connection_error_handler: None,
        }
    }
}

impl QueueOptions {
    pub fn with_connection_error_handler(
        mut self,
        handler: impl Fn(&Error) + Send + Sync + 'static,
    ) -> Self {
        self.connection_error_handler = Some(FailureNotifier::new(handler));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeout_ms must be greater than zero".to_owned()));
        }
        self.backoff.validate()
    }
}
