//! Failure classification and backoff computation.

use std::time::Duration;

use crate::{BackoffConfig, Result, Response, TransportError, TransportErrorKind};

/// Gateway and availability statuses that are always worth retrying.
const GATEWAY_STATUSES: [u16; 3] = [502, 503, 504];

/// Coarse category of a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Connection reset, connection timeout, DNS or socket timeout.
    TransientNetwork,
    /// Gateway or availability status (502, 503, 504).
    TransientServer,
    /// Local deadline passed before any response arrived.
    TransientClientTimeout,
    /// Any other explicit HTTP error status.
    TerminalServer,
    /// A transport failure that retrying will not fix.
    TerminalTransport,
}

impl FailureClass {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::TransientNetwork | Self::TransientServer | Self::TransientClientTimeout
        )
    }

    pub(crate) fn of_transport(kind: TransportErrorKind) -> Self {
        match kind {
            TransportErrorKind::ConnectionReset
            | TransportErrorKind::ConnectionTimeout
            | TransportErrorKind::AddressResolution
            | TransportErrorKind::SocketTimeout
            | TransportErrorKind::CrossOriginDenied => Self::TransientNetwork,
            TransportErrorKind::Timeout => Self::TransientClientTimeout,
            TransportErrorKind::Other => Self::TerminalTransport,
        }
    }

    pub(crate) fn of_status(status: u16, retry_internal_server_error: bool) -> Self {
        if GATEWAY_STATUSES.contains(&status) || (retry_internal_server_error && status == 500) {
            Self::TransientServer
        } else {
            Self::TerminalServer
        }
    }
}

/// Result of [`RetryPolicy::classify`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub class: FailureClass,
    pub retryable: bool,
}

impl Classification {
    fn new(class: FailureClass) -> Self {
        Self {
            class,
            retryable: class.is_transient(),
        }
    }
}

/// Per-request retry counters.
///
/// Created at the first attempt and dropped with the request, so concurrent
/// requests never see each other's counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempts_made: usize,
    pub last_wait_ms: u64,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a scheduled retry.
    pub(crate) fn record(&mut self, wait_ms: u64) {
        self.attempts_made += 1;
        self.last_wait_ms = wait_ms;
    }
}

/// What the executor should do after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Retry { wait: Duration },
    Fail { exhausted: bool },
}

/// Immutable retry policy built from a validated [`BackoffConfig`].
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff: BackoffConfig) -> Result<Self> {
        backoff.validate()?;
        Ok(Self { backoff })
    }

    pub fn max_retries(&self) -> usize {
        self.backoff.max_retries
    }

    /// Classifies the outcome of one attempt.
    ///
    /// A transport error wins over a response; a response alone is judged by
    /// its status.
    pub fn classify(
        &self,
        error: Option<&TransportError>,
        response: Option<&Response>,
    ) -> Classification {
        if let Some(err) = error {
            return Classification::new(FailureClass::of_transport(err.kind));
        }
        match response {
            Some(response) => Classification::new(FailureClass::of_status(
                response.status,
                self.backoff.retry_internal_server_error,
            )),
            None => Classification::new(FailureClass::TerminalTransport),
        }
    }

    /// Milliseconds to wait before retry number `retry_count` (0-based).
    pub fn next_wait_ms(&self, retry_count: usize) -> u64 {
        if let Some(override_wait) = &self.backoff.override_wait {
            return override_wait.wait_ms(retry_count);
        }
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let wait = (self.backoff.initial_timeout_ms as f64)
            * self.backoff.growth_factor.powi(exponent);
        if wait.is_finite() && wait < u64::MAX as f64 {
            wait.round() as u64
        } else {
            u64::MAX
        }
    }

    /// Turns a classification into a retry or a terminal failure.
    pub fn decide(
        &self,
        classification: Classification,
        state: &RetryState,
        retry_enabled: bool,
    ) -> Decision {
        if !retry_enabled || !classification.retryable {
            return Decision::Fail { exhausted: false };
        }
        if state.attempts_made >= self.backoff.max_retries {
            return Decision::Fail { exhausted: true };
        }
        Decision::Retry {
            wait: Duration::from_millis(self.next_wait_ms(state.attempts_made)),
        }
    }
}
