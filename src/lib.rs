//! `queued-http` serializes HTTP requests into FIFO queues and retries
//! transient failures on a growing backoff schedule.
//!
//! - [`QueueClient::send`] submits a [`RequestDescriptor`] and returns a
//!   [`Completion`] that resolves exactly once.
//! - [`new_queue`] creates a [`QueueHandle`]; requests tagged with the same
//!   handle run one at a time, in submission order, while distinct queues
//!   run concurrently.
//! - [`RetryPolicy`] decides which failures are transient and how long to
//!   wait before each retry.
//!
//! The HTTP layer is pluggable through [`Transport`]; [`HttpTransport`]
//! wraps `reqwest`.

mod client;
mod completion;
mod error;
mod executor;
mod options;
mod queue;
mod request;
mod retry;
mod transport;
mod types;

pub use client::QueueClient;
pub use completion::Completion;
pub use error::{Error, TransportError, TransportErrorKind};
pub use options::{BackoffConfig, FailureNotifier, QueueOptions, WaitOverride, MAX_RETRIES_LIMIT};
pub use queue::{new_queue, QueueHandle};
pub use request::{Auth, RequestDescriptor};
pub use retry::{Classification, Decision, FailureClass, RetryPolicy, RetryState};
pub use transport::{Attempt, HttpTransport, Transport};
pub use types::{Payload, RequestState, Response};

pub use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method,
};

pub type Result<T> = std::result::Result<T, Error>;
