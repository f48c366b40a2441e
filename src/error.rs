use std::fmt;

use crate::{retry::FailureClass, Response};

/// Error type returned by this crate.
///
/// Every outcome of a request is delivered through its [`Completion`](crate::Completion);
/// this type is the failure half of that contract.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport failed to produce a response.
    #[error("transport error: {0}")]
    Transport(TransportError),
    /// The server answered with a non-success HTTP status.
    #[error("http error {}: {}", .0.status, .0.body)]
    Http(Response),
    /// Every allowed retry was spent; `last` is the final attempt's failure.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of transport attempts made, including the first.
        attempts: usize,
        /// Failure reported by the last attempt.
        last: Box<Error>,
        /// Class the retry policy assigned to `last`.
        class: FailureClass,
    },
    /// Backoff or client options failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A header name or value could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    /// A response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// The request was dropped before it reached a terminal state.
    #[error("request canceled before completion")]
    Canceled,
}

impl Error {
    /// Returns `true` when the request failed because retries ran out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Response attached to this failure, looking through exhaustion.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Http(response) => Some(response),
            Self::Exhausted { last, .. } => last.response(),
            _ => None,
        }
    }

    /// HTTP status attached to this failure, if a response was received.
    pub fn status(&self) -> Option<u16> {
        self.response().map(|response| response.status)
    }

    /// Transport error attached to this failure, looking through exhaustion.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(err) => Some(err),
            Self::Exhausted { last, .. } => last.transport(),
            _ => None,
        }
    }

    /// Failure class of the underlying attempt error.
    ///
    /// Exhaustion reports the class the retry policy assigned. A bare HTTP
    /// failure is classified with default policy settings, so a 500 reads as
    /// [`FailureClass::TerminalServer`] there. Configuration and cancellation
    /// errors never come from an attempt and have no class.
    pub fn class(&self) -> Option<FailureClass> {
        match self {
            Self::Transport(err) => Some(FailureClass::of_transport(err.kind)),
            Self::Http(response) => Some(FailureClass::of_status(response.status, false)),
            Self::Exhausted { class, .. } => Some(*class),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

/// Kind of failure a transport reports when no response was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The peer reset the connection.
    ConnectionReset,
    /// Establishing the connection timed out.
    ConnectionTimeout,
    /// The host name could not be resolved.
    AddressResolution,
    /// The socket went idle past the transport's own read deadline.
    SocketTimeout,
    /// The request's local deadline passed before any response arrived.
    Timeout,
    /// A browser-style cross-origin check denied the request.
    CrossOriginDenied,
    /// Anything else, such as a malformed URL or a body encoding failure.
    Other,
}

impl TransportErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionReset => "connection reset",
            Self::ConnectionTimeout => "connection timed out",
            Self::AddressResolution => "address resolution failed",
            Self::SocketTimeout => "socket timed out",
            Self::Timeout => "timeout",
            Self::CrossOriginDenied => "cross-origin request denied",
            Self::Other => "transport failure",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a [`Transport`](crate::Transport) attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Local deadline error, worded like the classic `timeout of Nms exceeded`.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            TransportErrorKind::Timeout,
            format!("timeout of {timeout_ms}ms exceeded"),
        )
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::{Error, TransportError, TransportErrorKind};
    use crate::{retry::FailureClass, Response};

    #[test]
    fn exhausted_exposes_last_response() {
        let err = Error::Exhausted {
            attempts: 4,
            last: Box::new(Error::Http(Response::new(503, "busy"))),
            class: FailureClass::TransientServer,
        };

        assert!(err.is_exhausted());
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.class(), Some(FailureClass::TransientServer));
        assert!(err.transport().is_none());
    }

    #[test]
    fn exhausted_reports_policy_class_over_default_status_class() {
        let err = Error::Exhausted {
            attempts: 3,
            last: Box::new(Error::Http(Response::new(500, "boom"))),
            class: FailureClass::TransientServer,
        };

        assert_eq!(err.class(), Some(FailureClass::TransientServer));
        assert_eq!(
            Error::Http(Response::new(500, "boom")).class(),
            Some(FailureClass::TerminalServer)
        );
    }

    #[test]
    fn timeout_message_matches_deadline() {
        let err = TransportError::timeout(100);
        assert_eq!(err.kind, TransportErrorKind::Timeout);
        assert_eq!(err.to_string(), "timeout: timeout of 100ms exceeded");
    }
}
