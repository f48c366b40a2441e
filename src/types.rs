use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

use crate::{Error, Result};

/// Response produced by a transport attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// `true` for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `true` for 4xx and 5xx statuses, which the engine treats as failures.
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|err| Error::Decode(format!("invalid response JSON: {err}")))
    }
}

/// Request body carried unchanged across attempts.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
    Bytes(Vec<u8>),
}

/// Lifecycle of a single request inside the executor.
///
/// `RetryScheduled` loops back to `InFlight` until the request settles in
/// `Succeeded` or `FailedTerminal`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestState {
    Pending,
    InFlight,
    RetryScheduled,
    Succeeded,
    FailedTerminal,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedTerminal)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: RequestState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::InFlight, Self::Succeeded)
                | (Self::InFlight, Self::FailedTerminal)
                | (Self::InFlight, Self::RetryScheduled)
                | (Self::RetryScheduled, Self::InFlight)
        )
    }
}
