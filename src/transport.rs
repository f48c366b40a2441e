use std::{error::Error as StdError, future::Future, io, time::Duration};

use reqwest::{header::HeaderMap, Method};

use crate::{Auth, Payload, RequestDescriptor, Response, TransportError, TransportErrorKind};

/// One submission of a request to the transport.
///
/// A new `Attempt` is built from the descriptor for every try, so nothing a
/// previous attempt left behind (timers, aborted handles, flags) leaks into
/// the next one.
#[derive(Clone, Debug)]
pub struct Attempt {
    /// 1 for the initial submission, incremented per retry.
    pub number: usize,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub auth: Auth,
    pub payload: Option<Payload>,
    pub timeout: Duration,
}

impl Attempt {
    pub(crate) fn prepare(descriptor: &RequestDescriptor, number: usize, timeout: Duration) -> Self {
        Self {
            number,
            method: descriptor.method.clone(),
            url: descriptor.url.clone(),
            headers: descriptor.headers.clone(),
            auth: descriptor.auth.clone(),
            payload: descriptor.payload.clone(),
            timeout,
        }
    }
}

/// Executes attempts on behalf of the queueing engine.
///
/// Any HTTP status is reported as `Ok`; `Err` means no response was obtained.
/// The engine enforces the attempt deadline itself and drops the returned
/// future when it expires.
pub trait Transport: Send + Sync + 'static {
    fn submit(
        &self,
        attempt: &Attempt,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send;
}

/// [`Transport`] backed by a `reqwest::Client`.
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a preconfigured client (proxies, TLS roots, pools).
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Transport for HttpTransport {
    async fn submit(&self, attempt: &Attempt) -> Result<Response, TransportError> {
        // the attempt deadline is enforced by the executor, not by reqwest
        let mut request = self
            .http
            .request(attempt.method.clone(), &attempt.url)
            .headers(attempt.headers.clone());

        request = match &attempt.auth {
            Auth::None => request,
            Auth::Bearer(value) | Auth::Raw(value) => {
                request.header(reqwest::header::AUTHORIZATION, value)
            }
            Auth::Basic { username, password } => request.basic_auth(username, password.as_ref()),
        };

        request = match &attempt.payload {
            None => request,
            Some(Payload::Json(body)) => request.json(body),
            Some(Payload::Text(body)) => request.body(body.clone()),
            Some(Payload::Bytes(body)) => request.body(body.clone()),
        };

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    TransportError::new(classify_reqwest_error(&err), err.to_string())
}

fn classify_reqwest_error(err: &reqwest::Error) -> TransportErrorKind {
    if let Some(kind) = io_error_kind(err) {
        match kind {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => return TransportErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionRefused => return TransportErrorKind::Other,
            io::ErrorKind::TimedOut => {
                return if err.is_connect() {
                    TransportErrorKind::ConnectionTimeout
                } else {
                    TransportErrorKind::SocketTimeout
                };
            }
            _ => {}
        }
    }

    if err.is_timeout() {
        return if err.is_connect() {
            TransportErrorKind::ConnectionTimeout
        } else {
            TransportErrorKind::SocketTimeout
        };
    }

    if err.is_connect() && mentions_dns(err) {
        return TransportErrorKind::AddressResolution;
    }

    if err.is_request() || err.is_body() {
        // hyper reports an abruptly closed connection as a request/body error
        if mentions(err, "connection closed") || mentions(err, "connection reset") {
            return TransportErrorKind::ConnectionReset;
        }
    }

    TransportErrorKind::Other
}

fn io_error_kind(err: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = inner.source();
    }
    None
}

fn mentions_dns(err: &reqwest::Error) -> bool {
    mentions(err, "dns error") || mentions(err, "failed to lookup address")
}

fn mentions(err: &reqwest::Error, needle: &str) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(inner) = source {
        if inner.to_string().to_ascii_lowercase().contains(needle) {
            return true;
        }
        source = inner.source();
    }
    false
}
