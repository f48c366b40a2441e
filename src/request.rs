use std::{fmt, time::Duration};

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method,
};

use crate::{Error, FailureNotifier, Payload, QueueHandle, Result};

/// How a request authenticates itself.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Auth {
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// HTTP basic authentication.
    Basic {
        username: String,
        password: Option<String>,
    },
    /// Full raw `Authorization` header value, e.g. a custom scheme.
    Raw(String),
}

impl Auth {
    /// Bearer auth from a token; the `Bearer ` prefix is added if missing.
    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self::Bearer(normalize_bearer_authorization(token.as_ref()))
    }

    pub fn basic(username: impl Into<String>, password: Option<impl Into<String>>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.map(Into::into),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Raw(_) => f.write_str("Raw(<redacted>)"),
        }
    }
}

/// Everything needed to (re)issue one logical request.
///
/// Descriptor-level state is never touched by the engine; every attempt is
/// built from a fresh snapshot of it.
#[derive(Clone)]
pub struct RequestDescriptor {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) headers: HeaderMap,
    pub(crate) payload: Option<Payload>,
    pub(crate) auth: Auth,
    pub(crate) timeout: Option<Duration>,
    pub(crate) queue: Option<QueueHandle>,
    pub(crate) retry_enabled: Option<bool>,
    pub(crate) on_failure: Option<FailureNotifier>,
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers.len())
            .field("payload", &self.payload.is_some())
            .field("auth", &self.auth)
            .field("timeout", &self.timeout)
            .field("queued", &self.queue.is_some())
            .field("retry_enabled", &self.retry_enabled)
            .finish()
    }
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            payload: None,
            auth: Auth::None,
            timeout: None,
            queue: None,
            retry_enabled: None,
            on_failure: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Parses and sets a header from strings.
    pub fn try_header(self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| Error::InvalidHeader(format!("{name}: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| Error::InvalidHeader(format!("{name}: {err}")))?;
        Ok(self.header(name, value))
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.payload = Some(Payload::Json(body));
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.payload = Some(Payload::Text(body.into()));
        self
    }

    pub fn bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(Payload::Bytes(body.into()));
        self
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn bearer_auth(self, token: impl AsRef<str>) -> Self {
        self.auth(Auth::bearer(token))
    }

    pub fn basic_auth(self, username: impl Into<String>, password: Option<impl Into<String>>) -> Self {
        self.auth(Auth::basic(username, password))
    }

    /// Per-request timeout; overrides the client default and applies to every attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Serializes this request behind the others submitted on `queue`.
    pub fn queue(mut self, queue: &QueueHandle) -> Self {
        self.queue = Some(queue.clone());
        self
    }

    /// Enables or disables retries for this request, overriding the client default.
    pub fn retry(mut self, enabled: bool) -> Self {
        self.retry_enabled = Some(enabled);
        self
    }

    /// Enables retries and reports each retried failure to `handler`.
    pub fn retry_on_connection_failure(self, handler: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.retry(true).on_failure(handler)
    }

    /// Installs a per-request failure callback, taking precedence over the client's.
    pub fn on_failure(mut self, handler: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(FailureNotifier::new(handler));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn is_queued(&self) -> bool {
        self.queue.is_some()
    }
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_bearer_authorization, Auth, RequestDescriptor};
    use crate::Error;

    #[test]
    fn normalize_bearer_adds_prefix_when_missing() {
        assert_eq!(
            normalize_bearer_authorization("abc123"),
            "Bearer abc123".to_owned()
        );
    }

    #[test]
    fn normalize_bearer_keeps_existing_prefix() {
        assert_eq!(
            normalize_bearer_authorization("bEaReR abc123"),
            "bEaReR abc123".to_owned()
        );
    }

    #[test]
    fn debug_redacts_credentials() {
        let request = RequestDescriptor::get("https://api.test/items")
            .auth(Auth::basic("kit", Some("hunter2")));
        let debug = format!("{request:?}");
        assert!(debug.contains("kit"));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("hunter2"));

        let debug = format!("{:?}", Auth::bearer("secret-token"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn try_header_rejects_invalid_names() {
        let err = RequestDescriptor::get("https://api.test")
            .try_header("bad header", "v")
            .expect_err("space is not a valid header name");
        assert!(matches!(err, Error::InvalidHeader(_)));
    }

    #[test]
    fn retry_on_connection_failure_enables_retry() {
        let request = RequestDescriptor::get("https://api.test").retry_on_connection_failure(|_| {});
        assert_eq!(request.retry_enabled, Some(true));
        assert!(request.on_failure.is_some());
        assert!(!request.is_queued());
    }
}
