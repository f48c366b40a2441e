use std::{fmt, sync::Arc};

use tokio::runtime::Handle;

use crate::{
    completion::{self, Completion},
    executor::RequestExecutor,
    queue, Error, HttpTransport, QueueHandle, QueueOptions, RequestDescriptor, Response, Result,
    RetryPolicy, Transport,
};

/// Queueing, retrying client over a single transport instance.
///
/// Cloning is cheap and clones share the transport and policy. Independent
/// clients never share retry state.
pub struct QueueClient<T = HttpTransport> {
    executor: Arc<RequestExecutor<T>>,
    options: QueueOptions,
}

impl<T> Clone for QueueClient<T> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            options: self.options.clone(),
        }
    }
}

impl<T> fmt::Debug for QueueClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueClient")
            .field("options", &self.options)
            .finish()
    }
}

impl QueueClient<HttpTransport> {
    /// Creates a client over a default `reqwest` transport with default options.
    pub fn new() -> Self {
        Self::with_transport(HttpTransport::new())
    }
}

impl Default for QueueClient<HttpTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> QueueClient<T> {
    /// Creates a client over `transport` with default options.
    pub fn with_transport(transport: T) -> Self {
        Self {
            executor: Arc::new(RequestExecutor::with_defaults(Arc::new(transport))),
            options: QueueOptions::default(),
        }
    }

    /// Returns a client with new timeout, backoff and retry options over the
    /// same transport.
    ///
    /// Fails with [`Error::Config`] when the options do
    /// not validate. Requests already submitted keep the policy they started with.
    pub fn with_options(&self, options: QueueOptions) -> Result<Self> {
        let transport = Arc::clone(self.executor.transport());
        let executor = RequestExecutor::new(transport, options.clone())?;
        Ok(Self {
            executor: Arc::new(executor),
            options,
        })
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.executor.policy()
    }

    pub fn transport(&self) -> &T {
        self.executor.transport().as_ref()
    }

    /// Creates a queue for explicit serialization groups.
    pub fn new_queue(&self) -> QueueHandle {
        QueueHandle::new()
    }

    /// Submits a request and returns its deferred result without waiting.
    ///
    /// Requests tagged with a queue run strictly after everything submitted
    /// on that queue before them; untagged requests start immediately.
    /// Outside a Tokio runtime the completion resolves to [`Error::Config`].
    pub fn send(&self, mut descriptor: RequestDescriptor) -> Completion {
        if descriptor.url.trim().is_empty() {
            return Completion::ready(Err(Error::Config("request url is empty".to_owned())));
        }
        if Handle::try_current().is_err() {
            return Completion::ready(Err(Error::Config(
                "send requires a running tokio runtime".to_owned(),
            )));
        }

        let (completer, completion) = completion::channel();
        let target = descriptor.queue.take();
        let job = Arc::clone(&self.executor).job(descriptor, completer);

        match target {
            Some(queue) => queue::enqueue(&queue, job),
            None => queue::dispatch_unqueued(job),
        }
        completion
    }

    /// Submits a request and waits for its terminal outcome.
    pub async fn execute(&self, descriptor: RequestDescriptor) -> Result<Response> {
        self.send(descriptor).await
    }
}

#[cfg(test)]
mod tests {
    use super::QueueClient;
    use crate::{BackoffConfig, Error, QueueOptions, RequestDescriptor};

    #[test]
    fn invalid_options_are_rejected() {
        let result = QueueClient::new().with_options(QueueOptions {
            backoff: BackoffConfig {
                growth_factor: 0.0,
                ..BackoffConfig::default()
            },
            ..QueueOptions::default()
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn derived_clients_keep_independent_policies() {
        let base = QueueClient::new();
        let tuned = base
            .with_options(QueueOptions {
                backoff: BackoffConfig {
                    max_retries: 9,
                    ..BackoffConfig::default()
                },
                ..QueueOptions::default()
            })
            .expect("options must be valid");

        assert_eq!(base.policy().max_retries(), 5);
        assert_eq!(tuned.policy().max_retries(), 9);
    }

    #[tokio::test]
    async fn empty_url_is_rejected_without_dispatch() {
        let client = QueueClient::new();
        let queue = client.new_queue();
        let err = client
            .execute(RequestDescriptor::get("  ").queue(&queue))
            .await
            .expect_err("empty url must be rejected");
        assert!(matches!(err, Error::Config(_)));
        assert!(queue.is_empty());
    }

    #[test]
    fn send_outside_runtime_resolves_to_config_error() {
        let client = QueueClient::new();
        let queue = client.new_queue();
        let completion = client.send(RequestDescriptor::get("http://localhost/").queue(&queue));
        assert!(queue.is_empty());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime must build");
        let err = runtime
            .block_on(completion)
            .expect_err("no runtime was available at send time");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn debug_shows_options() {
        let client = QueueClient::new();
        let debug = format!("{client:?}");
        assert!(debug.contains("QueueOptions"));
        assert_eq!(client.policy().max_retries(), 5);
    }
}
