use std::{
    future::Future,
    panic::{catch_unwind, AssertUnwindSafe},
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use tokio::time::{sleep, timeout};

use crate::{
    completion::Completer,
    retry::{Decision, RetryPolicy, RetryState},
    transport::Attempt,
    Error, FailureNotifier, QueueOptions, RequestDescriptor, RequestState, Response, Result,
    Transport, TransportError,
};

/// Boxed unit of work handed to the queue manager.
pub(crate) type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Drives one request through attempts until it succeeds or fails for good.
pub(crate) struct RequestExecutor<T> {
    transport: Arc<T>,
    policy: RetryPolicy,
    default_timeout: Duration,
    retry_enabled: bool,
    notifier: Option<FailureNotifier>,
}

impl<T: Transport> RequestExecutor<T> {
    pub(crate) fn new(transport: Arc<T>, options: QueueOptions) -> Result<Self> {
        options.validate()?;
        let policy = RetryPolicy::new(options.backoff.clone())?;
        Ok(Self::assemble(transport, options, policy))
    }

    /// Executor with [`QueueOptions::default`], which always validate.
    pub(crate) fn with_defaults(transport: Arc<T>) -> Self {
        Self::assemble(transport, QueueOptions::default(), RetryPolicy::default())
    }

    fn assemble(transport: Arc<T>, options: QueueOptions, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            default_timeout: Duration::from_millis(options.timeout_ms),
            retry_enabled: options.retry_enabled,
            notifier: options.connection_error_handler,
        }
    }

    pub(crate) fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub(crate) fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Packages `descriptor` into a job that resolves `completer` when done.
    pub(crate) fn job(self: Arc<Self>, descriptor: RequestDescriptor, completer: Completer) -> Job {
        Box::pin(async move {
            let outcome = self.execute(&descriptor).await;
            completer.complete(outcome);
        })
    }

    /// Runs attempts for `descriptor`, retrying transient failures per policy.
    pub(crate) async fn execute(&self, descriptor: &RequestDescriptor) -> Result<Response> {
        let budget = descriptor.timeout.unwrap_or(self.default_timeout);
        let retry_enabled = descriptor.retry_enabled.unwrap_or(self.retry_enabled);
        let notifier = descriptor.on_failure.as_ref().or(self.notifier.as_ref());

        let mut state = RequestState::Pending;
        let mut retry = RetryState::new();

        loop {
            transition(&mut state, RequestState::InFlight);
            let attempt = Attempt::prepare(descriptor, retry.attempts_made + 1, budget);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                method = %attempt.method,
                url = %attempt.url,
                attempt = attempt.number,
                "dispatching request"
            );

            let (failure, classification) = match self.submit(&attempt).await {
                Ok(response) if !response.is_error() => {
                    transition(&mut state, RequestState::Succeeded);
                    return Ok(response);
                }
                Ok(response) => {
                    let classification = self.policy.classify(None, Some(&response));
                    (Error::Http(response), classification)
                }
                Err(err) => {
                    let classification = self.policy.classify(Some(&err), None);
                    (Error::Transport(err), classification)
                }
            };

            match self.policy.decide(classification, &retry, retry_enabled) {
                Decision::Fail { exhausted } => {
                    transition(&mut state, RequestState::FailedTerminal);
                    if !exhausted {
                        return Err(failure);
                    }

                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        url = %descriptor.url,
                        retries = retry.attempts_made,
                        error = %failure,
                        "retries exhausted"
                    );

                    return Err(Error::Exhausted {
                        attempts: attempt.number,
                        last: Box::new(failure),
                        class: classification.class,
                    });
                }
                Decision::Retry { wait } => {
                    transition(&mut state, RequestState::RetryScheduled);
                    if let Some(notifier) = notifier {
                        notify(notifier, &failure);
                    }
                    let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
                    retry.record(wait_ms);

                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        url = %descriptor.url,
                        retry = retry.attempts_made,
                        class = ?classification.class,
                        "retrying request after {} ms",
                        wait_ms
                    );

                    sleep(wait).await;
                }
            }
        }
    }

    /// Submits one attempt under its deadline; expiry drops the in-flight future.
    async fn submit(&self, attempt: &Attempt) -> std::result::Result<Response, TransportError> {
        match timeout(attempt.timeout, self.transport.submit(attempt)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let timeout_ms = u64::try_from(attempt.timeout.as_millis()).unwrap_or(u64::MAX);
                Err(TransportError::timeout(timeout_ms))
            }
        }
    }
}

fn transition(state: &mut RequestState, next: RequestState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal request transition {state:?} -> {next:?}"
    );
    *state = next;
}

/// Reports a retried failure; a panicking callback must not stall the request.
fn notify(notifier: &FailureNotifier, failure: &Error) {
    if catch_unwind(AssertUnwindSafe(|| notifier.notify(failure))).is_err() {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %failure, "failure notifier panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use super::RequestExecutor;
    use crate::{
        retry::FailureClass, transport::Attempt, BackoffConfig, Error, QueueOptions,
        RequestDescriptor, Response, Transport, TransportError, TransportErrorKind,
    };

    type Step = std::result::Result<Response, TransportError>;

    /// Replays canned outcomes and records every attempt it sees.
    struct Scripted {
        steps: Mutex<VecDeque<Step>>,
        seen: Mutex<Vec<Attempt>>,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for Scripted {
        async fn submit(&self, attempt: &Attempt) -> Step {
            self.seen.lock().expect("lock").push(attempt.clone());
            let step = self.steps.lock().expect("lock").pop_front();
            step.unwrap_or_else(|| Ok(Response::new(200, "default")))
        }
    }

    fn options(max_retries: usize) -> QueueOptions {
        QueueOptions {
            retry_enabled: true,
            backoff: BackoffConfig {
                max_retries,
                ..BackoffConfig::default()
            }
            .with_override(|_| 1),
            ..QueueOptions::default()
        }
    }

    fn reset() -> Step {
        Err(TransportError::new(TransportErrorKind::ConnectionReset, "reset"))
    }

    #[tokio::test]
    async fn retries_preserve_descriptor_state() {
        let executor = RequestExecutor::new(
            Arc::new(Scripted::new(vec![reset(), Ok(Response::new(503, "busy"))])),
            options(5),
        )
        .expect("options must be valid");
        let descriptor = RequestDescriptor::put("http://svc/items/1")
            .try_header("x-request-id", "42")
            .expect("header must parse")
            .text("body")
            .timeout(Duration::from_millis(250));

        let response = executor.execute(&descriptor).await.expect("third attempt succeeds");
        assert_eq!(response.text(), "default");

        let seen = executor.transport().seen.lock().expect("lock").clone();
        assert_eq!(seen.len(), 3);
        for (index, attempt) in seen.iter().enumerate() {
            assert_eq!(attempt.number, index + 1);
            assert_eq!(attempt.headers, seen[0].headers);
            assert_eq!(attempt.payload, seen[0].payload);
            assert_eq!(attempt.timeout, Duration::from_millis(250));
        }
    }

    #[tokio::test]
    async fn panicking_notifier_does_not_block_completion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let executor = RequestExecutor::new(Arc::new(Scripted::new(vec![reset()])), options(3))
            .expect("options must be valid");
        let descriptor = RequestDescriptor::get("http://svc").on_failure(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("notifier exploded");
        });

        let response = executor.execute(&descriptor).await.expect("retry succeeds");
        assert_eq!(response.status, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn client_notifier_is_fallback_for_requests_without_one() {
        let client_calls = Arc::new(AtomicUsize::new(0));
        let request_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&client_calls);
        let executor = RequestExecutor::new(
            Arc::new(Scripted::new(vec![
                reset(),
                Ok(Response::new(200, "ok")),
                reset(),
            ])),
            options(3).with_connection_error_handler(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("options must be valid");

        executor
            .execute(&RequestDescriptor::get("http://svc"))
            .await
            .expect("retry succeeds");
        assert_eq!(client_calls.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&request_calls);
        executor
            .execute(&RequestDescriptor::get("http://svc").on_failure(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .expect("retry succeeds");
        assert_eq!(client_calls.load(Ordering::SeqCst), 1);
        assert_eq!(request_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_retries_exhausts_on_first_transient_failure() {
        let executor = RequestExecutor::new(Arc::new(Scripted::new(vec![reset()])), options(0))
            .expect("options must be valid");

        let err = executor
            .execute(&RequestDescriptor::get("http://svc"))
            .await
            .expect_err("no retries allowed");
        match err {
            Error::Exhausted { attempts, last, class } => {
                assert_eq!(attempts, 1);
                assert!(matches!(*last, Error::Transport(_)));
                assert_eq!(class, FailureClass::TransientNetwork);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn opted_in_internal_server_error_exhausts_as_transient() {
        let mut opted_in = options(2);
        opted_in.backoff.retry_internal_server_error = true;
        let executor = RequestExecutor::new(
            Arc::new(Scripted::new(
                (0..3).map(|_| Ok(Response::new(500, "boom"))).collect(),
            )),
            opted_in,
        )
        .expect("options must be valid");

        let err = executor
            .execute(&RequestDescriptor::get("http://svc"))
            .await
            .expect_err("500 never clears");
        assert!(err.is_exhausted());
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.class(), Some(FailureClass::TransientServer));
        assert_eq!(executor.transport().seen.lock().expect("lock").len(), 3);
    }

    #[test]
    fn default_executor_matches_validated_defaults() {
        let defaults = RequestExecutor::with_defaults(Arc::new(Scripted::new(Vec::new())));
        let validated =
            RequestExecutor::new(Arc::new(Scripted::new(Vec::new())), QueueOptions::default())
                .expect("defaults must validate");

        assert_eq!(defaults.default_timeout, validated.default_timeout);
        assert_eq!(defaults.retry_enabled, validated.retry_enabled);
        assert_eq!(defaults.policy().max_retries(), validated.policy().max_retries());
        assert!(defaults.notifier.is_none());
    }
}
