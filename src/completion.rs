use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::{Error, Response, Result};

/// Deferred result of a submitted request.
///
/// Resolves exactly once with the request's terminal outcome. Dropping it
/// does not cancel the request; queued work behind it still runs in order.
#[derive(Debug)]
#[must_use = "a Completion does nothing unless awaited; the request runs regardless"]
pub struct Completion {
    rx: oneshot::Receiver<Result<Response>>,
}

/// Sending half owned by the executor; consumed on first use.
#[derive(Debug)]
pub(crate) struct Completer {
    tx: oneshot::Sender<Result<Response>>,
}

pub(crate) fn channel() -> (Completer, Completion) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, Completion { rx })
}

impl Completer {
    /// Delivers the outcome. A caller that already dropped its
    /// [`Completion`] simply never observes it.
    pub(crate) fn complete(self, outcome: Result<Response>) {
        let _ = self.tx.send(outcome);
    }
}

impl Completion {
    /// Completion that is already resolved, used for requests rejected before dispatch.
    pub(crate) fn ready(outcome: Result<Response>) -> Self {
        let (completer, completion) = channel();
        completer.complete(outcome);
        completion
    }
}

impl Future for Completion {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Canceled)))
    }
}
