//! Per-queue FIFO serialization.
//!
//! A queue holds its entries in submission order. Only the head entry is ever
//! in flight, and it stays at the head for its entire retry lifetime; it is
//! removed only once it has resolved, at which point the next entry starts.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{executor::Job, RequestState};

/// Shared handle to one serialization group.
///
/// Clone it freely; every clone refers to the same queue. Distinct queues run
/// fully concurrently with each other.
#[derive(Clone, Default)]
pub struct QueueHandle {
    inner: Arc<Mutex<QueueState>>,
}

/// Creates an empty queue.
pub fn new_queue() -> QueueHandle {
    QueueHandle::new()
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    next_seq: u64,
}

struct QueueEntry {
    seq: u64,
    state: RequestState,
    job: Option<Job>,
}

impl QueueHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries not yet resolved, including the one in flight.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// `true` while the head entry is executing.
    pub fn has_in_flight(&self) -> bool {
        self.lock()
            .entries
            .front()
            .is_some_and(|entry| entry.state == RequestState::InFlight)
    }

    /// Whether both handles refer to the same queue.
    pub fn same_queue(&self, other: &QueueHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("QueueHandle")
            .field("len", &state.entries.len())
            .field(
                "in_flight",
                &state
                    .entries
                    .front()
                    .is_some_and(|entry| entry.state == RequestState::InFlight),
            )
            .finish()
    }
}

impl QueueState {
    /// Marks the head in flight and hands out its job, if it has not started yet.
    fn start_head(&mut self) -> Option<(u64, Job)> {
        let head = self.entries.front_mut()?;
        let job = head.job.take()?;
        head.state = RequestState::InFlight;
        Some((head.seq, job))
    }
}

/// Appends `job` to `queue`, starting it at once if the queue was empty.
///
/// Never blocks on the work itself.
pub(crate) fn enqueue(queue: &QueueHandle, job: Job) {
    let next = {
        let mut state = queue.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push_back(QueueEntry {
            seq,
            state: RequestState::Pending,
            job: Some(job),
        });

        #[cfg(feature = "tracing")]
        tracing::trace!(seq, depth = state.entries.len(), "request enqueued");

        if state.entries.len() == 1 {
            state.start_head()
        } else {
            None
        }
    };

    if let Some((seq, job)) = next {
        dispatch(queue.clone(), seq, job);
    }
}

/// Removes the resolved head `seq` and starts the next entry, if any.
///
/// No-op when the queue is empty or `seq` is not at the head.
pub(crate) fn advance(queue: &QueueHandle, seq: u64) {
    let next = {
        let mut state = queue.lock();
        if state.entries.front().map(|entry| entry.seq) != Some(seq) {
            return;
        }
        state.entries.pop_front();

        #[cfg(feature = "tracing")]
        tracing::trace!(seq, remaining = state.entries.len(), "queue advanced");

        state.start_head()
    };

    if let Some((seq, job)) = next {
        dispatch(queue.clone(), seq, job);
    }
}

/// Runs a job that belongs to no queue.
pub(crate) fn dispatch_unqueued(job: Job) {
    tokio::spawn(job);
}

fn dispatch(queue: QueueHandle, seq: u64, job: Job) {
    tokio::spawn(async move {
        // advances even if the job panics, so later entries are not stranded
        let _advance = AdvanceOnDrop { queue, seq };
        job.await;
    });
}

struct AdvanceOnDrop {
    queue: QueueHandle,
    seq: u64,
}

impl Drop for AdvanceOnDrop {
    fn drop(&mut self) {
        advance(&self.queue, self.seq);
    }
}
