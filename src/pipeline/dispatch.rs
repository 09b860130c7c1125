//! The dispatcher thread and the worker pool it feeds.
//!
//! The dispatcher takes batches off the queue, waits for an admission permit,
//! and submits one task per batch. A task walks the accumulator slots in
//! registration order; each slot admits batches strictly by sequence number,
//! so tasks form a wavefront and no accumulator sees records out of order.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::core::record::AlignmentRecord;
use crate::pipeline::accumulator::{AccumulatorSlot, SlotError};
use crate::pipeline::batch::{Batch, QueueMessage};
use crate::pipeline::{AbortReason, PipelineError};
use crate::utils::sync::{CancellationToken, Permit, Semaphore};

/// How long the dispatcher waits on an empty queue before re-checking cancellation.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Fixed pool of workers applying batches to the accumulator slots.
pub(crate) struct WorkerPool<R> {
    pool: rayon::ThreadPool,
    slots: Arc<Vec<AccumulatorSlot<R>>>,
    permits: Arc<Semaphore>,
    failure: Arc<Mutex<Option<PipelineError>>>,
}

impl<R: AlignmentRecord> WorkerPool<R> {
    /// Pool of `size` workers, admitting at most `size` batches at a time.
    pub fn new(size: usize, slots: Arc<Vec<AccumulatorSlot<R>>>) -> Result<Self, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("seqpass-worker-{i}"))
            .build()?;
        Ok(Self {
            pool,
            slots,
            permits: Semaphore::new(size),
            failure: Arc::new(Mutex::new(None)),
        })
    }

    pub fn size(&self) -> usize {
        self.permits.capacity()
    }

    /// Wait for a free worker; `None` if cancelled first.
    pub fn admit(&self, cancel: &CancellationToken) -> Option<Permit> {
        self.permits.acquire_unless_cancelled(cancel)
    }

    /// Run `batch` on the pool; the permit is returned when the task ends.
    pub fn submit(&self, batch: Batch<R>, permit: Permit) {
        let slots = Arc::clone(&self.slots);
        let failure = Arc::clone(&self.failure);

        self.pool.spawn_fifo(move || {
            // Declared first so it is released last, after the slot handle
            let _permit = permit;
            let slots = slots;
            let failure = failure;
            let batch = batch;

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| apply_batch(&slots, &batch)));
            let error = match outcome {
                Ok(Ok(()) | Err(SlotError::Aborted)) => return,
                Ok(Err(SlotError::Failed { name, source })) => PipelineError::Accumulator {
                    name,
                    batch: batch.sequence(),
                    source,
                },
                Err(_) => {
                    error!(batch = batch.sequence(), "Worker panicked while applying batch");
                    PipelineError::Aborted(AbortReason::WorkerPanicked)
                }
            };
            fail(&slots, &failure, error);
        });
    }

    pub fn has_failed(&self) -> bool {
        self.failure.lock().is_some()
    }

    pub fn take_failure(&self) -> Option<PipelineError> {
        self.failure.lock().take()
    }

    /// Stop every slot from admitting further batches.
    pub fn abort(&self) {
        for slot in self.slots.iter() {
            slot.abort();
        }
    }

    /// Wait for every admitted batch to finish.
    pub fn drain(&self, timeout: Duration) -> Result<(), PipelineError> {
        if self.permits.wait_idle(timeout) {
            Ok(())
        } else {
            Err(PipelineError::Aborted(AbortReason::ShutdownTimeout(timeout)))
        }
    }
}

fn apply_batch<R>(slots: &[AccumulatorSlot<R>], batch: &Batch<R>) -> Result<(), SlotError> {
    for slot in slots {
        slot.apply(batch)?;
    }
    Ok(())
}

/// Record the first failure, then wake and refuse everything waiting on a slot.
fn fail<R>(
    slots: &[AccumulatorSlot<R>],
    failure: &Mutex<Option<PipelineError>>,
    error: PipelineError,
) {
    failure.lock().get_or_insert(error);
    for slot in slots {
        slot.abort();
    }
}

/// How the dispatcher loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchEnd {
    /// The terminal marker arrived
    Completed,
    /// The producer went away without sending the terminal marker
    Disconnected,
    /// A worker failed; remaining batches were not admitted
    WorkerFailed,
}

/// Moves batches from the queue onto the worker pool.
pub(crate) struct Dispatcher<'a, R> {
    queue: Receiver<QueueMessage<R>>,
    pool: &'a WorkerPool<R>,
    cancel: &'a CancellationToken,
}

impl<'a, R: AlignmentRecord> Dispatcher<'a, R> {
    pub fn new(
        queue: Receiver<QueueMessage<R>>,
        pool: &'a WorkerPool<R>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            queue,
            pool,
            cancel,
        }
    }

    /// Dispatch until the terminal marker, a worker failure, or cancellation.
    ///
    /// Returning drops the queue receiver, which unblocks a producer waiting
    /// on a full queue.
    pub fn run(self) -> Result<DispatchEnd, PipelineError> {
        let mut admitted = 0u64;
        let end = loop {
            if self.cancel.is_cancelled() {
                self.pool.abort();
                return Err(PipelineError::Aborted(AbortReason::Cancelled));
            }
            if self.pool.has_failed() {
                break DispatchEnd::WorkerFailed;
            }

            let batch = match self.queue.recv_timeout(RECV_POLL_INTERVAL) {
                Ok(QueueMessage::Batch(batch)) => batch,
                Ok(QueueMessage::Done) => break DispatchEnd::Completed,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break DispatchEnd::Disconnected,
            };

            let Some(permit) = self.pool.admit(self.cancel) else {
                self.pool.abort();
                return Err(PipelineError::Aborted(AbortReason::Cancelled));
            };
            self.pool.submit(batch, permit);
            admitted += 1;
        };

        debug!(batches = admitted, workers = self.pool.size(), ?end, "Dispatcher stopped");
        Ok(end)
    }
}
