//! The accumulator contract and the per-accumulator ordering slot.

use std::path::Path;

use noodles::sam;
use parking_lot::{Condvar, Mutex};

use crate::core::reference::ReferenceSlice;
use crate::pipeline::batch::Batch;

/// A stateful consumer of alignment records.
///
/// The pipeline calls `setup` once before any record, `accept_record` once
/// per record in source order, and `finish` once after the last record of a
/// successful run. Calls on one accumulator never overlap, so implementations
/// need no internal locking.
pub trait Accumulator<R>: Send {
    /// Name used in logs and error messages
    fn name(&self) -> &str;

    /// Prepare for a run over `source`.
    ///
    /// # Errors
    ///
    /// Returning an error fails the run before any record is read.
    fn setup(&mut self, header: &sam::Header, source: &Path) -> anyhow::Result<()>;

    /// Consume one record and the reference slice it maps to, if any.
    ///
    /// # Errors
    ///
    /// Returning an error aborts the run.
    fn accept_record(&mut self, record: &R, reference: Option<&ReferenceSlice>)
        -> anyhow::Result<()>;

    /// Finalize after every record has been accepted.
    ///
    /// # Errors
    ///
    /// Returning an error fails the run; accumulators later in registration
    /// order are not finished.
    fn finish(&mut self) -> anyhow::Result<()>;

    /// Whether this accumulator needs the trailing records that have no reference.
    fn uses_unmapped_tail(&self) -> bool {
        false
    }
}

/// Why a slot refused a batch.
#[derive(Debug)]
pub(crate) enum SlotError {
    /// The run was aborted while waiting for this slot's turn
    Aborted,
    /// The named accumulator rejected a record
    Failed { name: String, source: anyhow::Error },
}

struct SlotState<R> {
    accumulator: Box<dyn Accumulator<R>>,
    /// Sequence number of the batch this accumulator must see next
    next_batch: u64,
    aborted: bool,
}

/// One accumulator plus the turnstile that feeds it batches in sequence order.
///
/// Workers may hold batches out of order; a worker holding batch `k` blocks in
/// [`apply`](Self::apply) until batch `k - 1` has been applied to this slot.
pub(crate) struct AccumulatorSlot<R> {
    name: String,
    state: Mutex<SlotState<R>>,
    turn: Condvar,
}

impl<R> AccumulatorSlot<R> {
    pub fn new(accumulator: Box<dyn Accumulator<R>>) -> Self {
        Self {
            name: accumulator.name().to_string(),
            state: Mutex::new(SlotState {
                accumulator,
                next_batch: 0,
                aborted: false,
            }),
            turn: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply every record of `batch` once all earlier batches have been applied.
    ///
    /// The slot stays locked for the whole batch.
    pub fn apply(&self, batch: &Batch<R>) -> Result<(), SlotError> {
        let mut state = self.state.lock();
        while !state.aborted && state.next_batch != batch.sequence() {
            self.turn.wait(&mut state);
        }
        if state.aborted {
            return Err(SlotError::Aborted);
        }

        for pair in batch.pairs() {
            if let Err(source) = state
                .accumulator
                .accept_record(&pair.record, pair.reference.as_ref())
            {
                state.aborted = true;
                drop(state);
                self.turn.notify_all();
                return Err(SlotError::Failed {
                    name: self.name.clone(),
                    source,
                });
            }
        }

        state.next_batch += 1;
        drop(state);
        self.turn.notify_all();
        Ok(())
    }

    /// Wake every waiter and refuse further batches.
    pub fn abort(&self) {
        self.state.lock().aborted = true;
        self.turn.notify_all();
    }

    /// Number of batches applied so far
    pub fn applied(&self) -> u64 {
        self.state.lock().next_batch
    }

    pub fn setup(&self, header: &sam::Header, source: &Path) -> anyhow::Result<()> {
        self.state.lock().accumulator.setup(header, source)
    }

    pub fn finish(&self) -> anyhow::Result<()> {
        self.state.lock().accumulator.finish()
    }

    pub fn uses_unmapped_tail(&self) -> bool {
        self.state.lock().accumulator.uses_unmapped_tail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batch::RecordPair;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Records the values it sees into a shared log.
    struct Recorder {
        seen: Arc<Mutex<Vec<u32>>>,
        fail_on: Option<u32>,
    }

    impl Accumulator<u32> for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn setup(&mut self, _header: &sam::Header, _source: &Path) -> anyhow::Result<()> {
            Ok(())
        }

        fn accept_record(
            &mut self,
            record: &u32,
            _reference: Option<&ReferenceSlice>,
        ) -> anyhow::Result<()> {
            if self.fail_on == Some(*record) {
                anyhow::bail!("rejected {record}");
            }
            self.seen.lock().push(*record);
            Ok(())
        }

        fn finish(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn batch(sequence: u64, values: &[u32]) -> Batch<u32> {
        Batch::new(
            sequence,
            values
                .iter()
                .map(|&record| RecordPair {
                    record,
                    reference: None,
                })
                .collect(),
        )
    }

    fn slot(fail_on: Option<u32>) -> (Arc<AccumulatorSlot<u32>>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            seen: Arc::clone(&seen),
            fail_on,
        };
        (Arc::new(AccumulatorSlot::new(Box::new(recorder))), seen)
    }

    #[test]
    fn test_out_of_order_batches_are_applied_in_sequence() {
        let (slot, seen) = slot(None);

        let handles: Vec<_> = (0..4u64)
            .rev()
            .map(|sequence| {
                let slot = Arc::clone(&slot);
                let first = u32::try_from(sequence).unwrap() * 2;
                thread::spawn(move || slot.apply(&batch(sequence, &[first, first + 1])))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }

        assert_eq!(*seen.lock(), (0..8).collect::<Vec<_>>());
        assert_eq!(slot.applied(), 4);
    }

    #[test]
    fn test_failure_aborts_waiters() {
        let (slot, seen) = slot(Some(1));

        let waiter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.apply(&batch(1, &[5])))
        };
        thread::sleep(Duration::from_millis(20));

        assert!(matches!(slot.apply(&batch(0, &[0, 1, 2])), Err(SlotError::Failed { .. })));
        assert!(matches!(waiter.join().unwrap(), Err(SlotError::Aborted)));
        assert_eq!(*seen.lock(), vec![0]);
    }

    #[test]
    fn test_abort_releases_waiters() {
        let (slot, _) = slot(None);
        let waiter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.apply(&batch(3, &[1])))
        };
        thread::sleep(Duration::from_millis(20));
        slot.abort();
        assert!(matches!(waiter.join().unwrap(), Err(SlotError::Aborted)));
    }
}
