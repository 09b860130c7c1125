//! Record batches and the producer that builds them from a record source.

use std::io;
use std::mem;
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};
use tracing::{debug, warn};

use crate::core::record::AlignmentRecord;
use crate::core::reference::{ReferenceLookup, ReferenceSlice};
use crate::pipeline::{AbortReason, PipelineConfig, PipelineError};
use crate::utils::progress::ProgressTracker;
use crate::utils::sync::CancellationToken;

/// How long a blocked send waits before re-checking cancellation.
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A record paired with the reference sequence it maps to.
#[derive(Debug, Clone)]
pub struct RecordPair<R> {
    pub record: R,
    pub reference: Option<ReferenceSlice>,
}

/// An immutable run of consecutive records, tagged with its position in the stream.
#[derive(Debug)]
pub struct Batch<R> {
    sequence: u64,
    pairs: Vec<RecordPair<R>>,
}

impl<R> Batch<R> {
    #[must_use]
    pub fn new(sequence: u64, pairs: Vec<RecordPair<R>>) -> Self {
        Self { sequence, pairs }
    }

    /// 0-based position of this batch in the stream
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub fn pairs(&self) -> &[RecordPair<R>] {
        &self.pairs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Items on the producer to dispatcher queue.
#[derive(Debug)]
pub(crate) enum QueueMessage<R> {
    Batch(Batch<R>),
    /// No batches follow
    Done,
}

/// Why the producer stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The source ran out of records
    Exhausted,
    /// The configured record limit was reached
    StopAfter,
    /// A record with no reference was read and nothing asked for the unmapped tail
    UnmappedTail,
}

/// What the producer read and emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProducerSummary {
    pub records: u64,
    pub batches: u64,
    pub stop_reason: StopReason,
}

/// Reads records in order, pairs them with reference slices, and emits fixed-size batches.
pub(crate) struct BatchProducer<'a, R> {
    config: &'a PipelineConfig,
    reference: Option<&'a dyn ReferenceLookup>,
    include_unmapped_tail: bool,
    queue: Sender<QueueMessage<R>>,
    cancel: &'a CancellationToken,
    progress: ProgressTracker,
    records: u64,
    batches: u64,
    last_key: Option<(usize, usize)>,
    warned_unsorted: bool,
}

impl<'a, R: AlignmentRecord> BatchProducer<'a, R> {
    pub fn new(
        config: &'a PipelineConfig,
        reference: Option<&'a dyn ReferenceLookup>,
        include_unmapped_tail: bool,
        queue: Sender<QueueMessage<R>>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            config,
            reference,
            include_unmapped_tail,
            queue,
            cancel,
            progress: ProgressTracker::new("Read records")
                .with_interval(config.progress_interval),
            records: 0,
            batches: 0,
            last_key: None,
            warned_unsorted: false,
        }
    }

    /// Drain `records` into batches until the source ends or a stop condition fires.
    ///
    /// The record that triggers a stop is included in the final batch. The
    /// terminal marker is sent only on success; on error the queue is simply
    /// dropped.
    pub fn run<I>(mut self, records: I) -> Result<ProducerSummary, PipelineError>
    where
        I: IntoIterator<Item = io::Result<R>>,
    {
        let batch_size = self.config.batch_size;
        let mut pending = Vec::with_capacity(batch_size);
        let mut stop_reason = StopReason::Exhausted;

        for result in records {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Aborted(AbortReason::Cancelled));
            }

            let record = result.map_err(|source| PipelineError::Source {
                record: self.records + 1,
                source,
            })?;
            self.check_order(&record)?;
            let reference = self.resolve(&record)?;
            let has_reference = record.reference_index().is_some();

            pending.push(RecordPair { record, reference });
            self.records += 1;
            self.progress.log_if_needed(1);

            if self.config.stop_after > 0 && self.records >= self.config.stop_after {
                stop_reason = StopReason::StopAfter;
                break;
            }
            if !has_reference && !self.include_unmapped_tail {
                stop_reason = StopReason::UnmappedTail;
                break;
            }
            if pending.len() >= batch_size {
                let full = mem::replace(&mut pending, Vec::with_capacity(batch_size));
                self.emit(full)?;
            }
        }

        if !pending.is_empty() {
            self.emit(pending)?;
        }
        self.send(QueueMessage::Done)?;
        self.progress.log_final();

        debug!(
            records = self.records,
            batches = self.batches,
            ?stop_reason,
            "Record source drained"
        );

        Ok(ProducerSummary {
            records: self.records,
            batches: self.batches,
            stop_reason,
        })
    }

    fn emit(&mut self, pairs: Vec<RecordPair<R>>) -> Result<(), PipelineError> {
        let batch = Batch::new(self.batches, pairs);
        self.batches += 1;
        self.send(QueueMessage::Batch(batch))
    }

    /// Blocking send that gives up on cancellation or when the dispatcher is gone.
    fn send(&self, message: QueueMessage<R>) -> Result<(), PipelineError> {
        let mut message = message;
        loop {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Aborted(AbortReason::Cancelled));
            }
            match self.queue.send_timeout(message, SEND_POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => message = returned,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(PipelineError::Aborted(AbortReason::DispatcherStopped));
                }
            }
        }
    }

    fn check_order(&mut self, record: &R) -> Result<(), PipelineError> {
        let key = record.coordinate_key();
        if self.last_key.is_some_and(|last| key < last) {
            if !self.config.assume_sorted {
                return Err(PipelineError::Unsorted {
                    record: self.records + 1,
                });
            }
            if !self.warned_unsorted {
                warn!(
                    record = self.records + 1,
                    "Records are out of coordinate order; continuing because input is assumed sorted"
                );
                self.warned_unsorted = true;
            }
        }
        self.last_key = Some(key);
        Ok(())
    }

    fn resolve(&self, record: &R) -> Result<Option<ReferenceSlice>, PipelineError> {
        match (self.reference, record.reference_index()) {
            (Some(lookup), Some(index)) => Ok(Some(lookup.get(index)?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reference::ReferenceSequences;
    use crossbeam_channel::{bounded, unbounded, Receiver};

    /// Minimal record: (reference index, start)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Rec(Option<usize>, usize);

    impl AlignmentRecord for Rec {
        fn reference_index(&self) -> Option<usize> {
            self.0
        }
        fn alignment_start(&self) -> Option<usize> {
            self.0.map(|_| self.1)
        }
        fn is_unmapped(&self) -> bool {
            self.0.is_none()
        }
    }

    fn mapped(n: usize) -> Vec<io::Result<Rec>> {
        (1..=n).map(|start| Ok(Rec(Some(0), start))).collect()
    }

    fn drain(rx: &Receiver<QueueMessage<Rec>>) -> Vec<Vec<Rec>> {
        let mut batches = Vec::new();
        for message in rx.try_iter() {
            match message {
                QueueMessage::Batch(batch) => {
                    assert_eq!(batch.sequence(), batches.len() as u64);
                    batches.push(batch.pairs().iter().map(|p| p.record).collect());
                }
                QueueMessage::Done => return batches,
            }
        }
        panic!("terminal marker not sent");
    }

    fn run(
        config: &PipelineConfig,
        include_unmapped_tail: bool,
        records: Vec<io::Result<Rec>>,
    ) -> (Result<ProducerSummary, PipelineError>, Vec<Vec<Rec>>) {
        let (tx, rx) = unbounded();
        let cancel = CancellationToken::new();
        let result =
            BatchProducer::new(config, None, include_unmapped_tail, tx, &cancel).run(records);
        let batches = if result.is_ok() { drain(&rx) } else { Vec::new() };
        (result, batches)
    }

    #[test]
    fn test_fixed_size_batches_with_short_tail() {
        let config = PipelineConfig::default().with_batch_size(4);
        let (result, batches) = run(&config, false, mapped(10));
        let summary = result.unwrap();

        assert_eq!(summary.records, 10);
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.stop_reason, StopReason::Exhausted);
        assert_eq!(
            batches.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
    }

    #[test]
    fn test_stop_after_includes_triggering_record() {
        let config = PipelineConfig::default()
            .with_batch_size(4)
            .with_stop_after(6);
        let (result, batches) = run(&config, false, mapped(10));

        assert_eq!(result.unwrap().stop_reason, StopReason::StopAfter);
        assert_eq!(batches.concat().len(), 6);
    }

    #[test]
    fn test_unmapped_tail_stops_after_first_unplaced_record() {
        let mut records = mapped(3);
        records.push(Ok(Rec(None, 0)));
        records.push(Ok(Rec(None, 0)));
        let config = PipelineConfig::default();

        let (result, batches) = run(&config, false, records);
        assert_eq!(result.unwrap().stop_reason, StopReason::UnmappedTail);
        assert_eq!(batches.concat().len(), 4);
        assert_eq!(batches.concat()[3], Rec(None, 0));
    }

    #[test]
    fn test_unmapped_tail_read_when_requested() {
        let mut records = mapped(3);
        records.push(Ok(Rec(None, 0)));
        records.push(Ok(Rec(None, 0)));
        let config = PipelineConfig::default();

        let (result, batches) = run(&config, true, records);
        assert_eq!(result.unwrap().stop_reason, StopReason::Exhausted);
        assert_eq!(batches.concat().len(), 5);
    }

    #[test]
    fn test_empty_source_sends_only_terminal_marker() {
        let config = PipelineConfig::default();
        let (result, batches) = run(&config, false, Vec::new());
        assert_eq!(result.unwrap().batches, 0);
        assert!(batches.is_empty());
    }

    #[test]
    fn test_unsorted_records() {
        let records = vec![Ok(Rec(Some(0), 50)), Ok(Rec(Some(0), 10))];

        let strict = PipelineConfig::default().with_assume_sorted(false);
        let (result, _) = run(&strict, false, records);
        assert!(matches!(result, Err(PipelineError::Unsorted { record: 2 })));

        let records = vec![Ok(Rec(Some(0), 50)), Ok(Rec(Some(0), 10))];
        let lenient = PipelineConfig::default();
        let (result, batches) = run(&lenient, false, records);
        assert!(result.is_ok());
        assert_eq!(batches.concat().len(), 2);
    }

    #[test]
    fn test_source_error_carries_record_number() {
        let mut records = mapped(2);
        records.push(Err(io::Error::new(io::ErrorKind::InvalidData, "truncated")));
        let config = PipelineConfig::default();

        let (result, _) = run(&config, false, records);
        assert!(matches!(result, Err(PipelineError::Source { record: 3, .. })));
    }

    #[test]
    fn test_records_are_paired_with_reference() {
        let reference = ReferenceSequences::new(vec![
            ("chr1".to_string(), b"ACGT".to_vec()),
            ("chr2".to_string(), b"GGGG".to_vec()),
        ]);
        let config = PipelineConfig::default();
        let cancel = CancellationToken::new();
        let (tx, rx) = unbounded();

        BatchProducer::new(&config, Some(&reference as &dyn ReferenceLookup), true, tx, &cancel)
            .run(vec![Ok(Rec(Some(1), 1)), Ok(Rec(None, 0))])
            .unwrap();

        let Ok(QueueMessage::Batch(batch)) = rx.try_recv() else {
            panic!("expected a batch");
        };
        assert_eq!(batch.pairs()[0].reference.as_ref().unwrap().name(), "chr2");
        assert!(batch.pairs()[1].reference.is_none());
    }

    #[test]
    fn test_unknown_reference_index_fails() {
        let reference = ReferenceSequences::new(vec![("chr1".to_string(), b"ACGT".to_vec())]);
        let config = PipelineConfig::default();
        let cancel = CancellationToken::new();
        let (tx, _rx) = unbounded();

        let result = BatchProducer::new(&config, Some(&reference as &dyn ReferenceLookup), false, tx, &cancel)
            .run(vec![Ok(Rec(Some(3), 1))]);
        assert!(matches!(result, Err(PipelineError::Reference(_))));
    }

    #[test]
    fn test_blocked_send_observes_cancellation() {
        let config = PipelineConfig::default().with_batch_size(1);
        let cancel = CancellationToken::new();
        let (tx, _rx) = bounded(1);

        let canceller = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                cancel.cancel();
            })
        };
        let result = BatchProducer::new(&config, None, false, tx, &cancel).run(mapped(5));
        canceller.join().unwrap();

        assert!(matches!(
            result,
            Err(PipelineError::Aborted(AbortReason::Cancelled))
        ));
    }

    #[test]
    fn test_dropped_dispatcher_stops_producer() {
        let config = PipelineConfig::default().with_batch_size(1);
        let cancel = CancellationToken::new();
        let (tx, rx) = bounded(1);
        drop(rx);

        let result = BatchProducer::new(&config, None, false, tx, &cancel).run(mapped(3));
        assert!(matches!(
            result,
            Err(PipelineError::Aborted(AbortReason::DispatcherStopped))
        ));
    }
}
