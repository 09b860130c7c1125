//! Reference windows by GC, computed across a pool of worker threads.
//!
//! Sequences are handed to workers round-robin in arrival order. Each worker
//! owns a private [`GcHistogram`] and a [`WindowCounter`]; the partial
//! histograms are summed once every worker has finished. Because the merge is
//! an elementwise sum, the result is identical for any worker count or
//! assignment order.
//!
//! An admission semaphore sized at one and a half times the pool bounds the
//! number of sequences held in memory: the reader can run ahead of the
//! workers, but not without limit.
//!
//! Any error aborts the whole computation. No partial histogram is returned.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::gc::histogram::{GcHistogram, HistogramError, GC_BIN_COUNT};
use crate::gc::window::WindowCounter;
use crate::utils::parallelism::resolve_threads;
use crate::utils::sync::{Permit, Semaphore};

#[derive(Error, Debug)]
pub enum BinningError {
    #[error("Window size must be greater than zero")]
    InvalidWindowSize,

    #[error("At least {GC_BIN_COUNT} GC bins are required, got {0}")]
    TooFewBins(usize),

    #[error("Failed to read sequence #{index}: {source}")]
    Source {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("Failed to bin sequence #{index}: {source}")]
    Sequence {
        index: usize,
        #[source]
        source: HistogramError,
    },

    #[error("Failed to merge partial histograms: {0}")]
    Merge(#[from] HistogramError),

    #[error("A binning worker panicked")]
    WorkerPanicked,
}

/// Result of binning a set of sequences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinningReport {
    pub histogram: GcHistogram,
    /// Number of sequences consumed
    pub sequences: u64,
    /// Number of full windows evaluated
    pub windows: u64,
    /// Windows skipped for holding too many `N` bases
    pub ambiguous_windows: u64,
}

impl BinningReport {
    fn new(bin_count: usize) -> Self {
        Self {
            histogram: GcHistogram::new(bin_count),
            sequences: 0,
            windows: 0,
            ambiguous_windows: 0,
        }
    }

    fn absorb(&mut self, other: &BinningReport) -> Result<(), HistogramError> {
        self.histogram.merge(&other.histogram)?;
        self.sequences += other.sequences;
        self.windows += other.windows;
        self.ambiguous_windows += other.ambiguous_windows;
        Ok(())
    }

    fn scan(
        &mut self,
        counter: &mut WindowCounter,
        index: usize,
        bases: &[u8],
        window_size: usize,
    ) -> Result<(), BinningError> {
        counter.reset();
        self.sequences += 1;
        if bases.len() < window_size {
            return Ok(());
        }

        for start in 0..=bases.len() - window_size {
            let composition = counter.slide(bases, start, start + window_size);
            self.windows += 1;
            let counted = self
                .histogram
                .record(composition)
                .map_err(|source| BinningError::Sequence { index, source })?;
            if !counted {
                self.ambiguous_windows += 1;
            }
        }
        Ok(())
    }
}

/// A sequence admitted to a worker, holding its admission permit.
struct Job<S> {
    index: usize,
    bases: S,
    _permit: Permit,
}

/// Computes reference window GC histograms in parallel.
#[derive(Debug, Clone)]
pub struct ParallelBinner {
    threads: usize,
}

impl Default for ParallelBinner {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ParallelBinner {
    /// Create a binner with `threads` workers (0 = every available core).
    #[must_use]
    pub fn new(threads: usize) -> Self {
        Self {
            threads: resolve_threads(threads),
        }
    }

    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Maximum number of sequences admitted but not yet binned.
    #[must_use]
    pub fn admission_limit(&self) -> usize {
        self.threads + self.threads / 2
    }

    /// Histogram of window GC over all `sequences`.
    ///
    /// # Errors
    ///
    /// See [`ParallelBinner::compute`].
    pub fn compute_histogram<I, S>(
        &self,
        sequences: I,
        window_size: usize,
        bin_count: usize,
    ) -> Result<GcHistogram, BinningError>
    where
        I: IntoIterator<Item = io::Result<S>>,
        S: AsRef<[u8]> + Send,
    {
        self.compute(sequences, window_size, bin_count)
            .map(|report| report.histogram)
    }

    /// Bin every full window of every sequence by GC percentage.
    ///
    /// Bases are expected to be normalized (uppercased) by the caller;
    /// lowercase `g`, `c` and `n` are still recognized.
    ///
    /// # Errors
    ///
    /// Returns `BinningError::InvalidWindowSize` or `BinningError::TooFewBins`
    /// for invalid parameters, `BinningError::Source` if reading a sequence
    /// fails, and `BinningError::Sequence` or `BinningError::WorkerPanicked`
    /// if a worker fails. Any error discards all partial results.
    pub fn compute<I, S>(
        &self,
        sequences: I,
        window_size: usize,
        bin_count: usize,
    ) -> Result<BinningReport, BinningError>
    where
        I: IntoIterator<Item = io::Result<S>>,
        S: AsRef<[u8]> + Send,
    {
        if window_size == 0 {
            return Err(BinningError::InvalidWindowSize);
        }
        if bin_count < GC_BIN_COUNT {
            return Err(BinningError::TooFewBins(bin_count));
        }

        let permits = Semaphore::new(self.admission_limit());
        let failed = AtomicBool::new(false);

        thread::scope(|scope| {
            let mut senders = Vec::with_capacity(self.threads);
            let mut workers = Vec::with_capacity(self.threads);
            for _ in 0..self.threads {
                let (tx, rx) = unbounded::<Job<S>>();
                let failed = &failed;
                senders.push(tx);
                workers.push(scope.spawn(move || bin_sequences(&rx, window_size, bin_count, failed)));
            }

            let fed = feed(sequences, &senders, &permits, &failed);
            if fed.is_err() {
                failed.store(true, Ordering::Release);
            }
            // Closing the queues lets the workers finish
            drop(senders);

            let mut report = BinningReport::new(bin_count);
            let mut first_error = fed.err();
            for worker in workers {
                match worker.join() {
                    Ok(Ok(partial)) => {
                        if first_error.is_none() {
                            report.absorb(&partial)?;
                        }
                    }
                    Ok(Err(e)) => {
                        first_error.get_or_insert(e);
                    }
                    Err(_) => {
                        first_error.get_or_insert(BinningError::WorkerPanicked);
                    }
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => {
                    debug!(
                        sequences = report.sequences,
                        windows = report.windows,
                        ambiguous = report.ambiguous_windows,
                        "Binned reference windows by GC"
                    );
                    Ok(report)
                }
            }
        })
    }
}

/// Hand sequences to workers round-robin, blocking on the admission semaphore.
fn feed<I, S>(
    sequences: I,
    senders: &[Sender<Job<S>>],
    permits: &Arc<Semaphore>,
    failed: &AtomicBool,
) -> Result<(), BinningError>
where
    I: IntoIterator<Item = io::Result<S>>,
{
    for (index, item) in sequences.into_iter().enumerate() {
        if failed.load(Ordering::Acquire) {
            break;
        }
        let bases = item.map_err(|source| BinningError::Source { index, source })?;
        let job = Job {
            index,
            bases,
            _permit: permits.acquire(),
        };
        if senders[index % senders.len()].send(job).is_err() {
            // The worker already stopped; its error is reported on join
            break;
        }
    }
    Ok(())
}

fn bin_sequences<S: AsRef<[u8]>>(
    jobs: &Receiver<Job<S>>,
    window_size: usize,
    bin_count: usize,
    failed: &AtomicBool,
) -> Result<BinningReport, BinningError> {
    let mut partial = BinningReport::new(bin_count);
    let mut counter = WindowCounter::new();

    for job in jobs {
        if failed.load(Ordering::Acquire) {
            // Drain without work so held permits are released
            continue;
        }
        if let Err(e) = partial.scan(&mut counter, job.index, job.bases.as_ref(), window_size) {
            failed.store(true, Ordering::Release);
            return Err(e);
        }
    }
    Ok(partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_sequences(seed: u64, count: usize, max_len: usize) -> Vec<Vec<u8>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let alphabet = b"ACGTACGTACGTN";
        (0..count)
            .map(|_| {
                let len = rng.gen_range(0..max_len);
                (0..len)
                    .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
                    .collect()
            })
            .collect()
    }

    fn as_source<'a>(sequences: &'a [Vec<u8>]) -> impl Iterator<Item = io::Result<&'a [u8]>> + 'a {
        sequences.iter().map(|s| Ok(s.as_slice()))
    }

    #[test]
    fn test_identical_across_pool_sizes() {
        let sequences = random_sequences(7, 40, 2_000);
        let reference = ParallelBinner::new(1)
            .compute(as_source(&sequences), 50, GC_BIN_COUNT)
            .unwrap();

        for threads in [2, 4, 8] {
            let report = ParallelBinner::new(threads)
                .compute(as_source(&sequences), 50, GC_BIN_COUNT)
                .unwrap();
            assert_eq!(report, reference, "pool size {threads} differs");
        }
    }

    #[test]
    fn test_identical_under_reordered_input() {
        let sequences = random_sequences(11, 25, 1_500);
        let mut reversed = sequences.clone();
        reversed.reverse();

        let binner = ParallelBinner::new(3);
        let forward = binner.compute_histogram(as_source(&sequences), 20, GC_BIN_COUNT).unwrap();
        let backward = binner.compute_histogram(as_source(&reversed), 20, GC_BIN_COUNT).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_bin_sum_equals_evaluated_windows() {
        let sequences = random_sequences(3, 30, 3_000);
        let report = ParallelBinner::new(4)
            .compute(as_source(&sequences), 10, GC_BIN_COUNT)
            .unwrap();

        let expected_windows: u64 = sequences
            .iter()
            .filter(|s| s.len() >= 10)
            .map(|s| (s.len() - 10 + 1) as u64)
            .sum();
        assert_eq!(report.windows, expected_windows);
        assert_eq!(report.histogram.total(), report.windows - report.ambiguous_windows);
        assert_eq!(report.sequences, 30);
    }

    #[test]
    fn test_two_contigs_one_vs_four_workers() {
        let mut rng = StdRng::seed_from_u64(42);
        let contigs: Vec<Vec<u8>> = (0..2)
            .map(|_| (0..1000).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect())
            .collect();

        let one = ParallelBinner::new(1)
            .compute_histogram(as_source(&contigs), 100, GC_BIN_COUNT)
            .unwrap();
        let four = ParallelBinner::new(4)
            .compute_histogram(as_source(&contigs), 100, GC_BIN_COUNT)
            .unwrap();

        assert_eq!(one.len(), 101);
        assert_eq!(one, four);
        assert_eq!(one.total(), 2 * 901);
    }

    #[test]
    fn test_ambiguous_windows_not_binned() {
        let sequences = vec![b"NNNNNNNNNN".to_vec(), b"GGGGGGGGGG".to_vec()];
        let report = ParallelBinner::new(2)
            .compute(as_source(&sequences), 5, GC_BIN_COUNT)
            .unwrap();

        assert_eq!(report.windows, 12);
        assert_eq!(report.ambiguous_windows, 6);
        assert_eq!(report.histogram.get(100), Some(6));
        assert_eq!(report.histogram.total(), 6);
    }

    #[test]
    fn test_source_error_aborts() {
        let sequences: Vec<io::Result<Vec<u8>>> = vec![
            Ok(b"ACGTACGT".to_vec()),
            Err(io::Error::new(io::ErrorKind::InvalidData, "truncated record")),
            Ok(b"ACGTACGT".to_vec()),
        ];

        let result = ParallelBinner::new(2).compute(sequences, 4, GC_BIN_COUNT);
        assert!(matches!(result, Err(BinningError::Source { index: 1, .. })));
    }

    #[test]
    fn test_invalid_parameters() {
        let binner = ParallelBinner::new(1);
        let empty: Vec<io::Result<Vec<u8>>> = Vec::new();
        assert!(matches!(
            binner.compute(empty, 0, GC_BIN_COUNT),
            Err(BinningError::InvalidWindowSize)
        ));

        let empty: Vec<io::Result<Vec<u8>>> = Vec::new();
        assert!(matches!(
            binner.compute(empty, 100, 50),
            Err(BinningError::TooFewBins(50))
        ));
    }

    #[test]
    fn test_admission_limit() {
        assert_eq!(ParallelBinner::new(1).admission_limit(), 1);
        assert_eq!(ParallelBinner::new(4).admission_limit(), 6);
        assert_eq!(ParallelBinner::new(8).admission_limit(), 12);
    }
}
