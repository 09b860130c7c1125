//! Single-pass fan-out of an alignment record stream to stateful accumulators.
//!
//! One producer reads records in order on the calling thread and groups them
//! into fixed-size batches. A dispatcher thread moves batches from a bounded
//! queue onto a fixed worker pool. Each accumulator sits behind a slot that
//! applies batches strictly in sequence order, so every accumulator observes
//! every record exactly once, in source order, and never from two threads at
//! once.
//!
//! ```text
//! source -> BatchProducer -> [bounded queue] -> Dispatcher -> WorkerPool
//!                                                               |
//!                                             slot 0 -> slot 1 -> ... -> slot n
//! ```
//!
//! Any failure aborts the run: no accumulator is finished and the first
//! error is returned.

pub mod accumulator;
pub mod batch;
pub(crate) mod dispatch;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use noodles::sam;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::record::AlignmentRecord;
use crate::core::reference::{ReferenceError, ReferenceLookup};
use crate::parsing::sam::{dictionary_from_header, is_coordinate_sorted, sort_order, ParseError};
use crate::utils::parallelism::resolve_threads;
use crate::utils::sync::CancellationToken;
use crate::utils::validation::{require_positive, validate_dictionaries, DictionaryMismatch};

use accumulator::{Accumulator, AccumulatorSlot};
use batch::{BatchProducer, StopReason};
use dispatch::{Dispatcher, WorkerPool};

/// Records per batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Queue slots per worker thread when no explicit capacity is given
pub const QUEUE_SLOTS_PER_THREAD: usize = 5;

/// How long shutdown waits for in-flight batches by default
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Tunables for a single-pass run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Records per batch
    pub batch_size: usize,
    /// Bound on queued batches; `None` means five per worker thread
    pub queue_capacity: Option<usize>,
    /// Worker threads (0 = every available core), capped at the accumulator count
    pub threads: usize,
    /// Proceed with a warning when the input is not coordinate sorted
    pub assume_sorted: bool,
    /// Stop after this many records (0 = no limit)
    pub stop_after: u64,
    /// Keep reading past the first record with no reference
    pub include_unmapped_tail: bool,
    /// How long shutdown waits for in-flight batches
    pub shutdown_timeout: Duration,
    /// Records between progress log lines
    pub progress_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: None,
            threads: 0,
            assume_sorted: true,
            stop_after: 0,
            include_unmapped_tail: false,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            progress_interval: 1_000_000,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    #[must_use]
    pub fn with_assume_sorted(mut self, assume_sorted: bool) -> Self {
        self.assume_sorted = assume_sorted;
        self
    }

    #[must_use]
    pub fn with_stop_after(mut self, stop_after: u64) -> Self {
        self.stop_after = stop_after;
        self
    }

    #[must_use]
    pub fn with_unmapped_tail(mut self, include: bool) -> Self {
        self.include_unmapped_tail = include;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Check numeric parameters.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfig` for a zero batch size or queue capacity.
    pub fn validate(&self) -> Result<(), PipelineError> {
        require_positive("batch size", self.batch_size).map_err(PipelineError::InvalidConfig)?;
        if let Some(capacity) = self.queue_capacity {
            require_positive("queue capacity", capacity).map_err(PipelineError::InvalidConfig)?;
        }
        Ok(())
    }

    /// Worker threads for `accumulators` accumulators; always at least one.
    #[must_use]
    pub fn worker_count(&self, accumulators: usize) -> usize {
        resolve_threads(self.threads).min(accumulators).max(1)
    }

    #[must_use]
    pub fn resolved_queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| QUEUE_SLOTS_PER_THREAD * resolve_threads(self.threads))
    }
}

/// Why a run was abandoned rather than failed by a component.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    #[error("cancelled")]
    Cancelled,

    #[error("in-flight batches did not finish within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("a worker panicked")]
    WorkerPanicked,

    #[error("the dispatcher stopped accepting batches")]
    DispatcherStopped,
}

/// Phase of a run in which an error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Before any record was read
    Configuration,
    /// While records were read and applied
    Streaming,
    /// While waiting for workers or finishing accumulators
    Shutdown,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Streaming => write!(f, "streaming"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Input is not coordinate sorted (header sort order: {0})")]
    HeaderNotSorted(String),

    #[error("Failed to open {}", .path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("Reference does not match the input sequence dictionary")]
    Dictionary(#[from] DictionaryMismatch),

    #[error("Accumulator '{name}' failed during setup")]
    Setup {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to start worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Failed to read record #{record}")]
    Source {
        record: u64,
        #[source]
        source: io::Error,
    },

    #[error("Record #{record} is out of coordinate order")]
    Unsorted { record: u64 },

    #[error("Reference lookup failed")]
    Reference(#[from] ReferenceError),

    #[error("Accumulator '{name}' failed on batch {batch}")]
    Accumulator {
        name: String,
        batch: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("Accumulator '{name}' failed to finish")]
    Finish {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write metrics")]
    Output(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Run aborted: {0}")]
    Aborted(AbortReason),
}

impl PipelineError {
    /// An input that could not be opened or whose header could not be read.
    #[must_use]
    pub fn input(path: &Path, source: ParseError) -> Self {
        Self::Input {
            path: path.to_path_buf(),
            source,
        }
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidConfig(_)
            | Self::Input { .. }
            | Self::HeaderNotSorted(_)
            | Self::Dictionary(_)
            | Self::Setup { .. }
            | Self::ThreadPool(_) => Stage::Configuration,
            Self::Source { .. }
            | Self::Unsorted { .. }
            | Self::Reference(_)
            | Self::Accumulator { .. } => Stage::Streaming,
            Self::Finish { .. }
            | Self::Output(_)
            | Self::Aborted(AbortReason::ShutdownTimeout(_)) => {
                Stage::Shutdown
            }
            Self::Aborted(_) => Stage::Streaming,
        }
    }

    /// Whether the run was abandoned rather than failed by a component.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

/// Counts from a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub records: u64,
    pub batches: u64,
    pub workers: usize,
    pub stop_reason: StopReason,
}

/// Streams one record source through a set of accumulators in a single pass.
pub struct SinglePass<R> {
    config: PipelineConfig,
    reference: Option<Arc<dyn ReferenceLookup>>,
    accumulators: Vec<Box<dyn Accumulator<R>>>,
    cancel: CancellationToken,
}

impl<R: AlignmentRecord> SinglePass<R> {
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            reference: None,
            accumulators: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Pair each mapped record with its reference sequence.
    #[must_use]
    pub fn with_reference(mut self, reference: Arc<dyn ReferenceLookup>) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Observe an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Register an accumulator; registration order is finish order.
    pub fn add_accumulator(&mut self, accumulator: Box<dyn Accumulator<R>>) -> &mut Self {
        self.accumulators.push(accumulator);
        self
    }

    /// Handle that cancels this run from another thread.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every record of `records` through every registered accumulator.
    ///
    /// `header` describes the source; `source` is passed to each
    /// accumulator's `setup`. Accumulators are finished in registration
    /// order only if every record was applied successfully.
    ///
    /// # Errors
    ///
    /// Returns the first [`PipelineError`] raised by configuration checks,
    /// the source, the reference, an accumulator, or shutdown.
    pub fn run<I>(
        self,
        header: &sam::Header,
        source: &Path,
        records: I,
    ) -> Result<RunSummary, PipelineError>
    where
        I: IntoIterator<Item = io::Result<R>>,
    {
        let started = Instant::now();
        self.config.validate()?;
        self.check_header(header)?;

        let mut include_unmapped_tail = self.config.include_unmapped_tail;
        for accumulator in &self.accumulators {
            include_unmapped_tail |= accumulator.uses_unmapped_tail();
        }

        let slots: Vec<AccumulatorSlot<R>> = self
            .accumulators
            .into_iter()
            .map(AccumulatorSlot::new)
            .collect();
        for slot in &slots {
            slot.setup(header, source)
                .map_err(|source| PipelineError::Setup {
                    name: slot.name().to_string(),
                    source,
                })?;
        }

        let slots = Arc::new(slots);
        let workers = self.config.worker_count(slots.len());
        let pool = WorkerPool::new(workers, Arc::clone(&slots))?;
        let (tx, rx) = bounded(self.config.resolved_queue_capacity());
        debug!(
            accumulators = slots.len(),
            workers,
            batch_size = self.config.batch_size,
            "Starting single-pass run"
        );

        let producer = BatchProducer::new(
            &self.config,
            self.reference.as_deref(),
            include_unmapped_tail,
            tx,
            &self.cancel,
        );
        let (produced, dispatched) = thread::scope(|scope| {
            let dispatcher = scope.spawn(|| Dispatcher::new(rx, &pool, &self.cancel).run());
            let produced = producer.run(records);
            let dispatched = dispatcher
                .join()
                .unwrap_or(Err(PipelineError::Aborted(AbortReason::WorkerPanicked)));
            (produced, dispatched)
        });

        if produced.is_err() || dispatched.is_err() {
            pool.abort();
        }
        let drained = pool.drain(self.config.shutdown_timeout);

        // A component failure is the root cause of any abort it triggered
        if let Some(failure) = pool.take_failure() {
            return Err(failure);
        }
        let summary = match (produced, dispatched) {
            (Err(e), _) if !matches!(e, PipelineError::Aborted(AbortReason::DispatcherStopped)) => {
                return Err(e)
            }
            (_, Err(e)) | (Err(e), _) => return Err(e),
            (Ok(summary), Ok(_)) => summary,
        };
        drained?;

        for slot in slots.iter() {
            slot.finish().map_err(|source| PipelineError::Finish {
                name: slot.name().to_string(),
                source,
            })?;
        }

        info!(
            records = summary.records,
            batches = summary.batches,
            workers,
            elapsed = ?started.elapsed(),
            "Single-pass run complete"
        );

        Ok(RunSummary {
            records: summary.records,
            batches: summary.batches,
            workers,
            stop_reason: summary.stop_reason,
        })
    }

    fn check_header(&self, header: &sam::Header) -> Result<(), PipelineError> {
        if !is_coordinate_sorted(header) {
            let declared = sort_order(header).unwrap_or_else(|| "unknown".to_string());
            if !self.config.assume_sorted {
                return Err(PipelineError::HeaderNotSorted(declared));
            }
            warn!(
                sort_order = %declared,
                "Input header is not coordinate sorted; continuing because input is assumed sorted"
            );
        }

        if let Some(reference) = &self.reference {
            let dictionary = dictionary_from_header(header);
            if !dictionary.is_empty() {
                validate_dictionaries(&dictionary, reference.as_ref())?;
            }
        }
        Ok(())
    }
}
