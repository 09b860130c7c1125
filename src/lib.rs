//! # seqpass
//!
//! Single-pass metric collection over coordinate-sorted alignment files.
//!
//! Reading a large BAM once per metric is wasteful. `seqpass` reads it exactly
//! once, groups records into ordered batches and hands every batch to each
//! registered [`Accumulator`] on a shared worker pool. Each accumulator still
//! sees every record in file order, one batch at a time, so accumulators can
//! keep plain mutable state without their own locking.
//!
//! The same crate bins every window of a reference by GC content in parallel,
//! which the GC bias metric uses as its denominator.
//!
//! ## Features
//!
//! - **Ordered fan-out**: batches reach each accumulator in sequence, never concurrently
//! - **Bounded memory**: the reader blocks once the batch queue is full
//! - **Reference slices**: records are paired with their reference sequence when one is supplied
//! - **Fail fast**: the first accumulator error cancels the run and is reported with its stage
//! - **Parallel GC binning**: sliding-window GC histograms across all sequences of a FASTA
//!
//! ## Example
//!
//! ```rust,no_run
//! use noodles::sam::alignment::RecordBuf;
//! use seqpass::metrics::summary::AlignmentSummaryAccumulator;
//! use seqpass::parsing::sam::with_alignment_records;
//! use seqpass::{PipelineConfig, SinglePass};
//! use std::path::Path;
//!
//! let summary = AlignmentSummaryAccumulator::new();
//! let handle = summary.handle();
//!
//! let mut pass = SinglePass::<RecordBuf>::new(PipelineConfig::default().with_threads(4));
//! pass.add_accumulator(Box::new(summary));
//!
//! let input = Path::new("sample.bam");
//! with_alignment_records(input, |header, records| pass.run(header, input, records))
//!     .unwrap()
//!     .unwrap();
//!
//! let summary = handle.get().unwrap();
//! println!("{} of {} records mapped", summary.mapped, summary.total_records);
//! ```
//!
//! ## Modules
//!
//! - [`pipeline`]: the single-pass driver, batching and worker dispatch
//! - [`metrics`]: accumulators shipped with seqpass
//! - [`gc`]: sliding-window GC and the parallel binner
//! - [`core`]: alignment record and reference types
//! - [`parsing`]: SAM/BAM and FASTA readers
//! - [`cli`]: command-line interface implementation

pub mod cli;
pub mod core;
pub mod gc;
pub mod metrics;
pub mod parsing;
pub mod pipeline;
pub mod utils;

// Re-export commonly used types for convenience
pub use core::record::AlignmentRecord;
pub use core::reference::{
    ReferenceLookup, ReferenceSequences, ReferenceSlice, SequenceDictionary, SequenceEntry,
};
pub use gc::binner::{BinningError, BinningReport, ParallelBinner};
pub use gc::histogram::GcHistogram;
pub use metrics::MetricsHandle;
pub use pipeline::accumulator::Accumulator;
pub use pipeline::{PipelineConfig, PipelineError, RunSummary, SinglePass, Stage};
pub use utils::sync::CancellationToken;
