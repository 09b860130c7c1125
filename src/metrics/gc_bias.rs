//! GC bias: read starts versus reference windows, by window GC.
//!
//! Each mapped read is assigned the GC of the reference window that begins
//! at its alignment start. In `finish`, the reference itself is binned with
//! [`ParallelBinner`] and each GC bin's share of reads is divided by its
//! share of windows to give a normalized coverage. One [`GcBin`] per GC
//! percentage is one row of the table.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use noodles::sam;
use serde::Serialize;
use tracing::{debug, info};

use crate::core::record::AlignmentRecord;
use crate::core::reference::{ReferenceLookup, ReferenceSlice};
use crate::gc::binner::ParallelBinner;
use crate::gc::histogram::{GcHistogram, GC_BIN_COUNT};
use crate::gc::window::{calculate_all_gcs, Composition};
use crate::metrics::{write_tsv, MetricsHandle};
use crate::pipeline::accumulator::Accumulator;

/// Default window width in bases
pub const DEFAULT_WINDOW_SIZE: usize = 100;

/// One GC bin of the bias table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GcBin {
    pub gc: usize,
    pub windows: u64,
    pub read_starts: u64,
    pub normalized_coverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GcBiasMetrics {
    pub window_size: usize,
    pub total_windows: u64,
    pub total_reads: u64,
    /// Mapped reads whose window was ambiguous or ran off the sequence end
    pub skipped_reads: u64,
    pub bins: Vec<GcBin>,
}

impl GcBiasMetrics {
    /// Combine window and read histograms into normalized coverage per bin.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_histograms(
        window_size: usize,
        windows: &GcHistogram,
        reads: &GcHistogram,
        skipped_reads: u64,
    ) -> Self {
        let total_windows = windows.total();
        let total_reads = reads.total();

        let bins = (0..windows.len())
            .map(|gc| {
                let window_count = windows.get(gc).unwrap_or(0);
                let read_count = reads.get(gc).unwrap_or(0);
                let normalized_coverage = if window_count == 0 || total_reads == 0 {
                    0.0
                } else {
                    (read_count as f64 / total_reads as f64)
                        / (window_count as f64 / total_windows as f64)
                };
                GcBin {
                    gc,
                    windows: window_count,
                    read_starts: read_count,
                    normalized_coverage,
                }
            })
            .collect();

        Self {
            window_size,
            total_windows,
            total_reads,
            skipped_reads,
            bins,
        }
    }

    /// Write one row per GC bin to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_tsv(&self, path: &Path) -> anyhow::Result<()> {
        write_tsv(path, &self.bins)
    }
}

/// Window GC of the reference sequence currently being read.
struct CachedSequence {
    index: usize,
    gcs: Vec<Composition>,
}

pub struct GcBiasAccumulator {
    reference: Arc<dyn ReferenceLookup>,
    window_size: usize,
    threads: usize,
    current: Option<CachedSequence>,
    reads: GcHistogram,
    skipped_reads: u64,
    handle: MetricsHandle<GcBiasMetrics>,
}

impl GcBiasAccumulator {
    /// `threads` sizes the binner run over the reference in `finish`
    /// (0 = every available core).
    #[must_use]
    pub fn new(
        reference: Arc<dyn ReferenceLookup>,
        window_size: usize,
        threads: usize,
    ) -> Self {
        Self {
            reference,
            window_size,
            threads,
            current: None,
            reads: GcHistogram::default(),
            skipped_reads: 0,
            handle: MetricsHandle::default(),
        }
    }

    #[must_use]
    pub fn handle(&self) -> MetricsHandle<GcBiasMetrics> {
        self.handle.clone()
    }

    fn window_gc(&mut self, slice: &ReferenceSlice, start: usize) -> Option<Composition> {
        if self.current.as_ref().map(|c| c.index) != Some(slice.index()) {
            debug!(sequence = slice.name(), "Computing window GC");
            self.current = Some(CachedSequence {
                index: slice.index(),
                gcs: calculate_all_gcs(slice.bases(), self.window_size),
            });
        }
        self.current.as_ref()?.gcs.get(start).copied()
    }

    fn bin_reference(&self) -> anyhow::Result<GcHistogram> {
        let count = self.reference.dictionary().len();
        let sequences = (0..count).map(|index| {
            self.reference
                .get(index)
                .map(|slice| slice.shared_bases())
                .map_err(|e| io::Error::new(io::ErrorKind::NotFound, e))
        });
        let histogram = ParallelBinner::new(self.threads)
            .compute_histogram(sequences, self.window_size, GC_BIN_COUNT)
            .context("Failed to bin reference windows by GC")?;
        Ok(histogram)
    }
}

impl<R: AlignmentRecord> Accumulator<R> for GcBiasAccumulator {
    fn name(&self) -> &str {
        "gc-bias"
    }

    fn setup(&mut self, _header: &sam::Header, _source: &Path) -> anyhow::Result<()> {
        anyhow::ensure!(self.window_size > 0, "window size must be greater than 0");
        self.current = None;
        self.reads = GcHistogram::default();
        self.skipped_reads = 0;
        Ok(())
    }

    fn accept_record(&mut self, record: &R, reference: Option<&ReferenceSlice>) -> anyhow::Result<()> {
        if record.is_unmapped() {
            return Ok(());
        }
        let (Some(slice), Some(start)) = (reference, record.alignment_start()) else {
            return Ok(());
        };

        let Some(offset) = start.checked_sub(1) else {
            self.skipped_reads += 1;
            return Ok(());
        };
        match self.window_gc(slice, offset) {
            Some(composition) => {
                if !self.reads.record(composition)? {
                    self.skipped_reads += 1;
                }
            }
            None => self.skipped_reads += 1,
        }
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.current = None;
        let windows = self.bin_reference()?;
        let metrics =
            GcBiasMetrics::from_histograms(self.window_size, &windows, &self.reads, self.skipped_reads);


        info!(
            windows = metrics.total_windows,
            reads = metrics.total_reads,
            skipped = metrics.skipped_reads,
            "GC bias collected"
        );
        self.handle.publish(metrics);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reference::ReferenceSequences;
    use crate::parsing::sam::parse_header_text;
    use noodles::core::Position;
    use noodles::sam::alignment::record::Flags;
    use noodles::sam::alignment::RecordBuf;

    fn reference() -> Arc<dyn ReferenceLookup> {
        // chr1: 4 windows of 4 at 50% (ACGT repeats), chr2: all G
        Arc::new(ReferenceSequences::new(vec![
            ("chr1".to_string(), b"ACGTACG".to_vec()),
            ("chr2".to_string(), b"GGGGG".to_vec()),
        ]))
    }

    fn read(reference: usize, start: usize) -> RecordBuf {
        RecordBuf::builder()
            .set_flags(Flags::empty())
            .set_reference_sequence_id(reference)
            .set_alignment_start(Position::try_from(start).unwrap())
            .build()
    }

    fn run(records: &[RecordBuf]) -> GcBiasMetrics {
        let reference = reference();
        let mut acc = GcBiasAccumulator::new(Arc::clone(&reference), 4, 2);
        let handle = acc.handle();
        let header = parse_header_text("@SQ\tSN:chr1\tLN:7\n@SQ\tSN:chr2\tLN:5\n").unwrap();
        Accumulator::<RecordBuf>::setup(&mut acc, &header, Path::new("in.sam")).unwrap();

        for record in records {
            let slice = record
                .reference_sequence_id()
                .map(|i| reference.get(i).unwrap());
            acc.accept_record(record, slice.as_ref()).unwrap();
        }
        Accumulator::<RecordBuf>::finish(&mut acc).unwrap();
        handle.get().unwrap()
    }

    #[test]
    fn test_reads_binned_by_window_gc() {
        let metrics = run(&[read(0, 1), read(0, 2), read(1, 1), read(1, 2)]);

        assert_eq!(metrics.total_reads, 4);
        assert_eq!(metrics.bins[50].read_starts, 2);
        assert_eq!(metrics.bins[100].read_starts, 2);
        // chr1 windows: ACGT CGTA GTAC TACG -> all 50; chr2: GGGG GGGG -> 100
        assert_eq!(metrics.bins[50].windows, 4);
        assert_eq!(metrics.bins[100].windows, 2);
        assert_eq!(metrics.total_windows, 6);
    }

    #[test]
    fn test_normalized_coverage() {
        let metrics = run(&[read(0, 1), read(0, 2), read(1, 1), read(1, 2)]);

        // 50% of reads over 4/6 of windows, 50% of reads over 2/6 of windows
        assert!((metrics.bins[50].normalized_coverage - 0.75).abs() < 1e-9);
        assert!((metrics.bins[100].normalized_coverage - 1.5).abs() < 1e-9);
        assert!(metrics.bins[0].normalized_coverage.abs() < f64::EPSILON);
    }

    #[test]
    fn test_reads_past_last_window_are_skipped() {
        let metrics = run(&[read(1, 4)]);
        assert_eq!(metrics.total_reads, 0);
        assert_eq!(metrics.skipped_reads, 1);
    }

    #[test]
    fn test_unmapped_reads_are_ignored() {
        let unmapped = RecordBuf::builder().set_flags(Flags::UNMAPPED).build();
        let metrics = run(&[unmapped]);
        assert_eq!(metrics.total_reads, 0);
        assert_eq!(metrics.skipped_reads, 0);
    }

    #[test]
    fn test_writes_table() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = run(&[]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let path = dir.path().join("sample.gc_bias.tsv");
        metrics.write_tsv(&path).unwrap();
        let table = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "gc\twindows\tread_starts\tnormalized_coverage");
        assert_eq!(lines.len(), 1 + GC_BIN_COUNT);
        assert!(lines[51].starts_with("50\t4\t0\t"));
    }

    /// Record type whose start can be zero, below the 1-based range.
    struct ZeroStart;

    impl AlignmentRecord for ZeroStart {
        fn reference_index(&self) -> Option<usize> {
            Some(0)
        }
        fn alignment_start(&self) -> Option<usize> {
            Some(0)
        }
        fn is_unmapped(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_zero_start_is_skipped() {
        let reference = reference();
        let mut acc = GcBiasAccumulator::new(Arc::clone(&reference), 4, 1);
        let header = parse_header_text("@SQ\tSN:chr1\tLN:7\n").unwrap();
        Accumulator::<ZeroStart>::setup(&mut acc, &header, Path::new("in.sam")).unwrap();

        let slice = reference.get(0).unwrap();
        acc.accept_record(&ZeroStart, Some(&slice)).unwrap();
        assert_eq!(acc.skipped_reads, 1);
        assert_eq!(acc.reads.total(), 0);
    }
}
