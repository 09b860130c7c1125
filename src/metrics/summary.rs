//! Record counts overall and per reference sequence.

use std::path::Path;

use anyhow::bail;
use noodles::sam;
use serde::Serialize;
use tracing::debug;

use crate::core::record::AlignmentRecord;
use crate::core::reference::ReferenceSlice;
use crate::metrics::{write_tsv, MetricsHandle};
use crate::pipeline::accumulator::Accumulator;

/// Mapped record count for one reference sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceCount {
    pub name: String,
    pub mapped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlignmentSummary {
    pub total_records: u64,
    pub mapped: u64,
    pub unmapped: u64,
    /// Records with no reference index (the unmapped tail)
    pub unplaced: u64,
    pub per_reference: Vec<ReferenceCount>,
}

/// One line of the alignment summary table; `reference` is `*` for run totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub reference: String,
    pub metric: String,
    pub value: u64,
}

impl SummaryRow {
    fn new(reference: &str, metric: &str, value: u64) -> Self {
        Self {
            reference: reference.to_string(),
            metric: metric.to_string(),
            value,
        }
    }
}

impl AlignmentSummary {
    /// Totals first, then mapped counts per reference in header order.
    #[must_use]
    pub fn rows(&self) -> Vec<SummaryRow> {
        let mut rows = vec![
            SummaryRow::new("*", "total_records", self.total_records),
            SummaryRow::new("*", "mapped", self.mapped),
            SummaryRow::new("*", "unmapped", self.unmapped),
            SummaryRow::new("*", "unplaced", self.unplaced),
        ];
        rows.extend(
            self.per_reference
                .iter()
                .map(|count| SummaryRow::new(&count.name, "mapped", count.mapped)),
        );
        rows
    }

    /// Write the summary table to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_tsv(&self, path: &Path) -> anyhow::Result<()> {
        write_tsv(path, &self.rows())
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mapped_fraction(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            self.mapped as f64 / self.total_records as f64
        }
    }
}

/// Counts records by mapping state; reads the unmapped tail.
pub struct AlignmentSummaryAccumulator {
    summary: AlignmentSummary,
    handle: MetricsHandle<AlignmentSummary>,
}

impl AlignmentSummaryAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            summary: AlignmentSummary::default(),
            handle: MetricsHandle::default(),
        }
    }

    #[must_use]
    pub fn handle(&self) -> MetricsHandle<AlignmentSummary> {
        self.handle.clone()
    }
}

impl Default for AlignmentSummaryAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: AlignmentRecord> Accumulator<R> for AlignmentSummaryAccumulator {
    fn name(&self) -> &str {
        "alignment-summary"
    }

    fn setup(&mut self, header: &sam::Header, source: &Path) -> anyhow::Result<()> {
        debug!(source = %source.display(), "Collecting alignment summary");
        self.summary = AlignmentSummary {
            per_reference: header
                .reference_sequences()
                .keys()
                .map(|name| ReferenceCount {
                    name: name.to_string(),
                    mapped: 0,
                })
                .collect(),
            ..AlignmentSummary::default()
        };
        Ok(())
    }

    fn accept_record(&mut self, record: &R, _reference: Option<&ReferenceSlice>) -> anyhow::Result<()> {
        self.summary.total_records += 1;
        if record.reference_index().is_none() {
            self.summary.unplaced += 1;
        }
        if record.is_unmapped() {
            self.summary.unmapped += 1;
            return Ok(());
        }

        self.summary.mapped += 1;
        if let Some(index) = record.reference_index() {
            let Some(count) = self.summary.per_reference.get_mut(index) else {
                bail!(
                    "record maps to reference #{index} but the header has {} sequences",
                    self.summary.per_reference.len()
                );
            };
            count.mapped += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        let summary = std::mem::take(&mut self.summary);
        debug!(records = summary.total_records, "Alignment summary collected");
        self.handle.publish(summary);
        Ok(())
    }

    fn uses_unmapped_tail(&self) -> bool {
        true
    }
}
