//! Collect command - stream an alignment file once through every metric.
//!
//! The alignment summary always runs. Supplying a reference adds GC bias and
//! checks the input's sequence dictionary against the reference first.
//! Metric tables are written only after the whole run has succeeded.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use noodles::sam::alignment::RecordBuf;
use serde::Serialize;
use tracing::{debug, info};

use crate::cli::OutputFormat;
use crate::core::reference::ReferenceLookup;
use crate::metrics::gc_bias::{GcBiasAccumulator, GcBiasMetrics, DEFAULT_WINDOW_SIZE};
use crate::metrics::output_path;
use crate::metrics::summary::{AlignmentSummary, AlignmentSummaryAccumulator};
use crate::parsing;
use crate::pipeline::{PipelineConfig, PipelineError, RunSummary, SinglePass, DEFAULT_BATCH_SIZE};

#[derive(Args)]
pub struct CollectArgs {
    /// Input SAM or BAM file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output prefix; metrics are written to <prefix>.<metric>.tsv
    #[arg(short, long)]
    pub output: PathBuf,

    /// Reference FASTA (optionally gzipped); enables GC bias
    #[arg(short = 'R', long)]
    pub reference: Option<PathBuf>,

    /// Treat the input as coordinate sorted even if it claims otherwise.
    /// With false, unsorted input is an error.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub assume_sorted: bool,

    /// Stop after this many records (0 = read everything)
    #[arg(long, default_value_t = 0)]
    pub stop_after: u64,

    /// GC window size in bases
    #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
    pub window_size: usize,

    /// Records per batch handed to the workers
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Worker threads (0 = all cores)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Keep reading past the first record with no reference
    #[arg(long)]
    pub include_unmapped: bool,
}

#[derive(Serialize)]
struct CollectReport {
    input: PathBuf,
    run: RunSummary,
    alignment_summary: Option<AlignmentSummary>,
    gc_bias: Option<GcBiasMetrics>,
}

/// Execute the collect command
///
/// # Errors
///
/// Returns an error if an input cannot be read, the reference does not match
/// the input, or any metric fails. Pipeline failures carry a
/// [`PipelineError`](crate::pipeline::PipelineError) in the error chain.
#[allow(clippy::needless_pass_by_value)]
pub fn run(args: CollectArgs, format: OutputFormat, verbose: bool) -> anyhow::Result<()> {
    let reference: Option<Arc<dyn ReferenceLookup>> = match &args.reference {
        Some(path) => {
            let loaded = parsing::fasta::read_reference(path)
                .map_err(|e| PipelineError::input(path, e))?;
            if verbose {
                eprintln!("Reference: {} sequences", loaded.len());
            }
            Some(Arc::new(loaded) as Arc<dyn ReferenceLookup>)
        }
        None => None,
    };

    let config = PipelineConfig::default()
        .with_batch_size(args.batch_size)
        .with_threads(args.threads)
        .with_assume_sorted(args.assume_sorted)
        .with_stop_after(args.stop_after)
        .with_unmapped_tail(args.include_unmapped);

    let summary = AlignmentSummaryAccumulator::new();
    let summary_handle = summary.handle();

    let mut pass = SinglePass::<RecordBuf>::new(config);
    pass.add_accumulator(Box::new(summary));

    let mut gc_handle = None;
    if let Some(reference) = &reference {
        let gc_bias = GcBiasAccumulator::new(Arc::clone(reference), args.window_size, args.threads);
        gc_handle = Some(gc_bias.handle());
        pass.add_accumulator(Box::new(gc_bias));
        pass = pass.with_reference(Arc::clone(reference));
    }

    let run_summary = parsing::sam::with_alignment_records(&args.input, |header, records| {
        pass.run(header, &args.input, records)
    })
    .map_err(|e| PipelineError::input(&args.input, e))??;

    let alignment_summary = summary_handle.get();
    let gc_bias = gc_handle.and_then(|handle| handle.get());

    let mut written = Vec::new();
    if let Err(e) = write_tables(
        &args.output,
        alignment_summary.as_ref(),
        gc_bias.as_ref(),
        &mut written,
    ) {
        // All tables or none
        for path in &written {
            if let Err(remove) = fs::remove_file(path) {
                debug!(path = %path.display(), error = %remove, "Could not remove partial output");
            }
        }
        return Err(PipelineError::Output(e.into()).into());
    }

    info!(
        records = run_summary.records,
        output = %args.output.display(),
        "Metrics written"
    );

    let report = CollectReport {
        input: args.input.clone(),
        run: run_summary,
        alignment_summary,
        gc_bias,
    };

    match format {
        OutputFormat::Text => print_text(&report, &args),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Tsv => print_tsv(&report),
    }

    Ok(())
}

/// Write each available table, recording every path touched in `written`.
fn write_tables(
    prefix: &Path,
    summary: Option<&AlignmentSummary>,
    gc_bias: Option<&GcBiasMetrics>,
    written: &mut Vec<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(summary) = summary {
        let path = output_path(prefix, "alignment_summary.tsv");
        written.push(path.clone());
        summary.write_tsv(&path)?;
    }
    if let Some(gc_bias) = gc_bias {
        let path = output_path(prefix, "gc_bias.tsv");
        written.push(path.clone());
        gc_bias.write_tsv(&path)?;
    }
    Ok(())
}

fn print_text(report: &CollectReport, args: &CollectArgs) {
    println!("Input: {}", report.input.display());
    println!(
        "Records: {} in {} batches on {} workers (stopped: {:?})",
        report.run.records, report.run.batches, report.run.workers, report.run.stop_reason
    );

    if let Some(summary) = &report.alignment_summary {
        println!();
        println!("Alignment summary");
        println!("  Total:    {}", summary.total_records);
        println!(
            "  Mapped:   {} ({:.1}%)",
            summary.mapped,
            summary.mapped_fraction() * 100.0
        );
        println!("  Unmapped: {}", summary.unmapped);
        for count in summary.per_reference.iter().filter(|c| c.mapped > 0) {
            println!("    {}: {}", count.name, count.mapped);
        }
        println!(
            "  -> {}",
            output_path(&args.output, "alignment_summary.tsv").display()
        );
    }

    if let Some(gc) = &report.gc_bias {
        println!();
        println!("GC bias (window {} bp)", gc.window_size);
        println!("  Windows: {}", gc.total_windows);
        println!("  Reads:   {} ({} skipped)", gc.total_reads, gc.skipped_reads);
        println!("  -> {}", output_path(&args.output, "gc_bias.tsv").display());
    }
}

fn print_tsv(report: &CollectReport) {
    println!("metric\tvalue");
    println!("records\t{}", report.run.records);
    println!("batches\t{}", report.run.batches);
    if let Some(summary) = &report.alignment_summary {
        println!("total_records\t{}", summary.total_records);
        println!("mapped\t{}", summary.mapped);
        println!("unmapped\t{}", summary.unmapped);
        println!("unplaced\t{}", summary.unplaced);
    }
    if let Some(gc) = &report.gc_bias {
        println!("gc_windows\t{}", gc.total_windows);
        println!("gc_reads\t{}", gc.total_reads);
        println!("gc_skipped_reads\t{}", gc.skipped_reads);
    }
}
