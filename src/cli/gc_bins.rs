//! GC bins command - count every reference window by GC percentage.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use crate::cli::OutputFormat;
use crate::gc::binner::{BinningReport, ParallelBinner};
use crate::gc::histogram::GC_BIN_COUNT;
use crate::metrics::gc_bias::DEFAULT_WINDOW_SIZE;
use crate::parsing;

#[derive(Args)]
pub struct GcBinsArgs {
    /// Reference FASTA (optionally gzipped)
    #[arg(short = 'R', long)]
    pub reference: PathBuf,

    /// Window size in bases
    #[arg(short, long, default_value_t = DEFAULT_WINDOW_SIZE)]
    pub window_size: usize,

    /// Number of histogram bins (at least 101)
    #[arg(long, default_value_t = GC_BIN_COUNT)]
    pub bins: usize,

    /// Worker threads (0 = all cores)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Write the histogram here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Execute the gc-bins command
///
/// # Errors
///
/// Returns an error if the reference cannot be read, the parameters are
/// invalid, or the output cannot be written.
#[allow(clippy::needless_pass_by_value)]
pub fn run(args: GcBinsArgs, format: OutputFormat, verbose: bool) -> anyhow::Result<()> {
    let binner = ParallelBinner::new(args.threads);
    if verbose {
        eprintln!(
            "Binning {} with {} workers, window {} bp",
            args.reference.display(),
            binner.threads(),
            args.window_size
        );
    }

    let sequences = parsing::fasta::stream_sequences(&args.reference)
        .with_context(|| format!("Failed to open reference {}", args.reference.display()))?;
    let report = binner.compute(sequences, args.window_size, args.bins)?;

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };

    match format {
        OutputFormat::Text => write_text(&mut out, &args, &report)?,
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?,
        OutputFormat::Tsv => write_tsv(&mut out, &report)?,
    }
    out.flush()?;

    Ok(())
}

fn write_text(out: &mut dyn Write, args: &GcBinsArgs, report: &BinningReport) -> io::Result<()> {
    writeln!(out, "Reference: {}", args.reference.display())?;
    writeln!(out, "Window size: {}", args.window_size)?;
    writeln!(
        out,
        "Sequences: {}  Windows: {}  Ambiguous: {}",
        report.sequences, report.windows, report.ambiguous_windows
    )?;
    writeln!(out)?;
    for (gc, count) in report.histogram.bins().iter().enumerate() {
        if *count > 0 {
            writeln!(out, "  {gc:>3}%  {count}")?;
        }
    }
    Ok(())
}

fn write_tsv(out: &mut dyn Write, report: &BinningReport) -> io::Result<()> {
    writeln!(out, "gc\twindows")?;
    for (gc, count) in report.histogram.bins().iter().enumerate() {
        writeln!(out, "{gc}\t{count}")?;
    }
    Ok(())
}
