//! Command-line interface for seqpass.
//!
//! Available commands:
//!
//! - **collect**: Stream an alignment file once through every metric accumulator
//! - **gc-bins**: Count reference windows by GC percentage
//!
//! ## Usage
//!
//! ```text
//! # Alignment summary only
//! seqpass collect --input sample.bam --output out/sample
//!
//! # Add GC bias against a reference, JSON summary on stdout
//! seqpass collect -i sample.bam -o out/sample -R ref.fa --format json
//!
//! # Reference windows by GC, 8 threads
//! seqpass gc-bins -R ref.fa --threads 8 --format tsv
//! ```

use clap::{Parser, Subcommand};

pub mod collect;
pub mod gc_bins;

#[derive(Parser)]
#[command(name = "seqpass")]
#[command(author = "Fulcrum Genomics")]
#[command(version)]
#[command(about = "Single-pass metric collection over SAM/BAM files and reference GC binning")]
#[command(
    long_about = "seqpass reads an alignment file exactly once and feeds every record, in order, to a set of metric accumulators running on a worker pool.\n\nIt can also bin every window of a reference FASTA by GC content in parallel."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Collect alignment metrics in a single pass
    Collect(collect::CollectArgs),

    /// Count reference windows by GC percentage
    GcBins(gc_bins::GcBinsArgs),
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Tsv,
}
