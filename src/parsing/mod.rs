//! Readers for the inputs seqpass consumes.
//!
//! - **SAM/BAM files**: header, sort order, `@SQ` dictionary and a record stream
//! - **FASTA files**: whole references for lookup, or one sequence at a time for binning
//!
//! Plain and gzipped FASTA are both accepted.
//!
//! ## Example
//!
//! ```rust,no_run
//! use seqpass::parsing::sam::{dictionary_from_header, with_alignment_records};
//! use std::path::Path;
//!
//! let count = with_alignment_records(Path::new("sample.bam"), |header, records| {
//!     println!("{} sequences", dictionary_from_header(header).len());
//!     records.count()
//! })
//! .unwrap();
//! ```

pub mod fasta;
pub mod sam;
