//! FASTA reference reading using noodles.
//!
//! Bases are uppercased on the way in. Supported extensions:
//! - `.fa`, `.fasta`, `.fna` (uncompressed)
//! - `.fa.gz`, `.fasta.gz`, `.fna.gz` (gzip compressed)
//! - `.fa.bgz`, `.fasta.bgz`, `.fna.bgz` (bgzip compressed)

use std::ffi::OsStr;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use noodles::fasta;
use tracing::warn;

use crate::core::reference::ReferenceSequences;
use crate::parsing::sam::ParseError;

/// Check if the path has a FASTA extension
#[must_use]
pub fn is_fasta_file(path: &Path) -> bool {
    let path_str = path.to_string_lossy().to_lowercase();

    if path_str.ends_with(".fa.gz")
        || path_str.ends_with(".fasta.gz")
        || path_str.ends_with(".fna.gz")
        || path_str.ends_with(".fa.bgz")
        || path_str.ends_with(".fasta.bgz")
        || path_str.ends_with(".fna.bgz")
    {
        return true;
    }

    matches!(
        path.extension()
            .and_then(OsStr::to_str)
            .map(str::to_lowercase)
            .as_deref(),
        Some("fa" | "fasta" | "fna")
    )
}

#[allow(clippy::case_sensitive_file_extension_comparisons)] // Already lowercased
fn is_gzipped(path: &Path) -> bool {
    let path_str = path.to_string_lossy().to_lowercase();
    path_str.ends_with(".gz") || path_str.ends_with(".bgz")
}

fn open_reader(path: &Path) -> Result<fasta::io::Reader<Box<dyn BufRead + Send>>, ParseError> {
    if !is_fasta_file(path) {
        warn!(path = %path.display(), "No FASTA extension; reading as FASTA anyway");
    }
    let file = std::fs::File::open(path)?;
    let inner: Box<dyn BufRead + Send> = if is_gzipped(path) {
        // bgzip output is multi-member gzip
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(fasta::io::Reader::new(inner))
}

fn uppercased(record: &fasta::Record) -> Vec<u8> {
    let mut bases = record.sequence().as_ref().to_vec();
    bases.make_ascii_uppercase();
    bases
}

/// Load every sequence of a FASTA file into memory.
///
/// # Errors
///
/// Returns `ParseError::Io` if the file cannot be read, `ParseError::Noodles`
/// if a record is malformed, or `ParseError::InvalidFormat` if the file holds
/// no sequences.
pub fn read_reference(path: &Path) -> Result<ReferenceSequences, ParseError> {
    let mut reader = open_reader(path)?;
    let mut sequences = Vec::new();

    for result in reader.records() {
        let record = result
            .map_err(|e| ParseError::Noodles(format!("Failed to parse FASTA record: {e}")))?;
        let name = String::from_utf8_lossy(record.name()).to_string();
        sequences.push((name, uppercased(&record)));
    }

    if sequences.is_empty() {
        return Err(ParseError::InvalidFormat(
            "No sequences found in FASTA file".to_string(),
        ));
    }

    Ok(ReferenceSequences::new(sequences))
}

/// Stream the uppercased bases of each FASTA record, one record in memory at a time.
///
/// # Errors
///
/// Returns `ParseError::Io` if the file cannot be opened. Errors reading
/// individual records surface through the iterator.
pub fn stream_sequences(
    path: &Path,
) -> Result<impl Iterator<Item = io::Result<Vec<u8>>> + Send, ParseError> {
    let mut reader = open_reader(path)?;
    Ok(std::iter::from_fn(move || {
        reader
            .records()
            .next()
            .map(|result| result.map(|record| uppercased(&record)))
    }))
}
