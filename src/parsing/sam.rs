use std::io::{self, BufReader};
use std::path::Path;

use noodles::sam::alignment::RecordBuf;
use noodles::sam::header::record::value::map::header::sort_order::COORDINATE;
use noodles::sam::header::record::value::map::header::tag as header_tag;
use noodles::{bam, sam};
use thiserror::Error;
use tracing::warn;

use crate::core::reference::{SequenceDictionary, SequenceEntry};
use crate::utils::validation::normalize_md5;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("noodles error: {0}")]
    Noodles(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
}

/// Open a SAM or BAM file and hand its header and record stream to `f`.
///
/// The format is chosen by extension; files without one are read as SAM.
/// Records are decoded lazily, one at a time, as `f` pulls them.
///
/// # Errors
///
/// Returns `ParseError::Io` if the file cannot be opened, `ParseError::Noodles`
/// if the header cannot be parsed, or `ParseError::UnsupportedFormat` for
/// unknown extensions.
pub fn with_alignment_records<T, F>(path: &Path, f: F) -> Result<T, ParseError>
where
    F: FnOnce(&sam::Header, &mut dyn Iterator<Item = io::Result<RecordBuf>>) -> T,
{
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);

    match extension.as_deref() {
        Some("bam") => {
            let mut reader = std::fs::File::open(path).map(bam::io::Reader::new)?;
            let header = reader
                .read_header()
                .map_err(|e| ParseError::Noodles(e.to_string()))?;
            let mut records = reader.record_bufs(&header);
            Ok(f(&header, &mut records))
        }
        Some("sam") | None => {
            let mut reader = std::fs::File::open(path)
                .map(BufReader::new)
                .map(sam::io::Reader::new)?;
            let header = reader
                .read_header()
                .map_err(|e| ParseError::Noodles(e.to_string()))?;
            let mut records = reader.record_bufs(&header);
            Ok(f(&header, &mut records))
        }
        Some(ext) => Err(ParseError::UnsupportedFormat(ext.to_string())),
    }
}

/// Parse SAM header text (`@HD`/`@SQ` lines).
///
/// # Errors
///
/// Returns `ParseError::InvalidFormat` if the text is not a valid SAM header.
pub fn parse_header_text(text: &str) -> Result<sam::Header, ParseError> {
    text.parse::<sam::Header>()
        .map_err(|e| ParseError::InvalidFormat(e.to_string()))
}

/// The `@HD SO` value, if the header declares one.
#[must_use]
pub fn sort_order(header: &sam::Header) -> Option<String> {
    header.header().and_then(|map| {
        map.other_fields()
            .get(&header_tag::SORT_ORDER)
            .map(|so| String::from_utf8_lossy(<_ as AsRef<[u8]>>::as_ref(so)).into_owned())
    })
}

/// Whether the header declares coordinate sort order.
#[must_use]
pub fn is_coordinate_sorted(header: &sam::Header) -> bool {
    header.header().is_some_and(|map| {
        map.other_fields()
            .get(&header_tag::SORT_ORDER)
            .is_some_and(|so| <_ as AsRef<[u8]>>::as_ref(so) == COORDINATE)
    })
}

/// Sequence dictionary from the header's `@SQ` lines, keeping valid `M5` tags.
#[must_use]
pub fn dictionary_from_header(header: &sam::Header) -> SequenceDictionary {
    use noodles::sam::header::record::value::map::tag::Other;

    let m5_tag = Other::try_from(*b"M5").ok();
    let mut entries = Vec::with_capacity(header.reference_sequences().len());

    for (name, map) in header.reference_sequences() {
        let mut entry = SequenceEntry::new(name.to_string(), map.length().get());

        if let Some(md5_value) = m5_tag.as_ref().and_then(|tag| map.other_fields().get(tag)) {
            let md5_str = md5_value.to_string();
            if let Some(normalized) = normalize_md5(&md5_str) {
                entry.md5 = Some(normalized);
            } else {
                warn!(
                    sequence = %entry.name,
                    md5 = %md5_str,
                    "Invalid MD5 checksum format, ignoring"
                );
            }
        }

        entries.push(entry);
    }

    SequenceDictionary::new(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::AlignmentRecord;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "@HD\tVN:1.6\tSO:coordinate\n\
                          @SQ\tSN:chr1\tLN:1000\tM5:F1F8F4BF413B16AD135722AA4591043E\n\
                          @SQ\tSN:chr2\tLN:500\n";

    #[test]
    fn test_sort_order() {
        let header = parse_header_text(HEADER).unwrap();
        assert!(is_coordinate_sorted(&header));
        assert_eq!(sort_order(&header).as_deref(), Some("coordinate"));

        let unsorted = parse_header_text("@HD\tVN:1.6\tSO:queryname\n").unwrap();
        assert!(!is_coordinate_sorted(&unsorted));

        let bare = parse_header_text("@SQ\tSN:chr1\tLN:10\n").unwrap();
        assert!(!is_coordinate_sorted(&bare));
        assert_eq!(sort_order(&bare), None);
    }

    #[test]
    fn test_dictionary_from_header() {
        let header = parse_header_text(HEADER).unwrap();
        let dict = dictionary_from_header(&header);

        assert_eq!(dict.len(), 2);
        let chr1 = dict.get(0).unwrap();
        assert_eq!(chr1.name, "chr1");
        assert_eq!(chr1.length, 1000);
        assert_eq!(chr1.md5.as_deref(), Some("f1f8f4bf413b16ad135722aa4591043e"));
        assert_eq!(dict.get(1).unwrap().md5, None);
    }

    #[test]
    fn test_invalid_header_text() {
        assert!(parse_header_text("@SQ\tSN:chr1\n").is_err());
    }

    #[test]
    fn test_with_alignment_records_reads_sam() {
        let mut temp = NamedTempFile::with_suffix(".sam").unwrap();
        write!(
            temp,
            "{HEADER}r1\t0\tchr1\t10\t60\t4M\t*\t0\t0\tACGT\tIIII\n\
             r2\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII\n"
        )
        .unwrap();
        temp.flush().unwrap();

        let keys = with_alignment_records(temp.path(), |header, records| {
            assert_eq!(header.reference_sequences().len(), 2);
            records
                .map(|r| r.map(|record| record.coordinate_key()))
                .collect::<io::Result<Vec<_>>>()
        })
        .unwrap()
        .unwrap();

        assert_eq!(keys, vec![(0, 10), (usize::MAX, 0)]);
    }

    #[test]
    fn test_unsupported_extension() {
        let temp = NamedTempFile::with_suffix(".cram").unwrap();
        let result = with_alignment_records(temp.path(), |_, _| ());
        assert!(matches!(result, Err(ParseError::UnsupportedFormat(_))));
    }
}
