//! Centralized validation helpers.

use thiserror::Error;

use crate::core::reference::{ReferenceLookup, SequenceDictionary};

/// Validate that a string is a valid MD5 checksum (32 hex characters).
///
/// # Examples
///
/// ```
/// use seqpass::utils::validation::is_valid_md5;
///
/// assert!(is_valid_md5("f1f8f4bf413b16ad135722aa4591043e"));
/// assert!(!is_valid_md5("not-an-md5"));
/// assert!(!is_valid_md5("f1f8f4bf413b16ad135722aa4591043")); // 31 chars
/// ```
#[must_use]
pub fn is_valid_md5(s: &str) -> bool {
    s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Normalize an MD5 string to lowercase.
/// Returns None if the input is not a valid MD5.
#[must_use]
pub fn normalize_md5(s: &str) -> Option<String> {
    if is_valid_md5(s) {
        Some(s.to_lowercase())
    } else {
        None
    }
}

/// Ways an input's sequence dictionary can disagree with the reference
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DictionaryMismatch {
    #[error("header has {header} sequences but the reference has {reference}")]
    SequenceCount { header: usize, reference: usize },

    #[error("sequence #{index} is '{header}' in the header but '{reference}' in the reference")]
    Name {
        index: usize,
        header: String,
        reference: String,
    },

    #[error("sequence '{name}' has length {header} in the header but {reference} in the reference")]
    Length {
        name: String,
        header: usize,
        reference: usize,
    },

    #[error("sequence '{name}' has M5 {header} in the header but {reference} in the reference")]
    Md5 {
        name: String,
        header: String,
        reference: String,
    },
}

/// Check that the header dictionary describes the same sequences as the reference.
///
/// Sequences must agree on order, name, and length. MD5s are compared only
/// when the header carries one and the reference can compute one.
///
/// # Errors
///
/// Returns the first [`DictionaryMismatch`] found.
pub fn validate_dictionaries(
    header: &SequenceDictionary,
    reference: &dyn ReferenceLookup,
) -> Result<(), DictionaryMismatch> {
    let expected = reference.dictionary();
    if header.len() != expected.len() {
        return Err(DictionaryMismatch::SequenceCount {
            header: header.len(),
            reference: expected.len(),
        });
    }

    for (index, (ours, theirs)) in header.entries().iter().zip(expected.entries()).enumerate() {
        if ours.name != theirs.name {
            return Err(DictionaryMismatch::Name {
                index,
                header: ours.name.clone(),
                reference: theirs.name.clone(),
            });
        }
        if ours.length != theirs.length {
            return Err(DictionaryMismatch::Length {
                name: ours.name.clone(),
                header: ours.length,
                reference: theirs.length,
            });
        }
        let Some(claimed) = ours.md5.as_deref() else {
            continue;
        };
        if let Some(actual) = theirs.md5.clone().or_else(|| reference.md5(index)) {
            if !claimed.eq_ignore_ascii_case(&actual) {
                return Err(DictionaryMismatch::Md5 {
                    name: ours.name.clone(),
                    header: claimed.to_string(),
                    reference: actual,
                });
            }
        }
    }

    Ok(())
}

/// Require a strictly positive numeric parameter.
///
/// # Errors
///
/// Returns a message naming the parameter when `value` is zero.
pub fn require_positive(name: &str, value: usize) -> Result<usize, String> {
    if value == 0 {
        Err(format!("{name} must be greater than 0"))
    } else {
        Ok(value)
    }
}
