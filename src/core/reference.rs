use std::sync::Arc;

use thiserror::Error;

/// One entry of a sequence dictionary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceEntry {
    pub name: String,
    pub length: usize,
    /// Lowercase hex MD5 of the uppercased sequence, when known
    pub md5: Option<String>,
}

impl SequenceEntry {
    #[must_use]
    pub fn new(name: impl Into<String>, length: usize) -> Self {
        Self {
            name: name.into(),
            length,
            md5: None,
        }
    }

    #[must_use]
    pub fn with_md5(mut self, md5: impl Into<String>) -> Self {
        self.md5 = Some(md5.into());
        self
    }
}

/// Ordered reference sequence names and lengths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceDictionary {
    entries: Vec<SequenceEntry>,
}

impl SequenceDictionary {
    #[must_use]
    pub fn new(entries: Vec<SequenceEntry>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[SequenceEntry] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SequenceEntry> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Random-access handle to the bases of one reference sequence.
///
/// Cloning shares the underlying bases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSlice {
    index: usize,
    name: Arc<str>,
    bases: Arc<[u8]>,
}

impl ReferenceSlice {
    #[must_use]
    pub fn new(index: usize, name: impl Into<Arc<str>>, bases: impl Into<Arc<[u8]>>) -> Self {
        Self {
            index,
            name: name.into(),
            bases: bases.into(),
        }
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn bases(&self) -> &[u8] {
        &self.bases
    }

    /// Shared handle to the bases, for consumers that outlive the slice
    #[must_use]
    pub fn shared_bases(&self) -> Arc<[u8]> {
        Arc::clone(&self.bases)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("Reference index {index} is unknown ({count} sequences loaded)")]
    UnknownIndex { index: usize, count: usize },
}

/// Random access to reference sequences by header index.
pub trait ReferenceLookup: Send + Sync {
    /// Bases of the reference sequence at `index`.
    ///
    /// # Errors
    ///
    /// Returns `ReferenceError::UnknownIndex` if no sequence has that index.
    fn get(&self, index: usize) -> Result<ReferenceSlice, ReferenceError>;

    fn dictionary(&self) -> &SequenceDictionary;

    /// MD5 of the sequence at `index`, if the lookup can provide it.
    fn md5(&self, _index: usize) -> Option<String> {
        None
    }
}

/// Reference sequences held in memory, uppercased.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSequences {
    dictionary: SequenceDictionary,
    slices: Vec<ReferenceSlice>,
}

impl ReferenceSequences {
    /// Build from `(name, bases)` pairs in dictionary order.
    #[must_use]
    pub fn new(sequences: impl IntoIterator<Item = (String, Vec<u8>)>) -> Self {
        let mut entries = Vec::new();
        let mut slices = Vec::new();

        for (index, (name, mut bases)) in sequences.into_iter().enumerate() {
            bases.make_ascii_uppercase();
            entries.push(SequenceEntry::new(name.clone(), bases.len()));
            slices.push(ReferenceSlice::new(index, name, bases));
        }

        Self {
            dictionary: SequenceDictionary::new(entries),
            slices,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceSlice> {
        self.slices.iter()
    }
}

impl ReferenceLookup for ReferenceSequences {
    fn get(&self, index: usize) -> Result<ReferenceSlice, ReferenceError> {
        self.slices
            .get(index)
            .cloned()
            .ok_or(ReferenceError::UnknownIndex {
                index,
                count: self.slices.len(),
            })
    }

    fn dictionary(&self) -> &SequenceDictionary {
        &self.dictionary
    }

    fn md5(&self, index: usize) -> Option<String> {
        self.slices
            .get(index)
            .map(|slice| format!("{:x}", md5::compute(slice.bases())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_reference() -> ReferenceSequences {
        ReferenceSequences::new(vec![
            ("chr1".to_string(), b"acgtNNac".to_vec()),
            ("chr2".to_string(), b"GGCC".to_vec()),
        ])
    }

    #[test]
    fn test_sequences_are_uppercased() {
        let reference = make_reference();
        let slice = reference.get(0).unwrap();
        assert_eq!(slice.bases(), b"ACGTNNAC");
        assert_eq!(slice.name(), "chr1");
        assert_eq!(slice.index(), 0);
    }

    #[test]
    fn test_dictionary_follows_input_order() {
        let reference = make_reference();
        let dict = reference.dictionary();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get(1), Some(&SequenceEntry::new("chr2", 4)));
    }

    #[test]
    fn test_unknown_index() {
        let reference = make_reference();
        assert_eq!(
            reference.get(5),
            Err(ReferenceError::UnknownIndex { index: 5, count: 2 })
        );
    }

    #[test]
    fn test_md5_of_uppercased_bases() {
        let reference = ReferenceSequences::new(vec![("chr1".to_string(), b"acgt".to_vec())]);
        assert_eq!(
            reference.md5(0),
            Some("f1f8f4bf413b16ad135722aa4591043e".to_string())
        );
        assert_eq!(reference.md5(1), None);
    }

    #[test]
    fn test_slices_share_bases() {
        let reference = make_reference();
        let a = reference.get(1).unwrap();
        let b = reference.get(1).unwrap();
        assert!(Arc::ptr_eq(&a.shared_bases(), &b.shared_bases()));
    }
}
