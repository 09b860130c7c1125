use noodles::sam::alignment::RecordBuf;

/// The alignment record attributes the single-pass pipeline relies on.
///
/// Records are produced once by the source and only read afterwards; every
/// accumulator in a run sees the same record by shared reference.
pub trait AlignmentRecord: Send + Sync + 'static {
    /// 0-based index into the header's reference sequences, if any
    fn reference_index(&self) -> Option<usize>;

    /// 1-based leftmost alignment position, if any
    fn alignment_start(&self) -> Option<usize>;

    fn is_unmapped(&self) -> bool;

    /// Key for coordinate order; records without a reference sort last.
    fn coordinate_key(&self) -> (usize, usize) {
        (
            self.reference_index().unwrap_or(usize::MAX),
            self.alignment_start().unwrap_or(0),
        )
    }
}

impl AlignmentRecord for RecordBuf {
    fn reference_index(&self) -> Option<usize> {
        self.reference_sequence_id()
    }

    fn alignment_start(&self) -> Option<usize> {
        RecordBuf::alignment_start(self).map(usize::from)
    }

    fn is_unmapped(&self) -> bool {
        self.flags().is_unmapped()
    }
}
