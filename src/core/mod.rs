//! Core data types shared by the pipeline and the GC engine.
//!
//! - [`AlignmentRecord`](record::AlignmentRecord): the record attributes the pipeline reads
//! - [`ReferenceSlice`](reference::ReferenceSlice): shared handle to one reference sequence
//! - [`ReferenceLookup`](reference::ReferenceLookup): random access to reference sequences by index
//! - [`SequenceDictionary`](reference::SequenceDictionary): ordered sequence names and lengths

pub mod record;
pub mod reference;
