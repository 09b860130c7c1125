//! GC composition of sequence windows.
//!
//! - [`window`]: incremental sliding-window GC counter
//! - [`histogram`]: window counts by GC percentage
//! - [`binner`]: parallel binning of reference windows by GC

pub mod binner;
pub mod histogram;
pub mod window;
