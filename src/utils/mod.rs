//! Shared helpers: thread-count resolution, progress logging, synchronization
//! primitives, and input validation.

pub mod parallelism;
pub mod progress;
pub mod sync;
pub mod validation;
