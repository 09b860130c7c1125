use std::thread::available_parallelism;

fn normalize(requested: usize, max: usize) -> usize {
    match requested {
        0 => max.max(1),
        n => n,
    }
}

/// Resolve a requested thread count, where 0 means every available core.
///
/// Falls back to a single thread if the hardware parallelism cannot be queried.
#[must_use]
pub fn resolve_threads(requested: usize) -> usize {
    let max = available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    normalize(requested, max)
}
