//! Incremental sliding-window GC composition.
//!
//! [`WindowCounter`] computes the GC percentage of a window over a byte
//! sequence. The first window is counted from scratch; each following window
//! shifted by exactly one base is updated in O(1) by removing the base that
//! left the window and adding the base that entered it.

use serde::{Deserialize, Serialize};

/// Windows with more than this many `N` bases have no defined composition.
pub const MAX_AMBIGUOUS_BASES: usize = 4;

/// GC composition of a single window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Composition {
    /// Percentage of G/C bases in the window, 0 to 100 inclusive
    Percent(u8),
    /// The window holds more than [`MAX_AMBIGUOUS_BASES`] `N` bases
    Ambiguous,
}

impl Composition {
    #[must_use]
    pub fn percent(self) -> Option<u8> {
        match self {
            Self::Percent(p) => Some(p),
            Self::Ambiguous => None,
        }
    }

    #[must_use]
    pub fn is_ambiguous(self) -> bool {
        matches!(self, Self::Ambiguous)
    }
}

#[inline]
fn is_gc(base: u8) -> bool {
    matches!(base, b'G' | b'g' | b'C' | b'c')
}

#[inline]
fn is_no_call(base: u8) -> bool {
    matches!(base, b'N' | b'n')
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    gc_count: usize,
    n_count: usize,
    /// First base of the previous window, removed on the next shift
    prior_base: u8,
    start: usize,
    end: usize,
}

impl WindowState {
    fn scan(bases: &[u8], start: usize, end: usize) -> Self {
        let mut gc_count = 0;
        let mut n_count = 0;
        for &base in &bases[start..end] {
            if is_gc(base) {
                gc_count += 1;
            } else if is_no_call(base) {
                n_count += 1;
            }
        }

        Self {
            gc_count,
            n_count,
            prior_base: bases[start],
            start,
            end,
        }
    }

    fn shift(&mut self, bases: &[u8]) {
        let entering = bases[self.end];
        if is_gc(entering) {
            self.gc_count += 1;
        } else if is_no_call(entering) {
            self.n_count += 1;
        }

        if is_gc(self.prior_base) {
            self.gc_count -= 1;
        } else if is_no_call(self.prior_base) {
            self.n_count -= 1;
        }

        self.start += 1;
        self.end += 1;
        self.prior_base = bases[self.start];
    }

    fn composition(&self) -> Composition {
        if self.n_count > MAX_AMBIGUOUS_BASES {
            return Composition::Ambiguous;
        }
        let width = (self.end - self.start) as u64;
        // gc_count <= width so the quotient is at most 100
        #[allow(clippy::cast_possible_truncation)]
        let percent = (self.gc_count as u64 * 100 / width) as u8;
        Composition::Percent(percent)
    }
}

/// Sliding-window GC counter for one sequence.
///
/// Call [`WindowCounter::reset`] before scanning a different sequence. A call
/// whose bounds are not the previous bounds shifted by one base falls back to
/// a full re-scan, so results never depend on the call pattern.
#[derive(Debug, Clone, Default)]
pub struct WindowCounter {
    state: Option<WindowState>,
}

impl WindowCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the previous window so the next call re-scans.
    pub fn reset(&mut self) {
        self.state = None;
    }

    /// Composition of `bases[start..end]`.
    ///
    /// # Panics
    ///
    /// Panics if the window is empty or extends past the end of `bases`.
    pub fn slide(&mut self, bases: &[u8], start: usize, end: usize) -> Composition {
        assert!(
            start < end && end <= bases.len(),
            "invalid window [{start}, {end}) over {} bases",
            bases.len()
        );

        let state = match self.state {
            Some(mut state) if state.start + 1 == start && state.end + 1 == end => {
                state.shift(bases);
                state
            }
            _ => WindowState::scan(bases, start, end),
        };

        self.state = Some(state);
        state.composition()
    }
}

/// Composition of every full window of `window_size` bases, indexed by window start.
///
/// Returns an empty vector when the window size is zero or longer than the sequence.
#[must_use]
pub fn calculate_all_gcs(bases: &[u8], window_size: usize) -> Vec<Composition> {
    if window_size == 0 || window_size > bases.len() {
        return Vec::new();
    }

    let mut counter = WindowCounter::new();
    (0..=bases.len() - window_size)
        .map(|start| counter.slide(bases, start, start + window_size))
        .collect()
}
