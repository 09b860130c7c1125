use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gc::window::Composition;

/// One bin per GC percentage, 0 to 100 inclusive.
pub const GC_BIN_COUNT: usize = 101;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistogramError {
    #[error("GC bin {bin} is outside a histogram of {bin_count} bins")]
    BinOutOfRange { bin: usize, bin_count: usize },

    #[error("Cannot merge histograms of {left} and {right} bins")]
    LengthMismatch { left: usize, right: usize },
}

/// Window counts indexed by GC percentage.
///
/// Per-worker histograms are merged by elementwise sum, so the merged result
/// does not depend on the order in which partial histograms are combined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcHistogram {
    bins: Vec<u64>,
}

impl Default for GcHistogram {
    fn default() -> Self {
        Self::new(GC_BIN_COUNT)
    }
}

impl GcHistogram {
    #[must_use]
    pub fn new(bin_count: usize) -> Self {
        Self {
            bins: vec![0; bin_count],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    #[must_use]
    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    #[must_use]
    pub fn get(&self, bin: usize) -> Option<u64> {
        self.bins.get(bin).copied()
    }

    /// Add one to `bin`.
    ///
    /// # Errors
    ///
    /// Returns `HistogramError::BinOutOfRange` if `bin` has no slot.
    pub fn increment(&mut self, bin: usize) -> Result<(), HistogramError> {
        let bin_count = self.bins.len();
        let slot = self
            .bins
            .get_mut(bin)
            .ok_or(HistogramError::BinOutOfRange { bin, bin_count })?;
        *slot += 1;
        Ok(())
    }

    /// Count a window composition; ambiguous windows are skipped.
    ///
    /// Returns whether the window was counted.
    ///
    /// # Errors
    ///
    /// Returns `HistogramError::BinOutOfRange` if the percentage has no slot.
    pub fn record(&mut self, composition: Composition) -> Result<bool, HistogramError> {
        match composition.percent() {
            Some(percent) => self.increment(usize::from(percent)).map(|()| true),
            None => Ok(false),
        }
    }

    /// Elementwise sum of `other` into `self`.
    ///
    /// # Errors
    ///
    /// Returns `HistogramError::LengthMismatch` if the bin counts differ.
    pub fn merge(&mut self, other: &GcHistogram) -> Result<(), HistogramError> {
        if self.bins.len() != other.bins.len() {
            return Err(HistogramError::LengthMismatch {
                left: self.bins.len(),
                right: other.bins.len(),
            });
        }
        for (mine, theirs) in self.bins.iter_mut().zip(&other.bins) {
            *mine += theirs;
        }
        Ok(())
    }

    /// Sum over all bins
    #[must_use]
    pub fn total(&self) -> u64 {
        self.bins.iter().sum()
    }
}
