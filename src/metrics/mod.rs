//! Concrete accumulators.
//!
//! - [`summary`]: record counts overall and per reference sequence
//! - [`gc_bias`]: read starts versus reference windows, by window GC
//!
//! Accumulators only compute in `finish` and publish their values through a
//! [`MetricsHandle`]. Callers write the tables with [`write_tsv`] once the
//! whole run has succeeded, so a failed run leaves no metric files behind.

pub mod gc_bias;
pub mod summary;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use serde::Serialize;

/// Shared slot a finished accumulator publishes its metrics into.
#[derive(Debug)]
pub struct MetricsHandle<T>(Arc<Mutex<Option<T>>>);

impl<T> Clone for MetricsHandle<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for MetricsHandle<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }
}

impl<T: Clone> MetricsHandle<T> {
    /// The published metrics, once the accumulator has finished
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.0.lock().clone()
    }

    fn publish(&self, metrics: T) {
        *self.0.lock() = Some(metrics);
    }
}

/// `<prefix>.<suffix>`, keeping any directories in the prefix.
#[must_use]
pub fn output_path(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Write serializable metric rows as a tab-separated table with a header line.
///
/// # Errors
///
/// Returns an error if the file cannot be created or a row cannot be written.
pub fn write_tsv<T: Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path() {
        assert_eq!(
            output_path(Path::new("out/sample"), "gc_bias.tsv"),
            PathBuf::from("out/sample.gc_bias.tsv")
        );
    }

    #[derive(Serialize)]
    struct Row {
        name: &'static str,
        count: u64,
    }

    #[test]
    fn test_write_tsv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.tsv");
        let rows = [Row { name: "a", count: 1 }, Row { name: "b", count: 2 }];
        write_tsv(&path, &rows).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "name\tcount\na\t1\nb\t2\n"
        );
    }

    #[test]
    fn test_write_tsv_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_tsv(dir.path(), &[Row { name: "a", count: 1 }]).unwrap_err();
        assert!(err.to_string().starts_with("Failed to create"));
    }

    #[test]
    fn test_handle_publishes_to_clones() {
        let handle = MetricsHandle::<u32>::default();
        let reader = handle.clone();
        assert_eq!(reader.get(), None);
        handle.publish(7);
        assert_eq!(reader.get(), Some(7));
    }
}
