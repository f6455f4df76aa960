//! Core traits for cardfit
//!
//! Histogram filling and ROOT I/O live outside this workspace. The pipeline
//! only needs to look histograms up by name and to write a reduced,
//! channel-local copy of the ones a datacard references; these two traits
//! are that boundary.

use std::path::{Path, PathBuf};

use crate::{Histogram, Result};

/// Read access to a named collection of histograms (one input file).
pub trait HistogramSource {
    /// Fetch a histogram by name. `Ok(None)` if the name is absent.
    fn histogram(&self, name: &str) -> Result<Option<Histogram>>;

    /// All histogram names available in this source.
    fn names(&self) -> Vec<String>;

    /// Human-readable origin, used in error messages.
    fn describe(&self) -> String;
}

/// Write access for channel-local histogram files.
pub trait HistogramSink {
    /// File name (no directory) used for the histograms of `channel`.
    fn file_name(&self, channel: &str) -> String;

    /// Persist `histograms` into `dir/file_name(channel)`, returning the path.
    fn write(&self, dir: &Path, channel: &str, histograms: &[Histogram]) -> Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneHist;

    impl HistogramSource for OneHist {
        fn histogram(&self, name: &str) -> Result<Option<Histogram>> {
            Ok((name == "h").then(|| Histogram::new("h", vec![0.0, 1.0], vec![4.0])))
        }

        fn names(&self) -> Vec<String> {
            vec!["h".into()]
        }

        fn describe(&self) -> String {
            "one".into()
        }
    }

    #[test]
    fn test_dummy_source() {
        let src = OneHist;
        assert!(src.histogram("h").unwrap().is_some());
        assert!(src.histogram("g").unwrap().is_none());
        assert_eq!(src.names(), vec!["h".to_string()]);
    }
}
