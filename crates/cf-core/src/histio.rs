//! Default histogram source/sink implementations.
//!
//! `JsonHistogramFile` stores a flat `{name: histogram}` map. Real analyses
//! plug a ROOT-backed implementation of the same traits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{Histogram, HistogramSink, HistogramSource, Result};

/// In-memory histogram collection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistograms {
    label: String,
    histograms: BTreeMap<String, Histogram>,
}

impl InMemoryHistograms {
    /// Empty collection with a label used in error messages.
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), histograms: BTreeMap::new() }
    }

    /// Insert (or replace) a histogram under its own name.
    pub fn insert(&mut self, histogram: Histogram) {
        self.histograms.insert(histogram.name.clone(), histogram);
    }

    /// Number of stored histograms.
    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }
}

impl HistogramSource for InMemoryHistograms {
    fn histogram(&self, name: &str) -> Result<Option<Histogram>> {
        Ok(self.histograms.get(name).cloned())
    }

    fn names(&self) -> Vec<String> {
        self.histograms.keys().cloned().collect()
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Histogram file serialized as JSON.
#[derive(Debug, Clone)]
pub struct JsonHistogramFile {
    path: PathBuf,
    histograms: BTreeMap<String, Histogram>,
}

impl JsonHistogramFile {
    /// Load a file written by [`JsonHistogramSink`] (or any `{name: histogram}` map).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path)?;
        let histograms: BTreeMap<String, Histogram> = serde_json::from_str(&text)?;
        Ok(Self { path, histograms })
    }

    /// Path this file was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistogramSource for JsonHistogramFile {
    fn histogram(&self, name: &str) -> Result<Option<Histogram>> {
        Ok(self.histograms.get(name).cloned())
    }

    fn names(&self) -> Vec<String> {
        self.histograms.keys().cloned().collect()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Writes channel-local histogram files as JSON.
#[derive(Debug, Clone)]
pub struct JsonHistogramSink {
    prefix: String,
}

impl JsonHistogramSink {
    /// Files are named `<prefix><channel>.json`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for JsonHistogramSink {
    fn default() -> Self {
        Self::new("histograms_")
    }
}

impl HistogramSink for JsonHistogramSink {
    fn file_name(&self, channel: &str) -> String {
        format!("{}{}.json", self.prefix, channel)
    }

    fn write(&self, dir: &Path, channel: &str, histograms: &[Histogram]) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name(channel));
        let map: BTreeMap<&str, &Histogram> =
            histograms.iter().map(|h| (h.name.as_str(), h)).collect();
        std::fs::write(&path, serde_json::to_string_pretty(&map)?)?;
        Ok(path)
    }
}
