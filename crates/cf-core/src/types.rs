//! Common data types for cardfit

use serde::{Deserialize, Serialize};

/// Binned histogram as exchanged with the external histogram store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Histogram name (key inside its file).
    pub name: String,
    /// Bin edges (length = n_bins + 1).
    pub bin_edges: Vec<f64>,
    /// Bin contents (sum of weights per bin).
    pub bin_content: Vec<f64>,
    /// Sum of squared weights per bin, when tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sumw2: Option<Vec<f64>>,
}

impl Histogram {
    /// Create a histogram without per-bin variances.
    pub fn new(name: impl Into<String>, bin_edges: Vec<f64>, bin_content: Vec<f64>) -> Self {
        Self { name: name.into(), bin_edges, bin_content, sumw2: None }
    }

    /// Number of bins (excluding under/overflow).
    pub fn n_bins(&self) -> usize {
        self.bin_content.len()
    }

    /// Sum of bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content.iter().sum()
    }

    /// Bin contents divided by the integral. `None` for an empty histogram.
    pub fn bin_fractions(&self) -> Option<Vec<f64>> {
        let total = self.integral();
        if total == 0.0 {
            return None;
        }
        Some(self.bin_content.iter().map(|c| c / total).collect())
    }

    /// Return a copy stored under a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self { name: name.into(), ..self.clone() }
    }
}

/// Fitted value of one parameter of interest.
///
/// Errors are stored as non-negative magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoiEstimate {
    /// Best-fit value
    pub central: f64,
    /// Downward uncertainty (magnitude)
    pub err_down: f64,
    /// Upward uncertainty (magnitude)
    pub err_up: f64,
}

impl PoiEstimate {
    /// Create an estimate; negative error inputs are stored as magnitudes.
    pub fn new(central: f64, err_down: f64, err_up: f64) -> Self {
        Self { central, err_down: err_down.abs(), err_up: err_up.abs() }
    }

    /// Mean of the two error magnitudes.
    pub fn symmetric_error(&self) -> f64 {
        0.5 * (self.err_down + self.err_up)
    }
}

/// Fit result containing POI estimates and (optionally) their correlations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// POI names, in fit order
    pub poi_names: Vec<String>,

    /// Estimates, parallel to `poi_names`
    pub estimates: Vec<PoiEstimate>,

    /// Correlation matrix (row-major, N×N over `poi_names`). Only the structured
    /// read path can fill this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<Vec<f64>>,
}

impl FitResult {
    /// Create a fit result without correlations
    pub fn new() -> Self {
        Self { poi_names: Vec::new(), estimates: Vec::new(), correlation: None }
    }

    /// Append a POI estimate. Replaces an existing entry with the same name.
    pub fn insert(&mut self, name: impl Into<String>, estimate: PoiEstimate) {
        let name = name.into();
        if let Some(i) = self.index_of(&name) {
            self.estimates[i] = estimate;
        } else {
            self.poi_names.push(name);
            self.estimates.push(estimate);
        }
    }

    /// Number of POIs
    pub fn len(&self) -> usize {
        self.poi_names.len()
    }

    /// True if no POI was recorded
    pub fn is_empty(&self) -> bool {
        self.poi_names.is_empty()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.poi_names.iter().position(|n| n == name)
    }

    /// Estimate for a POI by name
    pub fn get(&self, name: &str) -> Option<&PoiEstimate> {
        self.index_of(name).map(|i| &self.estimates[i])
    }

    /// Iterate `(name, estimate)` pairs in fit order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PoiEstimate)> {
        self.poi_names.iter().map(String::as_str).zip(self.estimates.iter())
    }

    /// Correlation between two POIs. `None` if correlations were not read.
    pub fn correlation(&self, a: &str, b: &str) -> Option<f64> {
        let corr = self.correlation.as_ref()?;
        let n = self.poi_names.len();
        let (i, j) = (self.index_of(a)?, self.index_of(b)?);
        corr.get(i * n + j).copied()
    }
}

impl Default for FitResult {
    fn default() -> Self {
        Self::new()
    }
}
