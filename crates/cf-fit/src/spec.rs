//! Fit specifications.

use std::collections::BTreeMap;

use cf_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Name of the fit tool's default POI.
pub const DEFAULT_POI: &str = "r";

/// Fit method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    /// Discovery significance
    Significance,
    /// Full fit with shapes/pulls (`fit_s`)
    FitDiagnostics,
    /// Profile-likelihood intervals per POI (`fit_mdf`)
    MultiDimFit,
    /// Nuisance impacts
    Impacts,
    /// Goodness of fit (saturated by default)
    GoodnessOfFit,
    /// 1D likelihood scan on a grid
    LikelihoodScan,
}

impl FitMethod {
    /// All methods, in tag order.
    pub const ALL: [FitMethod; 6] = [
        FitMethod::Significance,
        FitMethod::FitDiagnostics,
        FitMethod::MultiDimFit,
        FitMethod::Impacts,
        FitMethod::GoodnessOfFit,
        FitMethod::LikelihoodScan,
    ];

    /// Short tag used in output names.
    pub fn tag(&self) -> &'static str {
        match self {
            FitMethod::Significance => "sig",
            FitMethod::FitDiagnostics => "fitdiag",
            FitMethod::MultiDimFit => "mdf",
            FitMethod::Impacts => "impacts",
            FitMethod::GoodnessOfFit => "gof",
            FitMethod::LikelihoodScan => "scan",
        }
    }

    /// Inverse of [`tag`](Self::tag).
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.tag() == tag)
    }

    /// `-M` value passed to the fit tool.
    pub fn tool_method(&self) -> &'static str {
        match self {
            FitMethod::Significance => "Significance",
            FitMethod::FitDiagnostics => "FitDiagnostics",
            FitMethod::MultiDimFit | FitMethod::LikelihoodScan => "MultiDimFit",
            FitMethod::Impacts => "Impacts",
            FitMethod::GoodnessOfFit => "GoodnessOfFit",
        }
    }

    /// Whether a frozen-nuisance (two-phase) variant exists for this method.
    pub fn supports_two_phase(&self) -> bool {
        !matches!(self, FitMethod::Impacts | FitMethod::GoodnessOfFit)
    }
}

/// Method-specific knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Mass label (`-m`)
    pub mass: String,
    /// Per-POI `(lo, hi)` range; also used for the multi-POI map
    pub poi_ranges: BTreeMap<String, (f64, f64)>,
    /// Grid points of a likelihood scan
    pub points: usize,
    /// Toys for goodness of fit (0 = data only)
    pub toys: usize,
    /// Random seed for toys
    pub seed: i64,
    /// Goodness-of-fit algorithm
    pub gof_algo: String,
    /// Only this nuisance floats in the second phase
    pub float_nuisance: Option<String>,
    /// Pass `--robustFit 1`
    pub robust_fit: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            mass: "125".to_string(),
            poi_ranges: BTreeMap::new(),
            points: 30,
            toys: 0,
            seed: 123456,
            gof_algo: "saturated".to_string(),
            float_nuisance: None,
            robust_fit: false,
        }
    }
}

/// One fit to run against one card.
///
/// Together with the card name this fully determines the command sequence
/// and every output file name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSpec {
    /// Fit method
    pub method: FitMethod,
    /// Parameters of interest (default `["r"]`)
    #[serde(default = "default_pois")]
    pub pois: Vec<String>,
    /// Freeze all constrained nuisances in a second phase
    #[serde(default)]
    pub stat_only: bool,
    /// Fit observed data; `false` fits the Asimov dataset
    #[serde(default)]
    pub use_data: bool,
    /// Method-specific options
    #[serde(default)]
    pub options: FitOptions,
}

fn default_pois() -> Vec<String> {
    vec![DEFAULT_POI.to_string()]
}

/// Words that would make output names ambiguous if used as POI names.
const RESERVED_POI_NAMES: &[&str] = &["stat", "exp", "obs", "only"];

/// Output-name markers a POI name must not contain.
const RESERVED_FRAGMENTS: &[&str] = &["_only", "_out_"];

fn usable_poi_name(poi: &str) -> bool {
    !poi.is_empty()
        && poi.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED_POI_NAMES.contains(&poi)
        && !poi.starts_with("stat_")
        && !RESERVED_FRAGMENTS.iter().any(|f| poi.contains(f))
}

impl FitSpec {
    /// Blinded, full-nuisance fit of the default POI.
    pub fn new(method: FitMethod) -> Self {
        Self {
            method,
            pois: default_pois(),
            stat_only: false,
            use_data: false,
            options: FitOptions::default(),
        }
    }

    /// Use a custom POI list.
    pub fn with_pois<I, S>(mut self, pois: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pois = pois.into_iter().map(Into::into).collect();
        self
    }

    /// Fit real data.
    pub fn observed(mut self) -> Self {
        self.use_data = true;
        self
    }

    /// Two-phase stat-only variant.
    pub fn stat_only(mut self) -> Self {
        self.stat_only = true;
        self
    }

    /// Two-phase variant in which only `nuisance` floats.
    pub fn float_only(mut self, nuisance: impl Into<String>) -> Self {
        self.options.float_nuisance = Some(nuisance.into());
        self
    }

    /// Replace the options block.
    pub fn with_options(mut self, options: FitOptions) -> Self {
        self.options = options;
        self
    }

    /// True when the POI list is the tool's default `["r"]`.
    pub fn has_default_poi(&self) -> bool {
        self.pois.len() == 1 && self.pois[0] == DEFAULT_POI
    }

    /// True when a snapshot fit must precede the requested fit.
    pub fn is_two_phase(&self) -> bool {
        self.stat_only || self.options.float_nuisance.is_some()
    }

    /// Check internal consistency. Called by every command builder.
    pub fn validate(&self) -> Result<()> {
        if self.pois.is_empty() {
            return Err(Error::InvalidFitSpec("POI list is empty".into()));
        }
        for (i, poi) in self.pois.iter().enumerate() {
            if !usable_poi_name(poi) {
                return Err(Error::InvalidFitSpec(format!("unusable POI name '{poi}'")));
            }
            if self.pois[..i].contains(poi) {
                return Err(Error::InvalidFitSpec(format!("POI '{poi}' listed twice")));
            }
        }
        if self.stat_only && self.options.float_nuisance.is_some() {
            return Err(Error::InvalidFitSpec(
                "stat_only and float_nuisance are mutually exclusive".into(),
            ));
        }
        if self.is_two_phase() && !self.method.supports_two_phase() {
            return Err(Error::InvalidFitSpec(format!(
                "{} has no frozen-nuisance variant",
                self.method.tool_method()
            )));
        }
        if let Some(name) = &self.options.float_nuisance
            && (name.is_empty()
                || name.contains(|c: char| c.is_whitespace() || c == '.' || c == '/')
                || name.contains("_out_"))
        {
            return Err(Error::InvalidFitSpec(format!("bad nuisance name '{name}'")));
        }
        if self.method == FitMethod::LikelihoodScan && self.options.points == 0 {
            return Err(Error::InvalidFitSpec("likelihood scan needs at least one point".into()));
        }
        for (poi, (lo, hi)) in &self.options.poi_ranges {
            if lo >= hi {
                return Err(Error::InvalidFitSpec(format!("empty range for '{poi}': [{lo}, {hi}]")));
            }
        }
        Ok(())
    }
}
