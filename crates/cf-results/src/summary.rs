//! JSON summary artifact.
//!
//! ```json
//! {"<variable>": {"pois": {"<poi>": [central, stat_down, stat_up, tot_down, tot_up]},
//!                 "statcorr": {"<poi>": {"<poi>": rho}},
//!                 "totcorr": {...}}}
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use cf_core::{Error, FitResult, PoiEstimate, Result};
use serde::{Deserialize, Serialize};

use crate::aggregate::{SignalStrengthAggregator, covariance};

/// Correlations keyed by POI pair.
pub type CorrelationMap = BTreeMap<String, BTreeMap<String, f64>>;

fn is_false(b: &bool) -> bool {
    !*b
}

/// Summary of one measured variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VariableSummary {
    /// `[central, stat_down, stat_up, tot_down, tot_up]` per POI
    pub pois: BTreeMap<String, [f64; 5]>,
    /// Statistical-only correlations
    #[serde(default)]
    pub statcorr: CorrelationMap,
    /// Total correlations
    #[serde(default)]
    pub totcorr: CorrelationMap,
    /// Set when a numerical sanity check failed
    #[serde(default, skip_serializing_if = "is_false")]
    pub provisional: bool,
}

fn row(total: &PoiEstimate, stat: &PoiEstimate) -> [f64; 5] {
    [total.central, stat.err_down, stat.err_up, total.err_down, total.err_up]
}

fn correlation_map(result: &FitResult) -> CorrelationMap {
    let mut map = CorrelationMap::new();
    for (a, _) in result.iter() {
        for (b, _) in result.iter() {
            if let Some(rho) = result.correlation(a, b) {
                map.entry(a.to_string()).or_default().insert(b.to_string(), rho);
            }
        }
    }
    map
}

impl VariableSummary {
    /// Summary of a multi-POI fit from its stat-only and total results.
    ///
    /// Central values come from the total fit. When both results carry
    /// correlations the derived systematic covariance is checked and a
    /// failure marks the summary provisional.
    pub fn from_fits(
        aggregator: &SignalStrengthAggregator,
        statistical: &FitResult,
        total: &FitResult,
    ) -> Result<Self> {
        let mut out = VariableSummary::default();
        for (poi, tot) in total.iter() {
            let stat = statistical.get(poi).ok_or_else(|| {
                Error::Validation(format!("'{poi}' missing from the stat-only result"))
            })?;
            out.pois.insert(poi.to_string(), row(tot, stat));
        }
        out.statcorr = correlation_map(statistical);
        out.totcorr = correlation_map(total);

        if total.correlation.is_some() && statistical.correlation.is_some() {
            if statistical.poi_names != total.poi_names {
                return Err(Error::Validation(
                    "stat-only and total results list POIs in different order".into(),
                ));
            }
            let check =
                aggregator.systematic_covariance(&covariance(total)?, &covariance(statistical)?)?;
            out.provisional = check.provisional;
        }
        Ok(out)
    }

    /// Summary of one POI combined across bins.
    pub fn from_bins(
        aggregator: &SignalStrengthAggregator,
        poi: &str,
        statistical: &[FitResult],
        total: &[FitResult],
        weights: &[f64],
    ) -> Result<Self> {
        let stat = aggregator.combine_fits(statistical, poi, weights)?;
        let tot = aggregator.combine_fits(total, poi, weights)?;
        let unit = BTreeMap::from([(poi.to_string(), BTreeMap::from([(poi.to_string(), 1.0)]))]);
        Ok(VariableSummary {
            pois: BTreeMap::from([(poi.to_string(), row(&tot, &stat))]),
            statcorr: unit.clone(),
            totcorr: unit,
            provisional: false,
        })
    }
}

/// All variables of one summary artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SignalStrengthSummary {
    variables: BTreeMap<String, VariableSummary>,
}

impl SignalStrengthSummary {
    /// Empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a variable.
    pub fn insert(&mut self, variable: impl Into<String>, summary: VariableSummary) {
        self.variables.insert(variable.into(), summary);
    }

    /// Summary of one variable.
    pub fn get(&self, variable: &str) -> Option<&VariableSummary> {
        self.variables.get(variable)
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// True when no variable was added.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// True when any variable is provisional.
    pub fn is_provisional(&self) -> bool {
        self.variables.values().any(|v| v.provisional)
    }

    /// Pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the artifact to `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()? + "\n")?;
        Ok(())
    }

    /// Read an artifact back.
    pub fn read(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}
