//! Structured fit-result objects (`fit_s`, `fit_mdf`).
//!
//! The binary files themselves are read outside this workspace; a
//! [`FitResultSource`] hands over the named object as a [`FitObject`].
//! [`JsonFitResults`] reads a JSON export that sits next to the binary file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cf_core::{Error, FitResult, PoiEstimate, Result};
use serde::{Deserialize, Serialize};

/// One floating parameter of a fit-result object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitParameter {
    /// Parameter name
    pub name: String,
    /// Best-fit value
    pub value: f64,
    /// Lower asymmetric error (negative or magnitude)
    pub err_lo: f64,
    /// Upper asymmetric error
    pub err_hi: f64,
}

/// Fit-result object as stored by a fit engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitObject {
    /// Floating parameters, in fit order
    pub parameters: Vec<FitParameter>,
    /// Correlation matrix over `parameters`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<Vec<Vec<f64>>>,
    /// Minimizer status (0 = converged)
    #[serde(default)]
    pub status: i32,
}

impl FitObject {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }
}

/// Access to fit-result objects inside fit output files.
pub trait FitResultSource {
    /// Load `object` from `path`. Absence of either is a
    /// [`Error::MissingFitObject`].
    fn load(&self, path: &Path, object: &str) -> Result<FitObject>;
}

/// JSON exports: `<file>.json` holding `{object_name: FitObject}`.
#[derive(Debug, Clone, Default)]
pub struct JsonFitResults;

impl JsonFitResults {
    /// Export path for a fit output file.
    pub fn export_path(path: &Path) -> PathBuf {
        path.with_extension("json")
    }

    /// Write `objects` as the export of `path`.
    pub fn write(path: &Path, objects: &BTreeMap<String, FitObject>) -> Result<PathBuf> {
        let out = Self::export_path(path);
        std::fs::write(&out, serde_json::to_string_pretty(objects)?)?;
        Ok(out)
    }
}

impl FitResultSource for JsonFitResults {
    fn load(&self, path: &Path, object: &str) -> Result<FitObject> {
        let missing = || Error::MissingFitObject {
            path: path.display().to_string(),
            object: object.to_string(),
        };
        let export = Self::export_path(path);
        if !export.exists() {
            return Err(missing());
        }
        let text = std::fs::read_to_string(&export)?;
        let mut objects: BTreeMap<String, FitObject> = serde_json::from_str(&text)?;
        objects.remove(object).ok_or_else(missing)
    }
}

/// Read `pois` from one fit-result object.
///
/// With `with_correlations`, the POI×POI block of the object's correlation
/// matrix is attached to the result.
pub fn read_fit_object(
    source: &dyn FitResultSource,
    path: &Path,
    object: &str,
    pois: &[String],
    with_correlations: bool,
) -> Result<FitResult> {
    let fit = source.load(path, object)?;
    let path_str = path.display().to_string();
    if fit.status != 0 {
        log::warn!("{path_str}:{object} has minimizer status {}", fit.status);
    }

    let mut indices = Vec::with_capacity(pois.len());
    let mut result = FitResult::new();
    for poi in pois {
        let i = fit.index_of(poi).ok_or_else(|| Error::MissingFitObject {
            path: path_str.clone(),
            object: format!("{object}/{poi}"),
        })?;
        let p = &fit.parameters[i];
        result.insert(poi.clone(), PoiEstimate::new(p.value, p.err_lo, p.err_hi));
        indices.push(i);
    }

    if with_correlations {
        let matrix = fit.correlation.as_ref().ok_or_else(|| Error::MissingFitObject {
            path: path_str.clone(),
            object: format!("{object}/correlation"),
        })?;
        let n = fit.parameters.len();
        if matrix.len() != n || matrix.iter().any(|row| row.len() != n) {
            return Err(Error::Parse(format!(
                "{path_str}:{object}: correlation matrix is not {n}x{n}"
            )));
        }
        let mut corr = Vec::with_capacity(indices.len() * indices.len());
        for &i in &indices {
            for &j in &indices {
                corr.push(matrix[i][j]);
            }
        }
        result.correlation = Some(corr);
    }
    Ok(result)
}
