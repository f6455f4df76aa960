//! Reading signal strengths from either fit engine.
//!
//! FitDiagnostics (`fit_s`) and MultiDimFit (`fit_mdf`) each leave a
//! structured result. Depending on configuration one of them may be missing
//! or unreadable, so [`Engine::Any`] tries FitDiagnostics first and falls
//! back to MultiDimFit.

use std::collections::BTreeMap;
use std::path::Path;

use cf_core::{Error, FitResult, Result};
use cf_fit::{FitMethod, OutputName};
use serde::{Deserialize, Serialize};

use crate::structured::{FitResultSource, read_fit_object};

/// Engine preference when reading a signal strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// FitDiagnostics, then MultiDimFit
    #[default]
    Any,
    /// FitDiagnostics only
    FitDiagnostics,
    /// MultiDimFit only
    MultiDimFit,
}

impl Engine {
    fn methods(self) -> &'static [FitMethod] {
        match self {
            Engine::Any => &[FitMethod::FitDiagnostics, FitMethod::MultiDimFit],
            Engine::FitDiagnostics => &[FitMethod::FitDiagnostics],
            Engine::MultiDimFit => &[FitMethod::MultiDimFit],
        }
    }
}

/// Read `pois` for the fit identified by `name` from outputs in `dir`.
///
/// The method stored in `name` is ignored; the engines listed by `engine`
/// are tried in order. When none succeeds the error is
/// [`Error::EnginesExhausted`], carrying every engine's failure.
pub fn read_signal_strength(
    source: &dyn FitResultSource,
    dir: &Path,
    name: &OutputName,
    pois: &[String],
    engine: Engine,
    with_correlations: bool,
) -> Result<FitResult> {
    let mut failures = Vec::new();
    for &method in engine.methods() {
        let engine_name = name.with_method(method);
        let Some((file, object)) = engine_name.fit_result_file() else {
            continue;
        };
        let path = dir.join(&file);
        match read_fit_object(source, &path, object, pois, with_correlations) {
            Ok(result) => {
                if !failures.is_empty() {
                    log::warn!("{}: fell back to {object} after: {}", name.card, failures.join("; "));
                }
                return Ok(result);
            }
            Err(e) => failures.push(format!("{object}: {e}")),
        }
    }
    Err(Error::EnginesExhausted(format!("{}: {}", name.stem(), failures.join("; "))))
}

/// Per-POI comparison of the two engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineDelta {
    /// POI
    pub poi: String,
    /// FitDiagnostics central value
    pub fit_diagnostics: f64,
    /// MultiDimFit central value
    pub multi_dim_fit: f64,
    /// Absolute difference
    pub delta: f64,
}

/// Outcome of an engine cross-check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineComparison {
    /// Accepted absolute difference
    pub tolerance: f64,
    /// POIs present in both results
    pub deltas: Vec<EngineDelta>,
    /// POIs present in only one result
    pub missing: Vec<String>,
}

impl EngineComparison {
    /// POIs whose central values differ by more than the tolerance.
    pub fn disagreements(&self) -> impl Iterator<Item = &EngineDelta> {
        self.deltas.iter().filter(|d| d.delta > self.tolerance)
    }

    /// True when every POI is present in both and within tolerance.
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.disagreements().next().is_none()
    }
}

/// Compare central values of the two engines' results.
pub fn compare_engines(
    fit_diagnostics: &FitResult,
    multi_dim_fit: &FitResult,
    tolerance: f64,
) -> EngineComparison {
    let mut deltas = Vec::new();
    let mut missing = Vec::new();
    for (poi, a) in fit_diagnostics.iter() {
        match multi_dim_fit.get(poi) {
            Some(b) => deltas.push(EngineDelta {
                poi: poi.to_string(),
                fit_diagnostics: a.central,
                multi_dim_fit: b.central,
                delta: (a.central - b.central).abs(),
            }),
            None => missing.push(poi.to_string()),
        }
    }
    for (poi, _) in multi_dim_fit.iter() {
        if fit_diagnostics.get(poi).is_none() {
            missing.push(poi.to_string());
        }
    }

    let cmp = EngineComparison { tolerance, deltas, missing };
    for d in cmp.disagreements() {
        log::warn!(
            "engines disagree on {}: FitDiagnostics {} vs MultiDimFit {} (|Δ| = {:.4} > {})",
            d.poi,
            d.fit_diagnostics,
            d.multi_dim_fit,
            d.delta,
            tolerance
        );
    }
    for poi in &cmp.missing {
        log::warn!("{poi} is only present in one engine's result");
    }
    cmp
}

/// Read both engines' results for `name` and compare them.
pub fn cross_check(
    source: &dyn FitResultSource,
    dir: &Path,
    name: &OutputName,
    pois: &[String],
    tolerance: f64,
) -> Result<EngineComparison> {
    let fd = read_signal_strength(source, dir, name, pois, Engine::FitDiagnostics, false)?;
    let mdf = read_signal_strength(source, dir, name, pois, Engine::MultiDimFit, false)?;
    Ok(compare_engines(&fd, &mdf, tolerance))
}

/// Results of reading many fits, keyed by output stem.
#[derive(Debug, Clone, Default)]
pub struct BatchResults {
    /// Successfully read results
    pub results: BTreeMap<String, FitResult>,
    /// `(stem, error)` for every entry that could not be read
    pub failures: Vec<(String, String)>,
}

/// Read every fit in `names` with `read`, skipping failures.
///
/// A failing entry is logged and recorded; it never appears in `results`.
pub fn read_batch<F>(names: &[OutputName], mut read: F) -> BatchResults
where
    F: FnMut(&OutputName) -> Result<FitResult>,
{
    let mut out = BatchResults::default();
    for name in names {
        let stem = name.stem();
        match read(name) {
            Ok(result) => {
                out.results.insert(stem, result);
            }
            Err(e) => {
                log::warn!("skipping {stem}: {e}");
                out.failures.push((stem, e.to_string()));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structured::{FitObject, FitParameter, JsonFitResults};
    use cf_core::PoiEstimate;
    use cf_fit::FitSpec;

    fn object(value: f64) -> FitObject {
        FitObject {
            parameters: vec![FitParameter { name: "r".into(), value, err_lo: -0.2, err_hi: 0.25 }],
            correlation: None,
            status: 0,
        }
    }

    fn write(dir: &Path, name: &OutputName, method: FitMethod, value: f64) {
        let (file, object_name) = name.with_method(method).fit_result_file().unwrap();
        JsonFitResults::write(&dir.join(file), &BTreeMap::from([(object_name.to_string(), object(value))]))
            .unwrap();
    }

    fn card_name(card: &str) -> OutputName {
        OutputName::new(Path::new(card), &FitSpec::new(FitMethod::FitDiagnostics)).unwrap()
    }

    #[test]
    fn test_fallback_to_multidimfit() {
        let dir = tempfile::tempdir().unwrap();
        let name = card_name("card_SR.txt");
        let pois = vec!["r".to_string()];
        write(dir.path(), &name, FitMethod::MultiDimFit, 1.1);

        let r = read_signal_strength(&JsonFitResults, dir.path(), &name, &pois, Engine::Any, false).unwrap();
        assert_eq!(r.get("r").unwrap().central, 1.1);

        let only_fd = read_signal_strength(
            &JsonFitResults,
            dir.path(),
            &name,
            &pois,
            Engine::FitDiagnostics,
            false,
        );
        assert!(matches!(only_fd, Err(Error::EnginesExhausted(_))));
    }

    #[test]
    fn test_both_engines_missing() {
        let dir = tempfile::tempdir().unwrap();
        let name = card_name("card_SR.txt");
        let err = read_signal_strength(&JsonFitResults, dir.path(), &name, &["r".into()], Engine::Any, false)
            .unwrap_err();
        let Error::EnginesExhausted(msg) = err else { panic!("wrong error") };
        assert!(msg.contains("fit_s") && msg.contains("fit_mdf"), "{msg}");
    }

    #[test]
    fn test_cross_check() {
        let dir = tempfile::tempdir().unwrap();
        let name = card_name("card_SR.txt");
        write(dir.path(), &name, FitMethod::FitDiagnostics, 1.00);
        write(dir.path(), &name, FitMethod::MultiDimFit, 1.003);
        let pois = vec!["r".to_string()];

        let cmp = cross_check(&JsonFitResults, dir.path(), &name, &pois, 0.01).unwrap();
        assert!(cmp.is_consistent());
        let cmp = cross_check(&JsonFitResults, dir.path(), &name, &pois, 0.001).unwrap();
        assert_eq!(cmp.disagreements().count(), 1);
    }

    #[test]
    fn test_compare_reports_missing_pois() {
        let mut a = FitResult::new();
        a.insert("r_a", PoiEstimate::new(1.0, 0.1, 0.1));
        a.insert("r_b", PoiEstimate::new(1.0, 0.1, 0.1));
        let mut b = FitResult::new();
        b.insert("r_a", PoiEstimate::new(1.0, 0.1, 0.1));
        let cmp = compare_engines(&a, &b, 0.01);
        assert_eq!(cmp.missing, vec!["r_b"]);
        assert!(!cmp.is_consistent());
    }

    #[test]
    fn test_batch_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = card_name("card_a.txt");
        let bad = card_name("card_b.txt");
        write(dir.path(), &good, FitMethod::FitDiagnostics, 0.9);
        let pois = vec!["r".to_string()];

        let batch = read_batch(&[good.clone(), bad.clone()], |n| {
            read_signal_strength(&JsonFitResults, dir.path(), n, &pois, Engine::Any, false)
        });
        assert_eq!(batch.results.len(), 1);
        assert!(batch.results.contains_key(&good.stem()));
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].0, bad.stem());
    }
}
