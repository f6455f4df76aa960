//! Combination of per-bin signal strengths and covariance bookkeeping.

use nalgebra::DMatrix;

use cf_core::{Error, FitResult, Histogram, PoiEstimate, Result};

/// Default accepted deviation of the weight sum from one.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Default eigenvalue tolerance for the positive semi-definite check.
pub const PSD_TOLERANCE: f64 = 1e-9;

/// Bin weights from a reference distribution's bin fractions.
pub fn weights_from_reference(reference: &Histogram) -> Result<Vec<f64>> {
    reference.bin_fractions().ok_or_else(|| {
        Error::Validation(format!("reference histogram '{}' has zero integral", reference.name))
    })
}

/// Systematic covariance with its positive semi-definite check.
#[derive(Debug, Clone)]
pub struct CovarianceCheck {
    /// `total - statistical`, component-wise
    pub matrix: DMatrix<f64>,
    /// Smallest eigenvalue of `matrix`
    pub min_eigenvalue: f64,
    /// True when `matrix` failed the check; downstream numbers are best effort
    pub provisional: bool,
}

/// Per-bin combination and multi-POI covariance derivation.
#[derive(Debug, Clone, Copy)]
pub struct SignalStrengthAggregator {
    weight_tolerance: f64,
    psd_tolerance: f64,
}

impl Default for SignalStrengthAggregator {
    fn default() -> Self {
        Self { weight_tolerance: WEIGHT_TOLERANCE, psd_tolerance: PSD_TOLERANCE }
    }
}

impl SignalStrengthAggregator {
    /// Aggregator with explicit tolerances.
    pub fn new(weight_tolerance: f64, psd_tolerance: f64) -> Self {
        Self { weight_tolerance, psd_tolerance }
    }

    /// Weighted combination of per-bin estimates.
    ///
    /// Mean is `Σ w_i c_i`. Each error side is `sqrt(Σ w_i² (e_i / c_i)²) · mean`.
    /// This is an approximation: bins are treated as uncorrelated because the
    /// per-bin fits do not expose the bin-to-bin covariance.
    ///
    /// Weights must already sum to one; they are never renormalized.
    pub fn combine_bins(&self, bins: &[PoiEstimate], weights: &[f64]) -> Result<PoiEstimate> {
        if bins.is_empty() {
            return Err(Error::Validation("no bins to combine".into()));
        }
        if bins.len() != weights.len() {
            return Err(Error::Validation(format!(
                "{} bins but {} weights",
                bins.len(),
                weights.len()
            )));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > self.weight_tolerance {
            return Err(Error::WeightNormalization { sum, tolerance: self.weight_tolerance });
        }

        let mut mean = 0.0;
        let mut rel_down = 0.0;
        let mut rel_up = 0.0;
        for (i, (b, w)) in bins.iter().zip(weights).enumerate() {
            if b.central == 0.0 {
                return Err(Error::Validation(format!(
                    "bin {i} has zero central value; relative error undefined"
                )));
            }
            mean += w * b.central;
            rel_down += (w * b.err_down / b.central).powi(2);
            rel_up += (w * b.err_up / b.central).powi(2);
        }
        Ok(PoiEstimate::new(mean, rel_down.sqrt() * mean, rel_up.sqrt() * mean))
    }

    /// [`combine_bins`](Self::combine_bins) on one POI of per-bin fit results.
    pub fn combine_fits(&self, fits: &[FitResult], poi: &str, weights: &[f64]) -> Result<PoiEstimate> {
        let bins = fits
            .iter()
            .enumerate()
            .map(|(i, f)| {
                f.get(poi)
                    .copied()
                    .ok_or_else(|| Error::Validation(format!("bin {i} has no result for '{poi}'")))
            })
            .collect::<Result<Vec<_>>>()?;
        self.combine_bins(&bins, weights)
    }

    /// `total - statistical`, checked for positive semi-definiteness.
    ///
    /// A failing check is logged and marks the result provisional.
    pub fn systematic_covariance(
        &self,
        total: &DMatrix<f64>,
        statistical: &DMatrix<f64>,
    ) -> Result<CovarianceCheck> {
        if total.shape() != statistical.shape() || !total.is_square() {
            return Err(Error::Validation(format!(
                "covariance shapes differ or are not square: {:?} vs {:?}",
                total.shape(),
                statistical.shape()
            )));
        }
        let matrix = total - statistical;
        let eigen = matrix.clone().symmetric_eigen();
        let min_eigenvalue = eigen.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
        let scale = eigen.eigenvalues.iter().fold(1.0_f64, |m, v| m.max(v.abs()));
        let provisional = min_eigenvalue < -self.psd_tolerance * scale;
        if provisional {
            log::warn!(
                "systematic covariance is not positive semi-definite (min eigenvalue {min_eigenvalue:.3e}); \
                 treat the summary as provisional"
            );
        }
        Ok(CovarianceCheck { matrix, min_eigenvalue, provisional })
    }
}

/// Covariance of a fit result from its correlations and symmetrized errors.
pub fn covariance(result: &FitResult) -> Result<DMatrix<f64>> {
    let corr = result.correlation.as_ref().ok_or_else(|| {
        Error::Validation("fit result has no correlations; read it through the structured path".into())
    })?;
    let n = result.len();
    if corr.len() != n * n {
        return Err(Error::Validation(format!(
            "correlation length mismatch: got={} expected={}",
            corr.len(),
            n * n
        )));
    }
    let sigma: Vec<f64> = result.estimates.iter().map(PoiEstimate::symmetric_error).collect();
    Ok(DMatrix::from_fn(n, n, |i, j| corr[i * n + j] * sigma[i] * sigma[j]))
}
