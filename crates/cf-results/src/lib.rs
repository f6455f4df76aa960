//! # cf-results
//!
//! Reading fit outputs back and combining them.
//!
//! - [`text`]: POI lines, significance and GoF statistics from fit logs
//! - [`structured`]: fit-result objects, including correlations
//! - [`engines`]: engine fallback, cross-checks, tolerant batch reads
//! - [`aggregate`]: per-bin combination and systematic covariance
//! - [`summary`]: the JSON summary artifact

#![warn(clippy::all)]

pub mod aggregate;
pub mod engines;
pub mod structured;
pub mod summary;
pub mod text;

pub use aggregate::{CovarianceCheck, SignalStrengthAggregator, covariance, weights_from_reference};
pub use engines::{
    BatchResults, Engine, EngineComparison, compare_engines, cross_check, read_batch,
    read_signal_strength,
};
pub use structured::{FitObject, FitParameter, FitResultSource, JsonFitResults, read_fit_object};
pub use summary::{SignalStrengthSummary, VariableSummary};
pub use text::{PoiSelection, parse_fit_log, parse_gof_statistic, parse_significance, read_fit_log};
