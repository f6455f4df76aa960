//! # cf-core
//!
//! Shared types for cardfit: the error taxonomy, histogram and fit-result
//! records, typed external commands, and the histogram I/O seams.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod error;
pub mod histio;
pub mod traits;
pub mod types;

pub use command::{CommandRunner, CommandSpec, LocalShell};
pub use error::{Error, Result};
pub use histio::{InMemoryHistograms, JsonHistogramFile, JsonHistogramSink};
pub use traits::{HistogramSink, HistogramSource};
pub use types::{FitResult, Histogram, PoiEstimate};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
