//! Error types for cardfit

use thiserror::Error;

/// cardfit error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// A process with this name already exists in the collection.
    #[error("duplicate process '{process}' in channel '{channel}'")]
    DuplicateProcess {
        /// Channel name.
        channel: String,
        /// Offending process name.
        process: String,
    },

    /// Two processes share the same id.
    #[error("process id {id} used by both '{first}' and '{second}'")]
    DuplicateProcessId {
        /// Shared id.
        id: i32,
        /// Process that claimed the id first.
        first: String,
        /// Process that collided.
        second: String,
    },

    /// Impact assigned to a process that was never added.
    #[error("unknown process '{0}'")]
    UnknownProcess(String),

    /// `Disabled` impact for a systematic that was never declared.
    #[error("unknown systematic '{0}'")]
    UnknownSystematic(String),

    /// Same systematic used both as a shape and as a flat normalization.
    #[error("systematic '{0}' is used both as shape and lnN")]
    SystematicKindConflict(String),

    /// A (process, systematic) cell was never filled.
    #[error("impact matrix incomplete: process '{process}' has no entry for systematic '{systematic}'")]
    IncompleteImpactMatrix {
        /// Process missing the entry.
        process: String,
        /// Systematic name.
        systematic: String,
    },

    /// Operation requires a finalized collection.
    #[error("model collection '{0}' has not been finalized")]
    NotFinalized(String),

    /// Mutation attempted after finalize().
    #[error("model collection '{0}' is finalized and can no longer be modified")]
    AlreadyFinalized(String),

    /// Histogram referenced by the model is not present in the source.
    #[error("missing histogram '{name}' in {source_name}")]
    MissingHistogram {
        /// Histogram name.
        name: String,
        /// Source the histogram was looked up in.
        source_name: String,
    },

    /// Ratio pair misconfiguration.
    #[error("invalid ratio configuration: {0}")]
    InvalidRatioConfig(String),

    /// A named combination resolved to zero member cards.
    #[error("combination '{0}' matches no datacards")]
    EmptyCombination(String),

    /// Two member cards map to the same channel label.
    #[error("combination '{combination}': channel label '{label}' derived from more than one card")]
    DuplicateChannelLabel {
        /// Combination name.
        combination: String,
        /// Colliding label.
        label: String,
    },

    /// Fit specification rejected at construction.
    #[error("invalid fit specification: {0}")]
    InvalidFitSpec(String),

    /// External command failed or produced no usable output.
    #[error("fit execution failed ({reason}): {command}")]
    FitExecution {
        /// Exact command string that failed.
        command: String,
        /// What went wrong.
        reason: String,
    },

    /// Text parse recognized a different number of POI lines than expected.
    #[error("{path}: expected {expected} POI lines, found {found}")]
    ParseCountMismatch {
        /// File that was parsed.
        path: String,
        /// Expected POI count.
        expected: usize,
        /// Recognized POI lines.
        found: usize,
    },

    /// Structured output lacks the expected object or parameter.
    #[error("{path}: missing object '{object}'")]
    MissingFitObject {
        /// File that was read.
        path: String,
        /// Object or parameter name.
        object: String,
    },

    /// Malformed text input.
    #[error("parse error: {0}")]
    Parse(String),

    /// Neither fit engine produced a readable result.
    #[error("no fit engine produced a result: {0}")]
    EnginesExhausted(String),

    /// Bin weights do not sum to one.
    #[error("bin weights sum to {sum}, expected 1 within {tolerance}")]
    WeightNormalization {
        /// Actual sum.
        sum: f64,
        /// Accepted deviation.
        tolerance: f64,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Configuration errors: always fatal, raised before any external command runs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::DuplicateProcess { .. }
                | Error::DuplicateProcessId { .. }
                | Error::UnknownProcess(_)
                | Error::UnknownSystematic(_)
                | Error::SystematicKindConflict(_)
                | Error::IncompleteImpactMatrix { .. }
                | Error::InvalidRatioConfig(_)
                | Error::EmptyCombination(_)
                | Error::DuplicateChannelLabel { .. }
                | Error::InvalidFitSpec(_)
        )
    }

    /// Parse-family errors, recoverable through the engine fallback.
    pub fn is_parse(&self) -> bool {
        matches!(
            self,
            Error::ParseCountMismatch { .. } | Error::MissingFitObject { .. } | Error::Parse(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
