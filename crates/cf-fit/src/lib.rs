//! # cf-fit
//!
//! Fit specifications and the command pipeline around the external fit tool.
//!
//! - [`spec`]: validated [`FitSpec`] records
//! - [`naming`]: output names and their inverse parser
//! - [`physics`]: multi-POI physics-model mapping
//! - [`builder`]: FitSpec → ordered commands
//! - [`orchestrator`]: staged local execution with output checks
//! - [`batch`]: job script and descriptor emission

#![warn(clippy::all)]

pub mod batch;
pub mod builder;
pub mod naming;
pub mod orchestrator;
pub mod physics;
pub mod spec;

#[cfg(test)]
mod tests;

pub use batch::{BatchJob, BatchResources, BatchTarget, Scheduler};
pub use builder::{CombineCommandBuilder, CommandPlan, FitTarget, Stage};
pub use naming::OutputName;
pub use orchestrator::{FitOrchestrator, FitRun, FitStage};
pub use physics::{PoiMapEntry, PoiMapping};
pub use spec::{DEFAULT_POI, FitMethod, FitOptions, FitSpec};
