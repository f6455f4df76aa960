//! # cf-datacard
//!
//! Statistical-model bookkeeping and the datacard text format.
//!
//! - [`model`]: processes, systematic impacts, per-channel collections
//! - [`writer`]: aligned datacard serialization
//! - [`reader`]: line-oriented reader for the same format
//! - [`combination`]: grouping elementary cards into combined cards

#![warn(clippy::all)]

pub mod combination;
pub mod model;
pub mod reader;
pub mod writer;


pub use combination::{
    CardRegistry, CombinationPlan, CombinationRule, CombinedCard, GroupingRule, channel_label,
    materialize, plan, plan_directory,
};
pub use model::{Impact, ModelCollection, ProcessModel, RateParam, RatioPair, SystematicKind};
pub use reader::ParsedDatacard;
pub use writer::{DatacardWriter, WriterOptions};
