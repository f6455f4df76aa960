//! Process / systematic bookkeeping for one datacard channel.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cf_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// How one systematic acts on one process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "magnitude", rename_all = "snake_case")]
pub enum Impact {
    /// Up/down template pair `<hist>_<systematic>Up/Down`.
    Shape,
    /// Multiplicative log-normal factor (1.1 = 10%).
    FlatNorm(f64),
    /// Does not apply to this process.
    Disabled,
}

impl Impact {
    /// Cell text in the systematics table.
    pub fn cell(&self) -> String {
        match self {
            Impact::Shape => "1".to_string(),
            Impact::FlatNorm(m) => format_number(*m),
            Impact::Disabled => "-".to_string(),
        }
    }

    /// Row kind implied by this impact. `None` for `Disabled`.
    pub fn kind(&self) -> Option<SystematicKind> {
        match self {
            Impact::Shape => Some(SystematicKind::Shape),
            Impact::FlatNorm(_) => Some(SystematicKind::LnN),
            Impact::Disabled => None,
        }
    }
}

/// Row type of a systematic in the datacard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystematicKind {
    /// Template-based
    Shape,
    /// Log-normal flat rate
    #[serde(rename = "lnN")]
    LnN,
}

impl SystematicKind {
    /// Datacard tag
    pub fn tag(&self) -> &'static str {
        match self {
            SystematicKind::Shape => "shape",
            SystematicKind::LnN => "lnN",
        }
    }
}

/// One physics process in a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessModel {
    /// Process name (unique within its collection)
    pub name: String,
    /// Datacard process id: `<= 0` signal, `> 0` background
    pub id: i32,
    /// Expected yield of the nominal histogram
    pub nominal_yield: f64,
    /// Name of the nominal histogram in the channel's histogram file
    pub histogram: String,
    /// Impact per systematic name
    #[serde(default)]
    pub systematics: BTreeMap<String, Impact>,
}

impl ProcessModel {
    /// New process without systematic entries.
    pub fn new(
        name: impl Into<String>,
        id: i32,
        nominal_yield: f64,
        histogram: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            id,
            nominal_yield,
            histogram: histogram.into(),
            systematics: BTreeMap::new(),
        }
    }

    /// Impact of `systematic` on this process, if set.
    pub fn impact(&self, systematic: &str) -> Option<&Impact> {
        self.systematics.get(systematic)
    }

    /// Histogram name of a shape variation (`direction` is `Up` or `Down`).
    pub fn variation_histogram(&self, systematic: &str, direction: &str) -> String {
        format!("{}_{}{}", self.histogram, systematic, direction)
    }
}

/// Free-floating normalization for one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateParam {
    /// Scaled process
    pub process: String,
    /// Initial value
    pub prior: f64,
    /// Allowed range
    pub range: (f64, f64),
}

impl RateParam {
    /// Rate parameter with the default prior 1 and range [0, 3].
    pub fn new(process: impl Into<String>) -> Self {
        Self { process: process.into(), prior: 1.0, range: (0.0, 3.0) }
    }

    /// Parameter name written in the datacard.
    pub fn parameter_name(&self) -> String {
        format!("{}_norm", self.process)
    }
}

/// Two signal processes scaled by one shared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioPair {
    /// Numerator process
    pub numerator: String,
    /// Denominator process
    pub denominator: String,
}

impl RatioPair {
    /// Shared parameter name.
    pub fn parameter_name(&self) -> String {
        format!("ratio_{}_{}", self.numerator, self.denominator)
    }
}

/// All processes and systematics of one channel.
///
/// Built incrementally, then frozen by [`ModelCollection::finalize`]; every
/// mutator fails with [`Error::AlreadyFinalized`] afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCollection {
    channel: String,
    histogram_file: PathBuf,
    data_histogram: String,
    data_yield: Option<f64>,
    processes: Vec<ProcessModel>,
    shape_systematics: Vec<String>,
    norm_systematics: Vec<String>,
    rate_params: Vec<RateParam>,
    ratio_pair: Option<RatioPair>,
    #[serde(skip)]
    finalized: bool,
}

/// Id convention: non-positive ids are signal.
fn is_signal_id(id: i32) -> bool {
    id <= 0
}

impl ModelCollection {
    /// Empty collection for `channel`, with histograms read from `histogram_file`.
    pub fn new(
        channel: impl Into<String>,
        histogram_file: impl Into<PathBuf>,
        data_histogram: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            histogram_file: histogram_file.into(),
            data_histogram: data_histogram.into(),
            data_yield: None,
            processes: Vec::new(),
            shape_systematics: Vec::new(),
            norm_systematics: Vec::new(),
            rate_params: Vec::new(),
            ratio_pair: None,
            finalized: false,
        }
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.finalized {
            return Err(Error::AlreadyFinalized(self.channel.clone()));
        }
        Ok(())
    }

    fn process_mut(&mut self, name: &str) -> Result<&mut ProcessModel> {
        self.processes
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::UnknownProcess(name.to_string()))
    }

    /// Append a process. Order of insertion is the column order of the datacard.
    pub fn add_process(&mut self, process: ProcessModel) -> Result<()> {
        self.ensure_mutable()?;
        if self.process(&process.name).is_some() {
            return Err(Error::DuplicateProcess {
                channel: self.channel.clone(),
                process: process.name,
            });
        }
        if let Some(other) = self.processes.iter().find(|p| p.id == process.id) {
            return Err(Error::DuplicateProcessId {
                id: process.id,
                first: other.name.clone(),
                second: process.name,
            });
        }
        for (syst, impact) in &process.systematics {
            self.register_systematic(syst, impact.kind())?;
        }
        self.processes.push(process);
        Ok(())
    }

    /// Declare a systematic up front so `Disabled` entries can reference it.
    pub fn declare_systematic(&mut self, name: &str, kind: SystematicKind) -> Result<()> {
        self.ensure_mutable()?;
        self.register_systematic(name, Some(kind))
    }

    fn register_systematic(&mut self, name: &str, kind: Option<SystematicKind>) -> Result<()> {
        let in_shape = self.shape_systematics.iter().any(|s| s == name);
        let in_norm = self.norm_systematics.iter().any(|s| s == name);
        match kind {
            None if !in_shape && !in_norm => Err(Error::UnknownSystematic(name.to_string())),
            None => Ok(()),
            Some(SystematicKind::Shape) if in_norm => {
                Err(Error::SystematicKindConflict(name.to_string()))
            }
            Some(SystematicKind::LnN) if in_shape => {
                Err(Error::SystematicKindConflict(name.to_string()))
            }
            Some(SystematicKind::Shape) => {
                if !in_shape {
                    self.shape_systematics.push(name.to_string());
                }
                Ok(())
            }
            Some(SystematicKind::LnN) => {
                if !in_norm {
                    self.norm_systematics.push(name.to_string());
                }
                Ok(())
            }
        }
    }

    /// Set the impact of `systematic` on `process`.
    pub fn add_systematic_impact(
        &mut self,
        process: &str,
        systematic: &str,
        impact: Impact,
    ) -> Result<()> {
        self.ensure_mutable()?;
        if self.process(process).is_none() {
            return Err(Error::UnknownProcess(process.to_string()));
        }
        self.register_systematic(systematic, impact.kind())?;
        self.process_mut(process)?.systematics.insert(systematic.to_string(), impact);
        Ok(())
    }

    /// Declare `systematic` and fill its whole row by asking `impact_for` about
    /// every process currently in the collection.
    pub fn apply_systematic<F>(
        &mut self,
        systematic: &str,
        kind: SystematicKind,
        mut impact_for: F,
    ) -> Result<()>
    where
        F: FnMut(&ProcessModel) -> Impact,
    {
        self.declare_systematic(systematic, kind)?;
        let impacts: Vec<(String, Impact)> =
            self.processes.iter().map(|p| (p.name.clone(), impact_for(p))).collect();
        for (process, impact) in impacts {
            if impact.kind().is_some_and(|k| k != kind) {
                return Err(Error::SystematicKindConflict(systematic.to_string()));
            }
            self.add_systematic_impact(&process, systematic, impact)?;
        }
        Ok(())
    }

    /// Observed yield; `None` is written as `-1` (derived at fit time).
    pub fn set_data_yield(&mut self, data_yield: Option<f64>) -> Result<()> {
        self.ensure_mutable()?;
        self.data_yield = data_yield;
        Ok(())
    }

    /// Let `process` float freely with prior 1 in [0, 3].
    pub fn add_rate_param(&mut self, process: &str) -> Result<()> {
        self.add_rate_param_with(RateParam::new(process))
    }

    /// Add a rate parameter with explicit prior/range.
    pub fn add_rate_param_with(&mut self, param: RateParam) -> Result<()> {
        self.ensure_mutable()?;
        if self.process(&param.process).is_none() {
            return Err(Error::UnknownProcess(param.process));
        }
        if self.rate_params.iter().any(|r| r.process == param.process) {
            return Err(Error::Validation(format!(
                "rate parameter for '{}' declared twice",
                param.process
            )));
        }
        self.rate_params.push(param);
        Ok(())
    }

    /// Tie two signal processes to one shared free parameter.
    ///
    /// Both members must be signal processes of this channel by the time
    /// [`finalize`](Self::finalize) runs.
    pub fn set_ratio_pair(&mut self, numerator: &str, denominator: &str) -> Result<()> {
        self.ensure_mutable()?;
        if numerator == denominator {
            return Err(Error::InvalidRatioConfig(format!(
                "numerator and denominator are both '{numerator}'"
            )));
        }
        self.ratio_pair = Some(RatioPair {
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        });
        Ok(())
    }

    /// Validate the impact matrix and freeze the collection. Idempotent.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        if self.processes.is_empty() {
            return Err(Error::Validation(format!("channel '{}' has no processes", self.channel)));
        }
        for process in &self.processes {
            for systematic in self.shape_systematics.iter().chain(&self.norm_systematics) {
                if process.impact(systematic).is_none() {
                    return Err(Error::IncompleteImpactMatrix {
                        process: process.name.clone(),
                        systematic: systematic.clone(),
                    });
                }
            }
        }
        self.check_ratio_pair()?;
        self.finalized = true;
        log::debug!(
            "finalized channel '{}': {} processes, {} shape + {} lnN systematics",
            self.channel,
            self.processes.len(),
            self.shape_systematics.len(),
            self.norm_systematics.len()
        );
        Ok(())
    }

    /// Both ratio members, if any, are signal processes of this channel.
    pub fn check_ratio_pair(&self) -> Result<()> {
        let Some(pair) = &self.ratio_pair else { return Ok(()) };
        for member in [&pair.numerator, &pair.denominator] {
            if self.process(member).is_none() {
                return Err(Error::InvalidRatioConfig(format!(
                    "ratio member '{member}' is not a process of channel '{}'",
                    self.channel
                )));
            }
            if !self.is_signal(member) {
                return Err(Error::InvalidRatioConfig(format!(
                    "ratio member '{member}' is not a signal process"
                )));
            }
        }
        Ok(())
    }

    /// Whether [`finalize`](Self::finalize) succeeded.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Signal processes (`id <= 0`), in column order.
    ///
    /// The only place the id convention is interpreted.
    pub fn classify_signal(&self) -> Vec<&ProcessModel> {
        self.processes.iter().filter(|p| is_signal_id(p.id)).collect()
    }

    /// Whether the named process is classified as signal.
    pub fn is_signal(&self, process: &str) -> bool {
        self.classify_signal().iter().any(|p| p.name == process)
    }

    /// Channel name
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Input histogram file
    pub fn histogram_file(&self) -> &Path {
        &self.histogram_file
    }

    /// Observed-data histogram name
    pub fn data_histogram(&self) -> &str {
        &self.data_histogram
    }

    /// Observed yield, if known
    pub fn data_yield(&self) -> Option<f64> {
        self.data_yield
    }

    /// Processes in column order
    pub fn processes(&self) -> &[ProcessModel] {
        &self.processes
    }

    /// Process by name
    pub fn process(&self, name: &str) -> Option<&ProcessModel> {
        self.processes.iter().find(|p| p.name == name)
    }

    /// Shape systematics in declaration order
    pub fn shape_systematics(&self) -> &[String] {
        &self.shape_systematics
    }

    /// lnN systematics in declaration order
    pub fn norm_systematics(&self) -> &[String] {
        &self.norm_systematics
    }

    /// Rate parameters
    pub fn rate_params(&self) -> &[RateParam] {
        &self.rate_params
    }

    /// Ratio pair, if any
    pub fn ratio_pair(&self) -> Option<&RatioPair> {
        self.ratio_pair.as_ref()
    }
}

/// Shortest round-tripping decimal form (`10`, `1.025`, `-1`).
pub fn format_number(v: f64) -> String {
    format!("{v}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_process() -> ModelCollection {
        let mut c = ModelCollection::new("SR_2016", "hists.root", "data");
        c.add_process(ProcessModel::new("sig", 0, 10.0, "sig")).unwrap();
        c.add_process(ProcessModel::new("bkgA", 1, 50.0, "bkgA")).unwrap();
        c.add_process(ProcessModel::new("bkgB", 2, 40.0, "bkgB")).unwrap();
        c
    }

    #[test]
    fn test_duplicate_process_rejected() {
        let mut c = three_process();
        let err = c.add_process(ProcessModel::new("bkgA", 7, 1.0, "x")).unwrap_err();
        assert!(matches!(err, Error::DuplicateProcess { .. }));
        let err = c.add_process(ProcessModel::new("bkgC", 2, 1.0, "x")).unwrap_err();
        assert!(matches!(err, Error::DuplicateProcessId { id: 2, .. }));
    }

    #[test]
    fn test_impact_for_unknown_process() {
        let mut c = three_process();
        let err = c.add_systematic_impact("ttZ", "lumi", Impact::FlatNorm(1.025)).unwrap_err();
        assert!(matches!(err, Error::UnknownProcess(p) if p == "ttZ"));
    }

    #[test]
    fn test_incomplete_matrix() {
        let mut c = three_process();
        c.add_systematic_impact("sig", "lumi", Impact::FlatNorm(1.025)).unwrap();
        c.add_systematic_impact("bkgA", "lumi", Impact::FlatNorm(1.025)).unwrap();
        match c.finalize().unwrap_err() {
            Error::IncompleteImpactMatrix { process, systematic } => {
                assert_eq!(process, "bkgB");
                assert_eq!(systematic, "lumi");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!c.is_finalized());

        c.add_systematic_impact("bkgB", "lumi", Impact::Disabled).unwrap();
        c.finalize().unwrap();
        assert!(c.is_finalized());
    }

    #[test]
    fn test_finalize_twice_is_noop() {
        let mut c = three_process();
        c.finalize().unwrap();
        let snapshot = c.clone();
        c.finalize().unwrap();
        assert_eq!(c, snapshot);
        assert!(matches!(
            c.add_process(ProcessModel::new("late", 9, 1.0, "late")),
            Err(Error::AlreadyFinalized(_))
        ));
    }

    #[test]
    fn test_kind_conflict() {
        let mut c = three_process();
        c.add_systematic_impact("sig", "jes", Impact::Shape).unwrap();
        let err = c.add_systematic_impact("bkgA", "jes", Impact::FlatNorm(1.1)).unwrap_err();
        assert!(matches!(err, Error::SystematicKindConflict(_)));
        let err = c.add_systematic_impact("bkgA", "btag", Impact::Disabled).unwrap_err();
        assert!(matches!(err, Error::UnknownSystematic(_)));
    }

    #[test]
    fn test_apply_systematic_fills_row() {
        let mut c = three_process();
        c.apply_systematic("jes", SystematicKind::Shape, |p| {
            if p.name == "bkgB" { Impact::Disabled } else { Impact::Shape }
        })
        .unwrap();
        c.finalize().unwrap();
        assert_eq!(c.shape_systematics(), ["jes".to_string()]);
        assert_eq!(c.process("bkgB").unwrap().impact("jes"), Some(&Impact::Disabled));
    }

    #[test]
    fn test_classify_signal() {
        let mut c = three_process();
        c.add_process(ProcessModel::new("sig2", -1, 3.0, "sig2")).unwrap();
        let names: Vec<&str> = c.classify_signal().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["sig", "sig2"]);
        assert!(c.is_signal("sig2"));
        assert!(!c.is_signal("bkgA"));
    }

    #[test]
    fn test_rate_param_requires_process() {
        let mut c = three_process();
        c.add_rate_param("bkgA").unwrap();
        assert!(matches!(c.add_rate_param("nope"), Err(Error::UnknownProcess(_))));
        assert_eq!(c.rate_params()[0].parameter_name(), "bkgA_norm");
        assert_eq!(c.rate_params()[0].range, (0.0, 3.0));
    }

    #[test]
    fn test_impact_cells() {
        assert_eq!(Impact::Shape.cell(), "1");
        assert_eq!(Impact::FlatNorm(1.025).cell(), "1.025");
        assert_eq!(Impact::Disabled.cell(), "-");
    }
}
