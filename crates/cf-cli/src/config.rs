//! Pipeline and aggregation configuration (YAML or JSON).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use cf_datacard::{
    CombinationRule, Impact, ModelCollection, ProcessModel, RateParam, SystematicKind, WriterOptions,
};
use cf_fit::{BatchResources, FitSpec, PoiMapping, Scheduler};
use cf_results::Engine;

/// Read a config file; `.json` is parsed as JSON, anything else as YAML.
pub fn read_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg = if ext == "json" {
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?
    } else {
        serde_yaml_ng::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?
    };
    Ok(cfg)
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding datacards (elementary and combined).
    #[serde(default = "default_cards_dir")]
    pub cards_dir: PathBuf,
    /// Working directory of the fit tool; all fit outputs land here.
    #[serde(default = "default_fit_dir")]
    pub fit_dir: PathBuf,
    /// Histogram file used by channels that do not name their own.
    #[serde(default)]
    pub histogram_file: Option<PathBuf>,
    /// Copy referenced histograms into channel-local JSON files.
    #[serde(default)]
    pub copy_histograms: bool,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub combinations: Vec<CombinationRule>,
    #[serde(default)]
    pub fits: Vec<FitConfig>,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

fn default_cards_dir() -> PathBuf {
    PathBuf::from("cards")
}

fn default_fit_dir() -> PathBuf {
    PathBuf::from("fits")
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriterConfig {
    #[serde(default = "default_true")]
    pub write_rates: bool,
    #[serde(default = "default_auto_mc_stats")]
    pub auto_mc_stats_threshold: f64,
    #[serde(default = "default_card_prefix")]
    pub card_prefix: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            write_rates: true,
            auto_mc_stats_threshold: default_auto_mc_stats(),
            card_prefix: default_card_prefix(),
        }
    }
}

impl WriterConfig {
    pub fn options(&self) -> WriterOptions {
        WriterOptions {
            write_rates: self.write_rates,
            auto_mc_stats_threshold: self.auto_mc_stats_threshold,
            card_prefix: self.card_prefix.clone(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_auto_mc_stats() -> f64 {
    10.0
}

fn default_card_prefix() -> String {
    "datacard_".to_string()
}

fn default_data_histogram() -> String {
    "data_obs".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default = "default_data_histogram")]
    pub data_histogram: String,
    /// Observed yield; omitted means `-1`.
    #[serde(default)]
    pub data_yield: Option<f64>,
    #[serde(default)]
    pub histogram_file: Option<PathBuf>,
    pub processes: Vec<ProcessConfig>,
    #[serde(default)]
    pub systematics: Vec<SystematicConfig>,
    /// Processes with a free normalization (prior 1, range [0, 3]).
    #[serde(default)]
    pub rate_params: Vec<String>,
    /// `[numerator, denominator]`
    #[serde(default)]
    pub ratio_pair: Option<(String, String)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    pub name: String,
    /// `<= 0` signal, `> 0` background.
    pub id: i32,
    #[serde(rename = "yield")]
    pub nominal_yield: f64,
    /// Nominal histogram name; defaults to the process name.
    #[serde(default)]
    pub histogram: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystematicConfig {
    pub name: String,
    pub kind: SystematicKind,
    /// Processes affected; omitted means all.
    #[serde(default)]
    pub processes: Option<Vec<String>>,
    /// lnN magnitude for every affected process.
    #[serde(default)]
    pub magnitude: Option<f64>,
    /// Per-process lnN magnitudes, overriding `magnitude`.
    #[serde(default)]
    pub magnitudes: BTreeMap<String, f64>,
}

impl SystematicConfig {
    fn affects(&self, process: &str) -> bool {
        match &self.processes {
            Some(list) => list.iter().any(|p| p == process) || self.magnitudes.contains_key(process),
            None => true,
        }
    }

    fn impact(&self, process: &str) -> Result<Impact> {
        if !self.affects(process) {
            return Ok(Impact::Disabled);
        }
        match self.kind {
            SystematicKind::Shape => Ok(Impact::Shape),
            SystematicKind::LnN => {
                let m = self.magnitudes.get(process).copied().or(self.magnitude);
                match m {
                    Some(m) => Ok(Impact::FlatNorm(m)),
                    None => bail!("lnN systematic '{}' has no magnitude for '{process}'", self.name),
                }
            }
        }
    }
}

impl ChannelConfig {
    /// Finalized collection for this channel.
    pub fn collection(&self, default_histograms: Option<&Path>) -> Result<ModelCollection> {
        let file = self
            .histogram_file
            .as_deref()
            .or(default_histograms)
            .with_context(|| format!("channel '{}' has no histogram file", self.name))?;
        let mut c = ModelCollection::new(&self.name, file, &self.data_histogram);
        for p in &self.processes {
            let hist = p.histogram.clone().unwrap_or_else(|| p.name.clone());
            c.add_process(ProcessModel::new(&p.name, p.id, p.nominal_yield, hist))?;
        }
        for s in &self.systematics {
            c.declare_systematic(&s.name, s.kind)?;
            for p in &self.processes {
                c.add_systematic_impact(&p.name, &s.name, s.impact(&p.name)?)?;
            }
        }
        c.set_data_yield(self.data_yield)?;
        for p in &self.rate_params {
            c.add_rate_param_with(RateParam::new(p))?;
        }
        if let Some((num, den)) = &self.ratio_pair {
            c.set_ratio_pair(num, den)?;
        }
        c.finalize()?;
        Ok(c)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FitConfig {
    /// Card file name inside `cards_dir`.
    pub card: String,
    #[serde(flatten)]
    pub spec: FitSpec,
    /// Explicit POI → signal process map for custom POIs.
    #[serde(default)]
    pub poi_map: BTreeMap<String, String>,
    /// Derive the POI map from this channel's signal processes (`r_<process>`).
    #[serde(default)]
    pub signal_channel: Option<String>,
}

impl PipelineConfig {
    /// POI map for a fit with custom POIs; `None` for the default POI.
    pub fn poi_mapping(&self, fit: &FitConfig) -> Result<Option<PoiMapping>> {
        if fit.spec.has_default_poi() {
            return Ok(None);
        }
        if !fit.poi_map.is_empty() {
            let pairs = fit.poi_map.iter().map(|(poi, proc_)| (proc_.clone(), poi.clone())).collect();
            return Ok(Some(PoiMapping::explicit(pairs, &fit.spec)?));
        }
        let Some(name) = &fit.signal_channel else {
            bail!("fit on '{}' uses custom POIs but has neither poi_map nor signal_channel", fit.card);
        };
        let channel = self
            .channels
            .iter()
            .find(|c| &c.name == name)
            .with_context(|| format!("unknown signal_channel '{name}'"))?;
        let collection = channel.collection(self.histogram_file.as_deref())?;
        Ok(Some(PoiMapping::from_signals(&collection.classify_signal(), &fit.spec)?))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionConfig {
    Local {
        #[serde(default)]
        reuse_workspace: bool,
    },
    Batch {
        #[serde(default)]
        scheduler: Scheduler,
        #[serde(default)]
        resources: BatchResources,
        #[serde(default = "default_jobs_dir")]
        jobs_dir: PathBuf,
        /// Submit after writing; otherwise only emit the job files.
        #[serde(default)]
        submit: bool,
    },
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig::Local { reuse_workspace: false }
    }
}

fn default_jobs_dir() -> PathBuf {
    PathBuf::from("jobs")
}

/// `cardfit aggregate` input.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregateConfig {
    /// Directory with the fit outputs.
    #[serde(default = "default_fit_dir")]
    pub fit_dir: PathBuf,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default = "default_weight_tolerance")]
    pub weight_tolerance: f64,
    pub variables: Vec<VariableConfig>,
}

fn default_weight_tolerance() -> f64 {
    cf_results::aggregate::WEIGHT_TOLERANCE
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariableConfig {
    /// One multi-POI fit: stat-only and total outputs.
    Fit {
        name: String,
        pois: Vec<String>,
        /// Output name (stem or file) of the stat-only fit.
        stat: String,
        /// Output name of the total fit.
        total: String,
    },
    /// One POI measured per bin, combined with bin weights.
    Bins {
        name: String,
        #[serde(default = "default_poi")]
        poi: String,
        #[serde(default)]
        weights: Option<Vec<f64>>,
        #[serde(default)]
        reference: Option<ReferenceHistogram>,
        stat: Vec<String>,
        total: Vec<String>,
    },
}

impl VariableConfig {
    pub fn name(&self) -> &str {
        match self {
            VariableConfig::Fit { name, .. } | VariableConfig::Bins { name, .. } => name,
        }
    }
}

fn default_poi() -> String {
    cf_fit::DEFAULT_POI.to_string()
}

/// Reference distribution for bin weights.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceHistogram {
    /// JSON histogram file
    pub file: PathBuf,
    pub histogram: String,
}
