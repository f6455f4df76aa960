//! Multi-POI physics model: which signal process each POI scales.

use cf_core::{Error, Result};
use cf_datacard::ProcessModel;

use crate::spec::FitSpec;

/// Physics model used for custom POI lists.
pub const MULTI_SIGNAL_MODEL: &str = "HiggsAnalysis.CombinedLimit.PhysicsModel:multiSignalModel";

/// POI range used in the map when `poi_ranges` has no entry.
pub const DEFAULT_POI_RANGE: (f64, f64) = (0.0, 3.0);

/// One `map=` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PoiMapEntry {
    /// Signal process name
    pub process: String,
    /// POI scaling it
    pub poi: String,
    /// Allowed `(lo, hi)` range; initial value is always 1
    pub range: (f64, f64),
}

impl PoiMapEntry {
    /// `map=.*/<process>:<poi>[1,lo,hi]`
    pub fn physics_option(&self) -> String {
        format!("map=.*/{}:{}[1,{},{}]", self.process, self.poi, self.range.0, self.range.1)
    }
}

/// Mapping of signal processes to POIs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PoiMapping {
    entries: Vec<PoiMapEntry>,
}

impl PoiMapping {
    /// Map each POI `r_<process>` to the signal process `<process>`.
    ///
    /// `signals` must come from `ModelCollection::classify_signal`. Every POI
    /// has to scale at least one signal process.
    pub fn from_signals(signals: &[&ProcessModel], spec: &FitSpec) -> Result<Self> {
        let pairs = signals
            .iter()
            .filter_map(|p| {
                let poi = format!("r_{}", p.name);
                spec.pois.contains(&poi).then(|| (p.name.clone(), poi))
            })
            .collect::<Vec<_>>();
        for p in signals {
            if !spec.pois.contains(&format!("r_{}", p.name)) {
                log::warn!("signal process '{}' is not scaled by any POI", p.name);
            }
        }
        Self::explicit(pairs, spec)
    }

    /// Explicit `(process, poi)` pairs.
    pub fn explicit(pairs: Vec<(String, String)>, spec: &FitSpec) -> Result<Self> {
        for poi in &spec.pois {
            if !pairs.iter().any(|(_, p)| p == poi) {
                return Err(Error::InvalidFitSpec(format!("POI '{poi}' scales no signal process")));
            }
        }
        let entries = pairs
            .into_iter()
            .map(|(process, poi)| {
                let range = spec.options.poi_ranges.get(&poi).copied().unwrap_or(DEFAULT_POI_RANGE);
                PoiMapEntry { process, poi, range }
            })
            .collect();
        Ok(Self { entries })
    }

    /// Map entries in order.
    pub fn entries(&self) -> &[PoiMapEntry] {
        &self.entries
    }

    /// Workspace-build arguments: `-P <model> --PO 'map=...' ...`.
    pub fn workspace_args(&self) -> Vec<String> {
        let mut args = vec!["-P".to_string(), MULTI_SIGNAL_MODEL.to_string()];
        for e in &self.entries {
            args.push("--PO".to_string());
            args.push(e.physics_option());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::FitMethod;

    #[test]
    fn test_map_from_signals() {
        let plus = ProcessModel::new("TTWplus", -1, 10.0, "TTWplus");
        let minus = ProcessModel::new("TTWminus", 0, 8.0, "TTWminus");
        let spec = FitSpec::new(FitMethod::MultiDimFit).with_pois(["r_TTWplus", "r_TTWminus"]);
        let map = PoiMapping::from_signals(&[&plus, &minus], &spec).unwrap();
        assert_eq!(map.entries().len(), 2);
        assert_eq!(map.entries()[0].physics_option(), "map=.*/TTWplus:r_TTWplus[1,0,3]");
        let args = map.workspace_args();
        assert_eq!(args.iter().filter(|a| *a == "--PO").count(), 2);
        assert_eq!(args[1], MULTI_SIGNAL_MODEL);
    }

    #[test]
    fn test_unmapped_poi_rejected() {
        let plus = ProcessModel::new("TTWplus", -1, 10.0, "TTWplus");
        let spec = FitSpec::new(FitMethod::MultiDimFit).with_pois(["r_TTWplus", "r_TTZ"]);
        assert!(matches!(
            PoiMapping::from_signals(&[&plus], &spec),
            Err(Error::InvalidFitSpec(_))
        ));
    }
}
