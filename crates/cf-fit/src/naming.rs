//! Output naming.
//!
//! `<card>_out_<tag>_<exp|obs>[_stat][_<poi1>-<poi2>...][_only-<nuisance>]`
//!
//! The name is the only key linking an output file back to the fit that
//! produced it, so [`OutputName::parse`] inverts [`OutputName::stem`]
//! exactly. The POI suffix is omitted for the default POI. Card basenames
//! with a `.` or a tool file prefix are refused up front, and POI names
//! that collide with the markers are refused by [`FitSpec::validate`].

use std::path::{Path, PathBuf};

use cf_core::{Error, Result};

use crate::spec::{DEFAULT_POI, FitMethod, FitSpec};

const OUT_MARKER: &str = "_out_";
const STAT_MARKER: &str = "_stat";
const ONLY_MARKER: &str = "_only-";
const POI_SEPARATOR: char = '-';

/// Suffix of the phase-1 snapshot fit name.
pub const SNAPSHOT_SUFFIX: &str = ".snapshot";

/// File-name prefixes the fit tool puts in front of `-n` names.
const TOOL_PREFIXES: &[&str] = &["higgsCombine", "fitDiagnostics", "multidimfit"];

/// Identity of one fit's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputName {
    /// Card basename (no directory, no `.txt`)
    pub card: String,
    /// Fit method
    pub method: FitMethod,
    /// Real data (`obs`) or Asimov (`exp`)
    pub use_data: bool,
    /// Stat-only variant
    pub stat_only: bool,
    /// POIs (`["r"]` when defaulted)
    pub pois: Vec<String>,
    /// Single floating nuisance variant
    pub float_nuisance: Option<String>,
}

/// Card basename used in output names.
pub fn card_basename(card: &Path) -> String {
    let name = card.file_name().and_then(|s| s.to_str()).unwrap_or_default();
    name.strip_suffix(".txt").unwrap_or(name).to_string()
}

/// Reject card basenames that [`OutputName::parse`] could not recover.
pub fn check_card_basename(card: &str) -> Result<()> {
    let bad = |why: &str| Err(Error::InvalidFitSpec(format!("card name '{card}' {why}")));
    if card.is_empty() {
        return bad("is empty");
    }
    if card.contains(|c: char| c == '.' || c == '/' || c.is_whitespace()) {
        return bad("contains '.', '/' or whitespace");
    }
    if let Some(p) = TOOL_PREFIXES.iter().find(|p| card.starts_with(*p)) {
        return bad(&format!("starts with the tool prefix '{p}'"));
    }
    Ok(())
}

impl OutputName {
    /// Name for `spec` run against `card`.
    ///
    /// Fails when the card basename cannot survive a round trip through
    /// [`parse`](Self::parse).
    pub fn new(card: &Path, spec: &FitSpec) -> Result<Self> {
        let card = card_basename(card);
        check_card_basename(&card)?;
        Ok(Self {
            card,
            method: spec.method,
            use_data: spec.use_data,
            stat_only: spec.stat_only,
            pois: spec.pois.clone(),
            float_nuisance: spec.options.float_nuisance.clone(),
        })
    }

    fn has_default_poi(&self) -> bool {
        self.pois.len() == 1 && self.pois[0] == DEFAULT_POI
    }

    /// The fit name passed to `-n`.
    pub fn stem(&self) -> String {
        let mut s = format!(
            "{}{}{}_{}",
            self.card,
            OUT_MARKER,
            self.method.tag(),
            if self.use_data { "obs" } else { "exp" }
        );
        if self.stat_only {
            s.push_str(STAT_MARKER);
        }
        if !self.has_default_poi() {
            s.push('_');
            s.push_str(&self.pois.join(&POI_SEPARATOR.to_string()));
        }
        if let Some(n) = &self.float_nuisance {
            s.push_str(ONLY_MARKER);
            s.push_str(n);
        }
        s
    }

    /// Name of the phase-1 snapshot fit.
    pub fn snapshot_stem(&self) -> String {
        format!("{}{}", self.stem(), SNAPSHOT_SUFFIX)
    }

    /// Combined stdout/stderr capture of the main command.
    pub fn log_file(&self) -> PathBuf {
        PathBuf::from(format!("{}.txt", self.stem()))
    }

    /// Log of an auxiliary command (`.snapshot`, `.toys`, ...).
    pub fn aux_log_file(&self, suffix: &str) -> PathBuf {
        PathBuf::from(format!("{}.{}.txt", self.stem(), suffix))
    }

    /// `higgsCombine<name>.<Method>.mH<mass>.root`
    pub fn tool_output(name: &str, tool_method: &str, mass: &str) -> PathBuf {
        PathBuf::from(format!("higgsCombine{name}.{tool_method}.mH{mass}.root"))
    }

    /// Structured fit-result file and object name, for the two fit engines.
    pub fn fit_result_file(&self) -> Option<(PathBuf, &'static str)> {
        match self.method {
            FitMethod::FitDiagnostics => {
                Some((PathBuf::from(format!("fitDiagnostics{}.root", self.stem())), "fit_s"))
            }
            FitMethod::MultiDimFit => {
                Some((PathBuf::from(format!("multidimfit{}.root", self.stem())), "fit_mdf"))
            }
            _ => None,
        }
    }

    /// Same fit identity with another method (used by the engine fallback).
    pub fn with_method(&self, method: FitMethod) -> Self {
        Self { method, ..self.clone() }
    }

    /// Recover the identity from a stem or any output file name derived from it.
    pub fn parse(name: &str) -> Result<Self> {
        let bad = |why: &str| Error::Parse(format!("output name '{name}': {why}"));

        let file = name.rsplit('/').next().unwrap_or(name);
        let file = TOOL_PREFIXES.iter().find_map(|p| file.strip_prefix(p)).unwrap_or(file);
        let stem = file.split('.').next().unwrap_or(file);

        let at = stem.rfind(OUT_MARKER).ok_or_else(|| bad("no '_out_' marker"))?;
        let card = &stem[..at];
        let rest = &stem[at + OUT_MARKER.len()..];
        if card.is_empty() {
            return Err(bad("empty card name"));
        }

        let (tag, rest) = rest.split_once('_').ok_or_else(|| bad("missing exp/obs"))?;
        let method = FitMethod::from_tag(tag).ok_or_else(|| bad("unknown method tag"))?;

        let (mode, mut rest) = match rest.find('_') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        let use_data = match mode {
            "obs" => true,
            "exp" => false,
            _ => return Err(bad("expected 'exp' or 'obs'")),
        };

        let mut float_nuisance = None;
        if let Some(i) = rest.find(ONLY_MARKER) {
            let n = &rest[i + ONLY_MARKER.len()..];
            if n.is_empty() {
                return Err(bad("empty nuisance name"));
            }
            float_nuisance = Some(n.to_string());
            rest = &rest[..i];
        }

        let mut stat_only = false;
        if rest == STAT_MARKER || rest.starts_with(&format!("{STAT_MARKER}_")) {
            stat_only = true;
            rest = &rest[STAT_MARKER.len()..];
        }

        let pois = match rest.strip_prefix('_') {
            Some(suffix) if !suffix.is_empty() => {
                suffix.split(POI_SEPARATOR).map(String::from).collect()
            }
            Some(_) => return Err(bad("empty POI suffix")),
            None if rest.is_empty() => vec![DEFAULT_POI.to_string()],
            None => return Err(bad("trailing characters")),
        };

        Ok(Self { card: card.to_string(), method, use_data, stat_only, pois, float_nuisance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(spec: &FitSpec) -> OutputName {
        OutputName::new(Path::new("cards/combined_y2016.txt"), spec).unwrap()
    }

    #[test]
    fn test_stem_layout() {
        let spec = FitSpec::new(FitMethod::MultiDimFit);
        assert_eq!(name(&spec).stem(), "combined_y2016_out_mdf_exp");

        let spec = FitSpec::new(FitMethod::MultiDimFit)
            .with_pois(["r_TTWplus", "r_TTWminus"])
            .stat_only()
            .observed();
        assert_eq!(name(&spec).stem(), "combined_y2016_out_mdf_obs_stat_r_TTWplus-r_TTWminus");

        let spec = FitSpec::new(FitMethod::LikelihoodScan).float_only("CMS_lumi_2016");
        assert_eq!(name(&spec).stem(), "combined_y2016_out_scan_exp_only-CMS_lumi_2016");
    }

    #[test]
    fn test_parse_inverts_stem() {
        let specs = vec![
            FitSpec::new(FitMethod::Significance),
            FitSpec::new(FitMethod::Significance).observed(),
            FitSpec::new(FitMethod::FitDiagnostics).stat_only(),
            FitSpec::new(FitMethod::MultiDimFit).with_pois(["r_TTWplus", "r_TTWminus"]),
            FitSpec::new(FitMethod::MultiDimFit).with_pois(["r_TTW"]).stat_only().observed(),
            FitSpec::new(FitMethod::LikelihoodScan).with_pois(["r_a", "r_b"]).float_only("jes_2017"),
            FitSpec::new(FitMethod::GoodnessOfFit).observed(),
            FitSpec::new(FitMethod::Impacts),
        ];
        for spec in specs {
            let n = name(&spec);
            assert_eq!(OutputName::parse(&n.stem()).unwrap(), n);
            assert_eq!(OutputName::parse(&n.snapshot_stem()).unwrap(), n);
            let file = OutputName::tool_output(&n.stem(), "MultiDimFit", "125");
            assert_eq!(OutputName::parse(file.to_str().unwrap()).unwrap(), n);
        }
    }

    #[test]
    fn test_variants_are_disjoint() {
        let base = FitSpec::new(FitMethod::MultiDimFit);
        let stems: Vec<String> = [
            base.clone(),
            base.clone().observed(),
            base.clone().stat_only(),
            base.clone().observed().stat_only(),
        ]
        .iter()
        .map(|s| name(s).stem())
        .collect();
        for i in 0..stems.len() {
            for j in (i + 1)..stems.len() {
                assert_ne!(stems[i], stems[j]);
            }
        }
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        for bad in ["card.txt", "x_out_zzz_exp", "x_out_mdf_blind", "_out_mdf_exp", "x_out_mdf_exp_"] {
            assert!(OutputName::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_unrecoverable_card_names_rejected() {
        let spec = FitSpec::new(FitMethod::MultiDimFit);
        for card in ["card.v2.txt", "multidimfit_study.txt", "higgsCombineX.txt", "fitDiagnosticsA.txt", ".txt"] {
            let err = OutputName::new(Path::new(card), &spec).unwrap_err();
            assert!(matches!(err, Error::InvalidFitSpec(_)), "{card}: {err}");
        }
        let n = OutputName::new(Path::new("cards/study_multidimfit.txt"), &spec).unwrap();
        assert_eq!(OutputName::parse(&format!("multidimfit{}.root", n.stem())).unwrap(), n);
    }

    #[test]
    fn test_fit_result_files() {
        let n = name(&FitSpec::new(FitMethod::MultiDimFit));
        let (file, object) = n.fit_result_file().unwrap();
        assert_eq!(file, PathBuf::from("multidimfitcombined_y2016_out_mdf_exp.root"));
        assert_eq!(object, "fit_mdf");
        let (file, object) = n.with_method(FitMethod::FitDiagnostics).fit_result_file().unwrap();
        assert_eq!(file, PathBuf::from("fitDiagnosticscombined_y2016_out_fitdiag_exp.root"));
        assert_eq!(object, "fit_s");
        assert!(n.with_method(FitMethod::Impacts).fit_result_file().is_none());
    }
}
