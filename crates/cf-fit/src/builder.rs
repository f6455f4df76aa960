//! FitSpec → ordered commands.
//!
//! Pure and deterministic: the same spec and paths always give the same
//! commands. Every command is built through the same few argument helpers
//! so blinding, POI redefinition and snapshot handling are written once.

use std::path::{Path, PathBuf};

use cf_core::{CommandSpec, Result};

use crate::naming::OutputName;
use crate::physics::PoiMapping;
use crate::spec::{FitMethod, FitSpec};

/// Fit tool executable.
pub const COMBINE: &str = "combine";
/// Workspace builder executable.
pub const TEXT2WORKSPACE: &str = "text2workspace.py";
/// Impacts driver executable.
pub const COMBINE_TOOL: &str = "combineTool.py";
/// Snapshot name written by `--saveWorkspace`.
pub const SNAPSHOT_NAME: &str = "MultiDimFit";

/// Card and workspace a spec runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitTarget {
    /// Text datacard
    pub card: PathBuf,
    /// Workspace built from the card
    pub workspace: PathBuf,
}

impl FitTarget {
    /// Target with an explicit workspace path.
    pub fn new(card: impl Into<PathBuf>, workspace: impl Into<PathBuf>) -> Self {
        Self { card: card.into(), workspace: workspace.into() }
    }

    /// Conventional workspace path next to the card: `<card>.root`, or
    /// `<card>_<poi1>-<poi2>.root` for a multi-POI model.
    pub fn for_card(card: impl Into<PathBuf>, spec: &FitSpec) -> Self {
        let card = card.into();
        let base = crate::naming::card_basename(&card);
        let file = if spec.has_default_poi() {
            format!("{base}.root")
        } else {
            format!("{base}_{}.root", spec.pois.join("-"))
        };
        let workspace = card.with_file_name(file);
        Self { card, workspace }
    }
}

/// Commands of one orchestrator stage plus the files they must leave behind.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Commands, run in order
    pub commands: Vec<CommandSpec>,
    /// Files that must exist and be non-empty afterwards
    pub outputs: Vec<PathBuf>,
    /// Workspace snapshot handed to phase 2
    pub snapshot: Option<PathBuf>,
}

impl Stage {
    fn new(commands: Vec<CommandSpec>) -> Self {
        let outputs = commands.iter().filter_map(|c| c.stdout.clone()).collect();
        Self { commands, outputs, snapshot: None }
    }
}

/// Source of the commands for each orchestrator stage.
pub trait CommandPlan {
    /// Build the workspace from the card.
    fn workspace(&self, spec: &FitSpec, target: &FitTarget) -> Result<Stage>;

    /// The fit itself, or the snapshot fit of a two-phase spec.
    fn phase1(&self, spec: &FitSpec, target: &FitTarget) -> Result<Stage>;

    /// Frozen-nuisance fit run on `snapshot`, the literal phase-1 output.
    fn phase2(&self, spec: &FitSpec, target: &FitTarget, snapshot: &Path) -> Result<Stage>;
}

/// Commands for the `combine` tool chain.
#[derive(Debug, Clone, Default)]
pub struct CombineCommandBuilder {
    poi_map: Option<PoiMapping>,
}

impl CombineCommandBuilder {
    /// Builder for default-POI specs.
    pub fn new() -> Self {
        Self { poi_map: None }
    }

    /// Builder whose workspaces use a multi-signal model.
    pub fn with_poi_map(poi_map: PoiMapping) -> Self {
        Self { poi_map: Some(poi_map) }
    }

    /// All commands of `spec`, in execution order.
    pub fn build(&self, spec: &FitSpec, target: &FitTarget) -> Result<Vec<CommandSpec>> {
        let mut commands = self.workspace(spec, target)?.commands;
        let phase1 = self.phase1(spec, target)?;
        commands.extend(phase1.commands);
        if let Some(snapshot) = phase1.snapshot {
            commands.extend(self.phase2(spec, target, &snapshot)?.commands);
        }
        Ok(commands)
    }

    /// `combine -M <Method> <input> -m <mass> -n <name>`
    fn combine(method: &str, input: &Path, name: &str, spec: &FitSpec) -> CommandSpec {
        CommandSpec::new(COMBINE)
            .args(["-M", method])
            .arg(input.display().to_string())
            .args(["-m", spec.options.mass.as_str(), "-n", name])
    }

    /// The method's own flags, independent of phase.
    fn method_args(spec: &FitSpec) -> Vec<String> {
        let o = &spec.options;
        let mut args: Vec<String> = match spec.method {
            FitMethod::MultiDimFit => {
                vec!["--algo".into(), "singles".into(), "--saveFitResult".into()]
            }
            FitMethod::LikelihoodScan => {
                let mut a = vec![
                    "--algo".to_string(),
                    "grid".to_string(),
                    "--points".to_string(),
                    o.points.to_string(),
                ];
                if !spec.has_default_poi() {
                    a.extend(["-P".to_string(), spec.pois[0].clone()]);
                    a.extend(["--floatOtherPOIs".to_string(), "1".to_string()]);
                }
                a
            }
            FitMethod::GoodnessOfFit => vec!["--algo".into(), o.gof_algo.clone()],
            FitMethod::Significance | FitMethod::FitDiagnostics | FitMethod::Impacts => Vec::new(),
        };
        if matches!(spec.method, FitMethod::MultiDimFit | FitMethod::LikelihoodScan)
            && !o.poi_ranges.is_empty()
        {
            let ranges: Vec<String> =
                o.poi_ranges.iter().map(|(p, (lo, hi))| format!("{p}={lo},{hi}")).collect();
            args.extend(["--setParameterRanges".to_string(), ranges.join(":")]);
        }
        if o.robust_fit {
            args.extend(["--robustFit".to_string(), "1".to_string()]);
        }
        args
    }

    /// `--expectSignal=1` or `--setParameters`, never both. No `-t`.
    fn signal_injection(spec: &FitSpec) -> Vec<String> {
        if spec.has_default_poi() {
            vec!["--expectSignal=1".to_string()]
        } else {
            let values: Vec<String> = spec.pois.iter().map(|p| format!("{p}=1")).collect();
            vec!["--setParameters".to_string(), values.join(",")]
        }
    }

    /// `-t -1` plus signal injection when blinded.
    fn blinding(spec: &FitSpec) -> Vec<String> {
        if spec.use_data {
            return Vec::new();
        }
        let mut args = vec!["-t".to_string(), "-1".to_string()];
        args.extend(Self::signal_injection(spec));
        args
    }

    fn redefine_pois(spec: &FitSpec) -> Vec<String> {
        if spec.has_default_poi() {
            Vec::new()
        } else {
            vec!["--redefineSignalPOIs".to_string(), spec.pois.join(",")]
        }
    }

    fn impacts(spec: &FitSpec, target: &FitTarget, name: &OutputName) -> Vec<CommandSpec> {
        let stem = name.stem();
        let base = || {
            CommandSpec::new(COMBINE_TOOL)
                .args(["-M", "Impacts", "-d"])
                .arg(target.workspace.display().to_string())
                .args(["-m", spec.options.mass.as_str(), "-n", stem.as_str()])
        };
        let common: Vec<String> = Self::blinding(spec)
            .into_iter()
            .chain(Self::redefine_pois(spec))
            .chain(if spec.options.robust_fit {
                vec!["--robustFit".to_string(), "1".to_string()]
            } else {
                Vec::new()
            })
            .collect();
        vec![
            base()
                .arg("--doInitialFit")
                .args(common.clone())
                .log_to(name.aux_log_file("initial")),
            base().arg("--doFits").args(common.clone()).log_to(name.aux_log_file("fits")),
            base()
                .args(["-o".to_string(), format!("{stem}.json")])
                .args(common)
                .log_to(name.log_file()),
        ]
    }

    fn goodness_of_fit(spec: &FitSpec, target: &FitTarget, name: &OutputName) -> Vec<CommandSpec> {
        let stem = name.stem();
        let method = spec.method.tool_method();
        let mut commands = vec![
            Self::combine(method, &target.workspace, &stem, spec)
                .args(Self::method_args(spec))
                .args(Self::blinding(spec))
                .args(Self::redefine_pois(spec))
                .log_to(name.log_file()),
        ];
        if spec.options.toys > 0 {
            let toys_name = format!("{stem}.toys");
            let mut toys = Self::combine(method, &target.workspace, &toys_name, spec)
                .args(Self::method_args(spec))
                .args(["-t".to_string(), spec.options.toys.to_string()])
                .args(["-s".to_string(), spec.options.seed.to_string(), "--toysFreq".to_string()]);
            if !spec.use_data {
                toys = toys.args(Self::signal_injection(spec));
            }
            commands.push(toys.args(Self::redefine_pois(spec)).log_to(name.aux_log_file("toys")));
        }
        commands
    }
}

impl CommandPlan for CombineCommandBuilder {
    fn workspace(&self, spec: &FitSpec, target: &FitTarget) -> Result<Stage> {
        spec.validate()?;
        let mut cmd = CommandSpec::new(TEXT2WORKSPACE)
            .arg(target.card.display().to_string())
            .args(["-o".to_string(), target.workspace.display().to_string()]);
        if !spec.has_default_poi() {
            let map = self.poi_map.as_ref().ok_or_else(|| {
                cf_core::Error::InvalidFitSpec(format!(
                    "custom POIs {:?} need a POI map for the workspace build",
                    spec.pois
                ))
            })?;
            for poi in &spec.pois {
                if !map.entries().iter().any(|e| &e.poi == poi) {
                    return Err(cf_core::Error::InvalidFitSpec(format!(
                        "POI '{poi}' is missing from the POI map"
                    )));
                }
            }
            cmd = cmd.args(map.workspace_args());
        }
        let log = target.workspace.with_extension("t2w.txt");
        let mut stage = Stage::new(vec![cmd.log_to(log)]);
        // text2workspace is usually silent on success
        stage.outputs = vec![target.workspace.clone()];
        Ok(stage)
    }

    fn phase1(&self, spec: &FitSpec, target: &FitTarget) -> Result<Stage> {
        spec.validate()?;
        let name = OutputName::new(&target.card, spec)?;

        if spec.is_two_phase() {
            let snapshot_name = name.snapshot_stem();
            let cmd = Self::combine("MultiDimFit", &target.workspace, &snapshot_name, spec)
                .arg("--saveWorkspace")
                .args(Self::blinding(spec))
                .args(Self::redefine_pois(spec))
                .log_to(name.aux_log_file("snapshot"));
            let snapshot =
                OutputName::tool_output(&snapshot_name, "MultiDimFit", &spec.options.mass);
            let mut stage = Stage::new(vec![cmd]);
            stage.outputs.push(snapshot.clone());
            stage.snapshot = Some(snapshot);
            return Ok(stage);
        }

        let commands = match spec.method {
            FitMethod::Impacts => Self::impacts(spec, target, &name),
            FitMethod::GoodnessOfFit => Self::goodness_of_fit(spec, target, &name),
            _ => vec![
                Self::combine(spec.method.tool_method(), &target.workspace, &name.stem(), spec)
                    .args(Self::method_args(spec))
                    .args(Self::blinding(spec))
                    .args(Self::redefine_pois(spec))
                    .log_to(name.log_file()),
            ],
        };
        Ok(Stage::new(commands))
    }

    fn phase2(&self, spec: &FitSpec, target: &FitTarget, snapshot: &Path) -> Result<Stage> {
        spec.validate()?;
        let name = OutputName::new(&target.card, spec)?;
        let mut cmd = Self::combine(spec.method.tool_method(), snapshot, &name.stem(), spec)
            .args(Self::method_args(spec))
            .args(Self::blinding(spec))
            .args(Self::redefine_pois(spec))
            .args(["--snapshotName", SNAPSHOT_NAME]);
        cmd = match &spec.options.float_nuisance {
            Some(nuisance) => cmd
                .args(["--freezeParameters", "allConstrainedNuisances"])
                .args(["--floatParameters", nuisance.as_str()]),
            None => cmd.args(["--freezeParameters", "allConstrainedNuisances"]),
        };
        Ok(Stage::new(vec![cmd.log_to(name.log_file())]))
    }
}
