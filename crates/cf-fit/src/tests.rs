//! Command generation and orchestration scenarios.

use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cf_core::{CommandRunner, CommandSpec, Error, Result};
use cf_datacard::ProcessModel;

use crate::builder::{COMBINE, CombineCommandBuilder, CommandPlan, FitTarget, Stage, TEXT2WORKSPACE};
use crate::naming::OutputName;
use crate::orchestrator::{FitOrchestrator, FitStage};
use crate::physics::PoiMapping;
use crate::spec::{FitMethod, FitOptions, FitSpec};

fn target() -> FitTarget {
    FitTarget::new("combined_y2016.txt", "combined_y2016.root")
}

fn two_poi_builder(spec: &FitSpec) -> CombineCommandBuilder {
    let plus = ProcessModel::new("TTWplus", -1, 10.0, "TTWplus");
    let minus = ProcessModel::new("TTWminus", 0, 8.0, "TTWminus");
    CombineCommandBuilder::with_poi_map(PoiMapping::from_signals(&[&plus, &minus], spec).unwrap())
}

fn fit_commands(commands: &[CommandSpec]) -> Vec<&CommandSpec> {
    commands.iter().filter(|c| c.program == COMBINE).collect()
}

#[test]
fn two_poi_scenario() {
    let spec = FitSpec::new(FitMethod::MultiDimFit).with_pois(["r_TTWplus", "r_TTWminus"]);
    let commands = two_poi_builder(&spec).build(&spec, &target()).unwrap();

    let ws = &commands[0];
    assert_eq!(ws.program, "text2workspace.py");
    assert_eq!(ws.args.iter().filter(|a| *a == "--PO").count(), 2);
    assert!(ws.args.contains(&"map=.*/TTWplus:r_TTWplus[1,0,3]".to_string()));

    let fits = fit_commands(&commands);
    assert!(!fits.is_empty());
    for cmd in fits {
        assert_eq!(cmd.arg_value("--redefineSignalPOIs"), Some("r_TTWplus,r_TTWminus"));
        assert_eq!(cmd.arg_value("--setParameters"), Some("r_TTWplus=1,r_TTWminus=1"));
        assert!(!cmd.has_arg("--expectSignal=1"));
    }
}

#[test]
fn blinding_flags() {
    let spec = FitSpec::new(FitMethod::Significance);
    let commands = CombineCommandBuilder::new().build(&spec, &target()).unwrap();
    let fit = fit_commands(&commands)[0];
    assert_eq!(fit.arg_value("-t"), Some("-1"));
    assert!(fit.has_arg("--expectSignal=1"));
    assert!(!fit.has_arg("--setParameters"));
    assert!(!fit.has_arg("--redefineSignalPOIs"));

    let observed = CombineCommandBuilder::new().build(&spec.clone().observed(), &target()).unwrap();
    let fit = fit_commands(&observed)[0];
    assert!(!fit.has_arg("-t"));
    assert!(!fit.has_arg("--expectSignal=1"));
}

#[test]
fn every_command_logs_to_one_file() {
    let specs = [
        FitSpec::new(FitMethod::Significance),
        FitSpec::new(FitMethod::FitDiagnostics).stat_only(),
        FitSpec::new(FitMethod::Impacts).observed(),
        FitSpec::new(FitMethod::GoodnessOfFit).with_options(FitOptions { toys: 50, ..Default::default() }),
        FitSpec::new(FitMethod::LikelihoodScan).float_only("CMS_lumi"),
    ];
    for spec in specs {
        for cmd in CombineCommandBuilder::new().build(&spec, &target()).unwrap() {
            let out = cmd.stdout.as_ref().expect("stdout redirected");
            assert_eq!(cmd.stderr.as_ref(), Some(out));
            let shell = cmd.to_shell();
            let file = out.display().to_string();
            assert!(shell.ends_with(&format!("> {file} 2> {file}")), "{shell}");
        }
    }
}

#[test]
fn build_is_deterministic() {
    let spec = FitSpec::new(FitMethod::MultiDimFit).with_pois(["r_TTWplus", "r_TTWminus"]).stat_only();
    let builder = two_poi_builder(&spec);
    assert_eq!(builder.build(&spec, &target()).unwrap(), builder.build(&spec, &target()).unwrap());
}

#[test]
fn stat_only_phase_two_reads_phase_one_output() {
    let spec = FitSpec::new(FitMethod::MultiDimFit).stat_only();
    let builder = CombineCommandBuilder::new();
    let phase1 = builder.phase1(&spec, &target()).unwrap();
    let snapshot = phase1.snapshot.clone().unwrap();
    assert_eq!(
        snapshot,
        PathBuf::from("higgsCombinecombined_y2016_out_mdf_exp_stat.snapshot.MultiDimFit.mH125.root")
    );
    assert!(phase1.commands[0].has_arg("--saveWorkspace"));
    assert!(phase1.outputs.contains(&snapshot));

    let phase2 = builder.phase2(&spec, &target(), &snapshot).unwrap();
    let cmd = &phase2.commands[0];
    assert_eq!(cmd.args[2], snapshot.display().to_string());
    assert_eq!(cmd.arg_value("--snapshotName"), Some("MultiDimFit"));
    assert_eq!(cmd.arg_value("--freezeParameters"), Some("allConstrainedNuisances"));
    assert_eq!(cmd.arg_value("-n"), Some("combined_y2016_out_mdf_exp_stat"));
    assert!(!cmd.has_arg("--floatParameters"));
    assert!(cmd.to_shell().contains("--snapshotName MultiDimFit"));
}

#[test]
fn single_nuisance_phase_two() {
    let spec = FitSpec::new(FitMethod::LikelihoodScan).float_only("CMS_lumi_2016");
    let commands = CombineCommandBuilder::new().build(&spec, &target()).unwrap();
    assert_eq!(commands.len(), 3);
    let last = commands.last().unwrap();
    assert_eq!(last.arg_value("--floatParameters"), Some("CMS_lumi_2016"));
    assert_eq!(last.arg_value("--algo"), Some("grid"));
    assert_eq!(last.arg_value("--points"), Some("30"));
}

#[test]
fn impacts_and_gof_commands() {
    let spec = FitSpec::new(FitMethod::Impacts);
    let commands = CombineCommandBuilder::new().build(&spec, &target()).unwrap();
    assert_eq!(commands.len(), 4);
    assert!(commands[1].has_arg("--doInitialFit"));
    assert!(commands[2].has_arg("--doFits"));
    assert_eq!(commands[3].arg_value("-o"), Some("combined_y2016_out_impacts_exp.json"));

    let spec = FitSpec::new(FitMethod::GoodnessOfFit)
        .observed()
        .with_options(FitOptions { toys: 100, seed: 7, ..Default::default() });
    let commands = CombineCommandBuilder::new().build(&spec, &target()).unwrap();
    assert_eq!(commands.len(), 3);
    assert_eq!(commands[1].arg_value("--algo"), Some("saturated"));
    assert!(!commands[1].has_arg("-t"));
    let toys = &commands[2];
    assert_eq!(toys.arg_value("-t"), Some("100"));
    assert_eq!(toys.arg_value("-s"), Some("7"));
    assert!(toys.has_arg("--toysFreq"));
}

fn builder_for(spec: &FitSpec) -> CombineCommandBuilder {
    if spec.has_default_poi() {
        return CombineCommandBuilder::new();
    }
    let pairs = spec.pois.iter().map(|p| (format!("proc_{p}"), p.clone())).collect();
    CombineCommandBuilder::with_poi_map(PoiMapping::explicit(pairs, spec).unwrap())
}

/// Every valid spec over a handful of cards, methods, POI lists and variants.
fn naming_cases() -> Vec<(PathBuf, FitSpec)> {
    let cards = ["cards/combined_y2016.txt", "cards/study_out_mdf.txt", "cards/SR_multidimfit"];
    let poi_lists: [&[&str]; 4] =
        [&["r"], &["r_TTWplus"], &["r_TTWplus", "r_TTWminus"], &["r_stat", "onlyx", "obs1"]];
    let mut cases = Vec::new();
    for card in cards {
        for method in FitMethod::ALL {
            for pois in poi_lists {
                for use_data in [false, true] {
                    let base = FitSpec::new(method).with_pois(pois.iter().copied());
                    let base = if use_data { base.observed() } else { base };
                    for spec in [base.clone(), base.clone().stat_only(), base.float_only("CMS_lumi_2016")] {
                        if spec.validate().is_ok() {
                            cases.push((PathBuf::from(card), spec));
                        }
                    }
                }
            }
        }
    }
    cases
}

#[test]
fn built_names_decode_to_their_fit() {
    let cases = naming_cases();
    assert!(cases.len() > 150, "{}", cases.len());
    let mut seen: HashMap<String, (PathBuf, FitSpec)> = HashMap::new();

    for (card, spec) in cases {
        let target = FitTarget::for_card(&card, &spec);
        let commands = builder_for(&spec).build(&spec, &target).unwrap();
        let expected = OutputName::new(&card, &spec).unwrap();

        let fit_commands: Vec<&CommandSpec> =
            commands.iter().filter(|c| c.program != TEXT2WORKSPACE).collect();
        assert!(!fit_commands.is_empty());
        for cmd in fit_commands {
            let name = cmd.arg_value("-n").unwrap();
            let log = cmd.stdout.as_ref().unwrap().display().to_string();
            for file in [name, log.as_str()] {
                let parsed = OutputName::parse(file).unwrap_or_else(|e| panic!("{file}: {e}"));
                assert_eq!(parsed, expected, "{file}");
                assert_eq!(parsed.method, spec.method);
                assert_eq!(parsed.use_data, spec.use_data);
                assert_eq!(parsed.stat_only, spec.stat_only);
                assert_eq!(parsed.pois, spec.pois);
                assert_eq!(parsed.float_nuisance, spec.options.float_nuisance);
            }
        }

        let stem = expected.stem();
        if let Some(previous) = seen.insert(stem.clone(), (card.clone(), spec.clone())) {
            panic!("{stem} is shared by {previous:?} and {:?}", (card, spec));
        }
    }
}

#[test]
fn stat_prefixed_poi_cannot_alias_stat_only_fit() {
    let aliased = FitSpec::new(FitMethod::MultiDimFit).with_pois(["stat_x"]);
    assert!(matches!(aliased.validate(), Err(Error::InvalidFitSpec(_))));
    assert!(CombineCommandBuilder::new().build(&aliased, &target()).is_err());

    let stat_only = FitSpec::new(FitMethod::MultiDimFit).with_pois(["x"]).stat_only();
    let name = OutputName::new(Path::new("card.txt"), &stat_only).unwrap();
    assert_eq!(name.stem(), "card_out_mdf_exp_stat_x");
    assert_eq!(OutputName::parse(&name.stem()).unwrap(), name);
}

#[test]
fn card_names_that_do_not_decode_are_refused() {
    let spec = FitSpec::new(FitMethod::MultiDimFit);
    for card in ["cards/card.v2.txt", "cards/multidimfit_study.txt"] {
        let target = FitTarget::for_card(card, &spec);
        let err = CombineCommandBuilder::new().build(&spec, &target).unwrap_err();
        assert!(matches!(err, Error::InvalidFitSpec(ref m) if m.contains("card name")), "{err}");
    }
}

#[test]
fn configuration_errors_come_before_commands() {
    let spec = FitSpec::new(FitMethod::MultiDimFit).with_pois(["r_a", "r_b"]);
    let err = CombineCommandBuilder::new().build(&spec, &target()).unwrap_err();
    assert!(matches!(err, Error::InvalidFitSpec(_)));
    assert!(err.is_configuration());

    let spec = FitSpec::new(FitMethod::Impacts).stat_only();
    assert!(CombineCommandBuilder::new().build(&spec, &target()).is_err());
}

/// Writes a non-empty file for every output a command is expected to leave.
struct FakeTool {
    empty_snapshot: bool,
    silent_workspace: bool,
    fail_on: Option<&'static str>,
    issued: Vec<String>,
}

impl FakeTool {
    fn new() -> Self {
        Self { empty_snapshot: false, silent_workspace: false, fail_on: None, issued: Vec::new() }
    }
}

impl CommandRunner for FakeTool {
    fn run(&mut self, command: &CommandSpec, workdir: &Path) -> Result<i32> {
        self.issued.push(command.to_shell());
        if let Some(flag) = self.fail_on
            && command.has_arg(flag)
        {
            return Ok(1);
        }
        if let Some(out) = &command.stdout {
            let quiet = self.silent_workspace && command.program == TEXT2WORKSPACE;
            std::fs::write(workdir.join(out), if quiet { "" } else { "log\n" })?;
        }
        if command.program == TEXT2WORKSPACE
            && let Some(ws) = command.arg_value("-o")
        {
            std::fs::write(workdir.join(ws), "workspace")?;
        }
        if command.has_arg("--saveWorkspace") {
            let name = command.arg_value("-n").unwrap_or_default();
            let file = OutputName::tool_output(name, "MultiDimFit", "125");
            let body = if self.empty_snapshot { "" } else { "snapshot" };
            std::fs::write(workdir.join(file), body)?;
        }
        Ok(0)
    }
}

/// Delegates to the real builder and counts phase-2 requests.
struct CountingPlan {
    inner: CombineCommandBuilder,
    phase2_calls: Cell<usize>,
}

impl CommandPlan for CountingPlan {
    fn workspace(&self, spec: &FitSpec, target: &FitTarget) -> Result<Stage> {
        self.inner.workspace(spec, target)
    }

    fn phase1(&self, spec: &FitSpec, target: &FitTarget) -> Result<Stage> {
        self.inner.phase1(spec, target)
    }

    fn phase2(&self, spec: &FitSpec, target: &FitTarget, snapshot: &Path) -> Result<Stage> {
        self.phase2_calls.set(self.phase2_calls.get() + 1);
        self.inner.phase2(spec, target, snapshot)
    }
}

fn counting_plan() -> CountingPlan {
    CountingPlan { inner: CombineCommandBuilder::new(), phase2_calls: Cell::new(0) }
}

#[test]
fn two_phase_run_reaches_phase_two() {
    let dir = tempfile::tempdir().unwrap();
    let plan = counting_plan();
    let mut tool = FakeTool::new();
    let spec = FitSpec::new(FitMethod::MultiDimFit).stat_only();

    let (run, parsed) = FitOrchestrator::new(&plan, &mut tool, dir.path())
        .run_and_parse(&spec, &target(), |run| Ok(run.name.stem()))
        .unwrap();
    assert_eq!(run.stage, FitStage::Parsed);
    assert_eq!(parsed, "combined_y2016_out_mdf_exp_stat");
    assert_eq!(run.executed.len(), 3);
    assert_eq!(plan.phase2_calls.get(), 1);
}

#[test]
fn empty_phase_one_output_halts_before_phase_two() {
    let dir = tempfile::tempdir().unwrap();
    let plan = counting_plan();
    let mut tool = FakeTool { empty_snapshot: true, ..FakeTool::new() };
    let spec = FitSpec::new(FitMethod::FitDiagnostics).stat_only();

    let err = FitOrchestrator::new(&plan, &mut tool, dir.path()).run(&spec, &target()).unwrap_err();
    match err {
        Error::FitExecution { command, reason } => {
            assert!(command.contains("--saveWorkspace"), "{command}");
            assert!(reason.contains("is empty"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(plan.phase2_calls.get(), 0);
    assert_eq!(tool.issued.len(), 2);
}

#[test]
fn non_zero_exit_carries_the_command() {
    let dir = tempfile::tempdir().unwrap();
    let plan = counting_plan();
    let mut tool = FakeTool { fail_on: Some("--saveWorkspace"), ..FakeTool::new() };
    let spec = FitSpec::new(FitMethod::Significance).stat_only();

    let err = FitOrchestrator::new(&plan, &mut tool, dir.path()).run(&spec, &target()).unwrap_err();
    let Error::FitExecution { command, reason } = err else { panic!("wrong error") };
    assert_eq!(&command, tool.issued.last().unwrap());
    assert_eq!(reason, "exit code 1");
    assert_eq!(plan.phase2_calls.get(), 0);
}

#[test]
fn existing_workspace_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("combined_y2016.root"), "ws").unwrap();
    let plan = counting_plan();
    let mut tool = FakeTool::new();
    let spec = FitSpec::new(FitMethod::Significance);

    let run = FitOrchestrator::new(&plan, &mut tool, dir.path())
        .reuse_workspace(true)
        .run(&spec, &target())
        .unwrap();
    assert_eq!(run.stage, FitStage::Phase1Done);
    assert_eq!(tool.issued.len(), 1);
    assert!(tool.issued[0].starts_with("combine -M Significance combined_y2016.root -m 125"));
}

#[test]
fn silent_workspace_build_is_accepted() {
    let spec = FitSpec::new(FitMethod::Significance);
    let stage = CombineCommandBuilder::new().workspace(&spec, &target()).unwrap();
    assert_eq!(stage.outputs, vec![PathBuf::from("combined_y2016.root")]);

    let dir = tempfile::tempdir().unwrap();
    let plan = counting_plan();
    let mut tool = FakeTool { silent_workspace: true, ..FakeTool::new() };
    let run = FitOrchestrator::new(&plan, &mut tool, dir.path()).run(&spec, &target()).unwrap();
    assert_eq!(run.stage, FitStage::Phase1Done);
    assert_eq!(std::fs::metadata(dir.path().join("combined_y2016.t2w.txt")).unwrap().len(), 0);
}
