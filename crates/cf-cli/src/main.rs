//! cardfit CLI

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::{Path, PathBuf};

use cf_core::{HistogramSource, JsonHistogramFile, JsonHistogramSink, LocalShell};
use cf_datacard::{DatacardWriter, materialize, plan_directory};
use cf_fit::{
    BatchTarget, CombineCommandBuilder, FitMethod, FitOrchestrator, FitRun, FitTarget, OutputName,
};
use cf_results::aggregate::PSD_TOLERANCE;
use cf_results::{
    Engine, JsonFitResults, PoiSelection, SignalStrengthAggregator, SignalStrengthSummary, VariableSummary,
    cross_check, parse_gof_statistic, parse_significance, read_batch, read_fit_log, read_signal_strength,
    weights_from_reference,
};

mod config;

use config::{AggregateConfig, ExecutionConfig, FitConfig, PipelineConfig, VariableConfig, read_config};

#[derive(Parser)]
#[command(name = "cardfit")]
#[command(about = "cardfit - datacards, combine fits and signal-strength summaries")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write one datacard per configured channel
    Datacards {
        /// Pipeline config (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Only write this channel
        #[arg(long)]
        channel: Option<String>,
    },

    /// Merge elementary cards into the configured combined cards
    CombineCards {
        /// Pipeline config (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Print the plan and its commands without running them
        #[arg(long)]
        dry_run: bool,

        /// Output file for the plan (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the command sequence of every configured fit
    Commands {
        /// Pipeline config (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the configured fits locally, or write (and submit) batch jobs
    Fit {
        /// Pipeline config (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Only run fits whose output stem contains this string
        #[arg(long)]
        only: Option<String>,

        /// Output file for the run report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Read the result of one fit
    Parse {
        /// Directory holding the fit outputs
        #[arg(long, default_value = "fits")]
        dir: PathBuf,

        /// Output stem, or any output file name derived from it
        #[arg(long)]
        name: String,

        /// POIs to read: "auto" or a comma-separated list
        #[arg(long, default_value = "auto")]
        pois: String,

        /// Read the text log or the structured fit-result object
        #[arg(long, value_enum, default_value = "text")]
        mode: ParseMode,

        /// Engine preference for structured reads (any, fit_diagnostics, multi_dim_fit)
        #[arg(long, default_value = "any", value_parser = parse_engine)]
        engine: Engine,

        /// Attach the POI correlation matrix (structured reads only)
        #[arg(long)]
        correlations: bool,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare the FitDiagnostics and MultiDimFit results of one fit
    CrossCheck {
        /// Directory holding the fit outputs
        #[arg(long, default_value = "fits")]
        dir: PathBuf,

        /// Output stem, or any output file name derived from it
        #[arg(long)]
        name: String,

        /// Comma-separated POIs; defaults to the POIs encoded in the name
        #[arg(long)]
        pois: Option<String>,

        /// Accepted absolute difference of central values
        #[arg(long, default_value = "0.01")]
        tolerance: f64,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build the signal-strength summary artifact
    Aggregate {
        /// Aggregation config (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ParseMode {
    Text,
    Structured,
}

fn parse_engine(s: &str) -> std::result::Result<Engine, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| format!("unknown engine '{s}' (expected any, fit_diagnostics or multi_dim_fit)"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Datacards { config, channel } => cmd_datacards(&config, channel.as_deref()),
        Commands::CombineCards { config, dry_run, output } => {
            cmd_combine_cards(&config, dry_run, output.as_ref())
        }
        Commands::Commands { config, output } => cmd_commands(&config, output.as_ref()),
        Commands::Fit { config, only, output } => cmd_fit(&config, only.as_deref(), output.as_ref()),
        Commands::Parse { dir, name, pois, mode, engine, correlations, output } => {
            cmd_parse(&dir, &name, &pois, mode, engine, correlations, output.as_ref())
        }
        Commands::CrossCheck { dir, name, pois, tolerance, output } => {
            cmd_cross_check(&dir, &name, pois.as_deref(), tolerance, output.as_ref())
        }
        Commands::Aggregate { config, output } => cmd_aggregate(&config, output.as_ref()),
        Commands::Version => {
            println!("cardfit {}", cf_core::VERSION);
            Ok(())
        }
    }
}

fn load_pipeline(path: &Path) -> Result<PipelineConfig> {
    tracing::info!(path = %path.display(), "loading pipeline config");
    let cfg: PipelineConfig = read_config(path)?;
    tracing::info!(
        channels = cfg.channels.len(),
        combinations = cfg.combinations.len(),
        fits = cfg.fits.len(),
        "pipeline config loaded"
    );
    Ok(cfg)
}

fn cmd_datacards(config: &Path, only: Option<&str>) -> Result<()> {
    let cfg = load_pipeline(config)?;
    let options = cfg.writer.options();
    let mut written = Vec::new();
    for channel in cfg.channels.iter().filter(|c| only.is_none_or(|o| o == c.name)) {
        let collection = channel
            .collection(cfg.histogram_file.as_deref())
            .with_context(|| format!("channel '{}'", channel.name))?;
        let writer = DatacardWriter::new(options.clone());
        let path = if cfg.copy_histograms {
            let source = JsonHistogramFile::open(collection.histogram_file())?;
            let sink = JsonHistogramSink::default();
            writer.with_histograms(&source, &sink).write(&collection, &cfg.cards_dir)?
        } else {
            writer.write(&collection, &cfg.cards_dir)?
        };
        tracing::info!(channel = %channel.name, path = %path.display(), "datacard written");
        written.push(path.display().to_string());
    }
    if let Some(name) = only
        && written.is_empty()
    {
        bail!("no channel named '{name}' in {}", config.display());
    }
    for path in written {
        println!("{path}");
    }
    Ok(())
}

fn cmd_combine_cards(config: &Path, dry_run: bool, output: Option<&PathBuf>) -> Result<()> {
    let cfg = load_pipeline(config)?;
    let plan = plan_directory(&cfg.cards_dir, &cfg.combinations)?;
    let commands: Vec<String> = plan.cards.iter().map(|c| c.command().to_shell()).collect();
    if dry_run {
        let value = json!({ "cards": plan.cards, "commands": commands });
        return write_json(output, value);
    }
    let outputs = materialize(&plan, &cfg.cards_dir, &mut LocalShell)?;
    tracing::info!(combined = outputs.len(), "combined cards written");
    let value = json!({
        "cards": plan.cards,
        "commands": commands,
        "outputs": outputs.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
    });
    write_json(output, value)
}

fn builder_for(cfg: &PipelineConfig, fit: &FitConfig) -> Result<CombineCommandBuilder> {
    Ok(match cfg.poi_mapping(fit)? {
        Some(map) => CombineCommandBuilder::with_poi_map(map),
        None => CombineCommandBuilder::new(),
    })
}

fn cmd_commands(config: &Path, output: Option<&PathBuf>) -> Result<()> {
    let cfg = load_pipeline(config)?;
    let mut fits = Vec::with_capacity(cfg.fits.len());
    for fit in &cfg.fits {
        let target = FitTarget::for_card(cfg.cards_dir.join(&fit.card), &fit.spec);
        let commands = builder_for(&cfg, fit)?.build(&fit.spec, &target)?;
        fits.push(json!({
            "stem": OutputName::new(&target.card, &fit.spec)?.stem(),
            "card": target.card.display().to_string(),
            "commands": commands.iter().map(|c| c.to_shell()).collect::<Vec<_>>(),
        }));
    }
    write_json(output, serde_json::Value::Array(fits))
}

/// Methods whose result is read back from the text log right after the run.
fn reads_text_log(method: FitMethod) -> bool {
    matches!(method, FitMethod::MultiDimFit | FitMethod::Significance | FitMethod::GoodnessOfFit)
}

fn text_outcome(dir: &Path, name: &OutputName, selection: &PoiSelection) -> cf_core::Result<serde_json::Value> {
    let log = dir.join(name.log_file());
    let origin = log.display().to_string();
    Ok(match name.method {
        FitMethod::Significance => {
            json!({ "significance": parse_significance(&std::fs::read_to_string(&log)?, &origin)? })
        }
        FitMethod::GoodnessOfFit => {
            json!({ "statistic": parse_gof_statistic(&std::fs::read_to_string(&log)?, &origin)? })
        }
        _ => serde_json::to_value(read_fit_log(&log, selection)?)?,
    })
}

fn cmd_fit(config: &Path, only: Option<&str>, output: Option<&PathBuf>) -> Result<()> {
    let cfg = load_pipeline(config)?;
    std::fs::create_dir_all(&cfg.fit_dir)?;
    let workdir = std::path::absolute(&cfg.fit_dir)?;
    let cards_dir = std::path::absolute(&cfg.cards_dir)?;
    let mut shell = LocalShell;
    let mut report = Vec::new();

    for fit in &cfg.fits {
        let target = FitTarget::for_card(cards_dir.join(&fit.card), &fit.spec);
        let stem = OutputName::new(&target.card, &fit.spec)?.stem();
        if only.is_some_and(|o| !stem.contains(o)) {
            continue;
        }
        let builder = builder_for(&cfg, fit)?;

        match &cfg.execution {
            ExecutionConfig::Local { reuse_workspace } => {
                tracing::info!(stem = %stem, "running fit");
                let mut orchestrator =
                    FitOrchestrator::new(&builder, &mut shell, &workdir).reuse_workspace(*reuse_workspace);
                let (run, result) = if reads_text_log(fit.spec.method) {
                    let selection = PoiSelection::named(fit.spec.pois.iter().cloned());
                    orchestrator
                        .run_and_parse(&fit.spec, &target, |run: &FitRun| {
                            text_outcome(&run.workdir, &run.name, &selection)
                        })
                        .with_context(|| format!("fit {stem}"))?
                } else {
                    let run = orchestrator.run(&fit.spec, &target).with_context(|| format!("fit {stem}"))?;
                    (run, serde_json::Value::Null)
                };
                tracing::info!(stem = %stem, stage = %run.stage, commands = run.executed.len(), "fit done");
                report.push(json!({
                    "stem": stem,
                    "stage": run.stage.to_string(),
                    "commands": run.executed,
                    "result": result,
                }));
            }
            ExecutionConfig::Batch { scheduler, resources, jobs_dir, submit } => {
                let batch = BatchTarget::new(*scheduler, resources.clone(), std::path::absolute(jobs_dir)?);
                let job = batch.prepare(&builder, &fit.spec, &target, &workdir)?;
                if *submit {
                    batch.submit(&job, &mut shell).with_context(|| format!("submitting {stem}"))?;
                }
                report.push(json!({
                    "stem": stem,
                    "job_dir": job.dir.display().to_string(),
                    "script": job.script.display().to_string(),
                    "submitted": submit,
                }));
            }
        }
    }

    if let Some(o) = only
        && report.is_empty()
    {
        bail!("no configured fit matches '{o}'");
    }
    write_json(output, serde_json::Value::Array(report))
}

fn cmd_parse(
    dir: &Path,
    name: &str,
    pois: &str,
    mode: ParseMode,
    engine: Engine,
    correlations: bool,
    output: Option<&PathBuf>,
) -> Result<()> {
    let output_name = OutputName::parse(name)?;
    let selection = PoiSelection::parse(pois);
    let result = match mode {
        ParseMode::Text => text_outcome(dir, &output_name, &selection)?,
        ParseMode::Structured => {
            let pois = match selection {
                PoiSelection::Auto => output_name.pois.clone(),
                PoiSelection::Named(list) => list,
            };
            let result =
                read_signal_strength(&JsonFitResults, dir, &output_name, &pois, engine, correlations)?;
            serde_json::to_value(result)?
        }
    };
    tracing::info!(stem = %output_name.stem(), "fit result read");
    write_json(output, json!({ "stem": output_name.stem(), "result": result }))
}

fn cmd_cross_check(
    dir: &Path,
    name: &str,
    pois: Option<&str>,
    tolerance: f64,
    output: Option<&PathBuf>,
) -> Result<()> {
    let output_name = OutputName::parse(name)?;
    let pois: Vec<String> = match pois {
        Some(list) => list.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect(),
        None => output_name.pois.clone(),
    };
    let cmp = cross_check(&JsonFitResults, dir, &output_name, &pois, tolerance)?;
    tracing::info!(consistent = cmp.is_consistent(), "engine cross-check done");
    write_json(output, json!({ "consistent": cmp.is_consistent(), "comparison": cmp }))
}

fn read_variable(
    cfg: &AggregateConfig,
    aggregator: &SignalStrengthAggregator,
    variable: &VariableConfig,
) -> Result<VariableSummary> {
    match variable {
        VariableConfig::Fit { pois, stat, total, .. } => {
            let read = |name: &str| -> Result<cf_core::FitResult> {
                let name = OutputName::parse(name)?;
                Ok(read_signal_strength(&JsonFitResults, &cfg.fit_dir, &name, pois, cfg.engine, true)?)
            };
            let statistical = read(stat)?;
            let total = read(total)?;
            Ok(VariableSummary::from_fits(aggregator, &statistical, &total)?)
        }
        VariableConfig::Bins { poi, weights, reference, stat, total, .. } => {
            let weights = match (weights, reference) {
                (Some(w), None) => w.clone(),
                (None, Some(r)) => {
                    let file = JsonHistogramFile::open(&r.file)?;
                    let hist = file
                        .histogram(&r.histogram)?
                        .with_context(|| format!("no histogram '{}' in {}", r.histogram, r.file.display()))?;
                    weights_from_reference(&hist)?
                }
                _ => bail!("exactly one of 'weights' and 'reference' must be given"),
            };
            let pois = vec![poi.clone()];
            let read_all = |names: &[String]| -> Result<Vec<cf_core::FitResult>> {
                let names = names.iter().map(|n| OutputName::parse(n)).collect::<cf_core::Result<Vec<_>>>()?;
                let mut batch = read_batch(&names, |n| {
                    read_signal_strength(&JsonFitResults, &cfg.fit_dir, n, &pois, cfg.engine, false)
                });
                if !batch.failures.is_empty() {
                    let stems: Vec<&str> = batch.failures.iter().map(|(s, _)| s.as_str()).collect();
                    bail!("{} bin(s) unreadable: {}", stems.len(), stems.join(", "));
                }
                names
                    .iter()
                    .map(|n| batch.results.remove(&n.stem()).with_context(|| format!("duplicate bin {}", n.stem())))
                    .collect()
            };
            let statistical = read_all(stat)?;
            let total = read_all(total)?;
            Ok(VariableSummary::from_bins(aggregator, poi, &statistical, &total, &weights)?)
        }
    }
}

fn cmd_aggregate(config: &Path, output: Option<&PathBuf>) -> Result<()> {
    tracing::info!(path = %config.display(), "loading aggregation config");
    let cfg: AggregateConfig = read_config(config)?;
    let aggregator = SignalStrengthAggregator::new(cfg.weight_tolerance, PSD_TOLERANCE);

    let mut summary = SignalStrengthSummary::new();
    for variable in &cfg.variables {
        match read_variable(&cfg, &aggregator, variable) {
            Ok(v) => summary.insert(variable.name(), v),
            Err(e) => tracing::warn!(variable = variable.name(), error = %format!("{e:#}"), "skipping variable"),
        }
    }
    if summary.is_empty() && !cfg.variables.is_empty() {
        bail!("none of the {} variables could be aggregated", cfg.variables.len());
    }
    if summary.is_provisional() {
        tracing::warn!("summary contains provisional variables");
    }
    tracing::info!(variables = summary.len(), "summary built");

    match output {
        Some(path) => summary.write(path)?,
        None => println!("{}", summary.to_json()?),
    }
    Ok(())
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
