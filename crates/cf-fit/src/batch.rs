//! Batch execution target.
//!
//! Emits a job directory per fit (shell script plus scheduler descriptor)
//! and optionally submits it. Nothing here waits for the job. Inside the
//! script every stage is followed by `test -s` guards on its outputs, so
//! with `set -e` phase 2 never starts unless the snapshot is non-empty.

use std::fs;
use std::path::{Path, PathBuf};

use cf_core::command::shell_quote;
use cf_core::{CommandRunner, CommandSpec, Error, Result};
use serde::{Deserialize, Serialize};

use crate::builder::{CommandPlan, FitTarget, Stage};
use crate::naming::OutputName;
use crate::spec::FitSpec;

/// Script file name inside a job directory.
pub const SCRIPT_NAME: &str = "run.sh";

/// Queue flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scheduler {
    /// HTCondor (`condor_submit job.sub`)
    #[default]
    Condor,
    /// Slurm (`sbatch job.sbatch`)
    Slurm,
}

impl Scheduler {
    /// Descriptor file name.
    pub fn descriptor_name(&self) -> &'static str {
        match self {
            Scheduler::Condor => "job.sub",
            Scheduler::Slurm => "job.sbatch",
        }
    }

    /// Submission program.
    pub fn submit_program(&self) -> &'static str {
        match self {
            Scheduler::Condor => "condor_submit",
            Scheduler::Slurm => "sbatch",
        }
    }
}

/// Resources requested per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchResources {
    /// CPUs per job
    pub cpus: u32,
    /// Memory in MB
    pub memory_mb: u32,
    /// Wall-time limit (`HH:MM:SS`)
    pub wall_time: String,
    /// Queue, partition or job flavour
    pub queue: Option<String>,
}

impl Default for BatchResources {
    fn default() -> Self {
        Self { cpus: 1, memory_mb: 2000, wall_time: "02:00:00".to_string(), queue: None }
    }
}

/// Files of one prepared job.
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Job directory
    pub dir: PathBuf,
    /// Shell script
    pub script: PathBuf,
    /// Scheduler descriptor
    pub descriptor: PathBuf,
    /// Submission command, run from `dir`
    pub submit: CommandSpec,
    /// Commands inside the script, in order
    pub commands: Vec<CommandSpec>,
}

/// Writes job directories under `jobs_dir`.
#[derive(Debug, Clone)]
pub struct BatchTarget {
    scheduler: Scheduler,
    resources: BatchResources,
    jobs_dir: PathBuf,
}

impl BatchTarget {
    /// Target writing job directories under `jobs_dir`.
    pub fn new(scheduler: Scheduler, resources: BatchResources, jobs_dir: impl Into<PathBuf>) -> Self {
        Self { scheduler, resources, jobs_dir: jobs_dir.into() }
    }

    /// Write script and descriptor for `spec`. Commands run in `workdir`.
    pub fn prepare<P: CommandPlan + ?Sized>(
        &self,
        plan: &P,
        spec: &FitSpec,
        target: &FitTarget,
        workdir: &Path,
    ) -> Result<BatchJob> {
        spec.validate()?;
        let name = OutputName::new(&target.card, spec)?;
        let stem = name.stem();

        let mut stages = vec![plan.workspace(spec, target)?];
        let phase1 = plan.phase1(spec, target)?;
        let snapshot = phase1.snapshot.clone();
        stages.push(phase1);
        if spec.is_two_phase() {
            let snapshot = snapshot.ok_or_else(|| {
                Error::InvalidFitSpec(format!("{stem}: two-phase plan has no snapshot"))
            })?;
            stages.push(plan.phase2(spec, target, &snapshot)?);
        }

        let dir = self.jobs_dir.join(&stem);
        fs::create_dir_all(&dir)?;
        let script = dir.join(SCRIPT_NAME);
        fs::write(&script, render_script(&stages, workdir))?;
        make_executable(&script)?;

        let descriptor = dir.join(self.scheduler.descriptor_name());
        fs::write(&descriptor, self.render_descriptor(&stem))?;

        let submit = CommandSpec::new(self.scheduler.submit_program())
            .arg(self.scheduler.descriptor_name())
            .log_to("submit.txt");
        let commands = stages.into_iter().flat_map(|s| s.commands).collect();
        log::info!("prepared batch job {}", dir.display());
        Ok(BatchJob { dir, script, descriptor, submit, commands })
    }

    /// Hand `job` to the scheduler. Returns once the submission is accepted.
    pub fn submit<R: CommandRunner + ?Sized>(&self, job: &BatchJob, runner: &mut R) -> Result<()> {
        let code = runner.run(&job.submit, &job.dir)?;
        if code != 0 {
            return Err(Error::FitExecution {
                command: job.submit.to_shell(),
                reason: format!("submission failed with exit code {code}"),
            });
        }
        log::info!("submitted {}", job.dir.display());
        Ok(())
    }

    /// Scheduler descriptor text.
    pub fn render_descriptor(&self, job_name: &str) -> String {
        let r = &self.resources;
        match self.scheduler {
            Scheduler::Condor => {
                let mut s = String::new();
                s.push_str("universe       = vanilla\n");
                s.push_str(&format!("executable     = {SCRIPT_NAME}\n"));
                s.push_str("output         = job.out\n");
                s.push_str("error          = job.err\n");
                s.push_str("log            = job.log\n");
                s.push_str(&format!("request_cpus   = {}\n", r.cpus));
                s.push_str(&format!("request_memory = {}\n", r.memory_mb));
                if let Some(q) = &r.queue {
                    s.push_str(&format!("+JobFlavour    = \"{q}\"\n"));
                }
                s.push_str(&format!("batch_name     = {job_name}\n"));
                s.push_str("queue 1\n");
                s
            }
            Scheduler::Slurm => {
                let mut s = String::from("#!/bin/sh\n");
                s.push_str(&format!("#SBATCH --job-name={job_name}\n"));
                s.push_str("#SBATCH --output=job.out\n");
                s.push_str("#SBATCH --error=job.err\n");
                s.push_str(&format!("#SBATCH --cpus-per-task={}\n", r.cpus));
                s.push_str(&format!("#SBATCH --mem={}M\n", r.memory_mb));
                s.push_str(&format!("#SBATCH --time={}\n", r.wall_time));
                if let Some(q) = &r.queue {
                    s.push_str(&format!("#SBATCH --partition={q}\n"));
                }
                s.push_str(&format!("sh {SCRIPT_NAME}\n"));
                s
            }
        }
    }
}

/// `#!/bin/sh` script running every stage with output guards.
pub fn render_script(stages: &[Stage], workdir: &Path) -> String {
    let mut s = String::from("#!/bin/sh\nset -e\n");
    s.push_str(&format!("cd {}\n", shell_quote(&workdir.display().to_string())));
    for stage in stages {
        for cmd in &stage.commands {
            s.push_str(&cmd.to_shell());
            s.push('\n');
        }
        for out in &stage.outputs {
            s.push_str(&format!("test -s {}\n", shell_quote(&out.display().to_string())));
        }
    }
    s
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
