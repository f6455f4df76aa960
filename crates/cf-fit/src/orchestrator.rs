//! Sequencing of one fit: workspace → phase 1 → (phase 2) → parse.
//!
//! The two-phase branch lives here and nowhere else. Phase 2 commands are
//! only requested from the plan once the phase-1 snapshot has been checked
//! on disk.

use std::fmt;
use std::path::{Path, PathBuf};

use cf_core::{CommandRunner, Error, Result};

use crate::builder::{CommandPlan, FitTarget, Stage};
use crate::naming::OutputName;
use crate::spec::FitSpec;

/// Progress of one fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FitStage {
    /// Nothing issued yet
    Pending,
    /// Workspace exists
    WorkspaceBuilt,
    /// Main fit (or snapshot fit) finished
    Phase1Done,
    /// Frozen-nuisance fit finished
    Phase2Done,
    /// Outputs read back
    Parsed,
}

impl FitStage {
    /// Legal successor of `self`.
    pub fn next(self, two_phase: bool) -> Option<FitStage> {
        match self {
            FitStage::Pending => Some(FitStage::WorkspaceBuilt),
            FitStage::WorkspaceBuilt => Some(FitStage::Phase1Done),
            FitStage::Phase1Done if two_phase => Some(FitStage::Phase2Done),
            FitStage::Phase1Done | FitStage::Phase2Done => Some(FitStage::Parsed),
            FitStage::Parsed => None,
        }
    }

    /// Whether a fit can stop here and be read back.
    pub fn is_complete(self, two_phase: bool) -> bool {
        match self {
            FitStage::Phase1Done => !two_phase,
            FitStage::Phase2Done | FitStage::Parsed => true,
            _ => false,
        }
    }

    fn advance(&mut self, to: FitStage, two_phase: bool) -> Result<()> {
        if self.next(two_phase) != Some(to) {
            return Err(Error::Validation(format!("illegal fit transition {self} -> {to}")));
        }
        *self = to;
        Ok(())
    }
}

impl fmt::Display for FitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FitStage::Pending => "pending",
            FitStage::WorkspaceBuilt => "workspace-built",
            FitStage::Phase1Done => "phase1-done",
            FitStage::Phase2Done => "phase2-done",
            FitStage::Parsed => "parsed",
        };
        f.write_str(s)
    }
}

/// Record of a finished (or stopped) fit.
#[derive(Debug, Clone)]
pub struct FitRun {
    /// Output identity
    pub name: OutputName,
    /// Last stage reached
    pub stage: FitStage,
    /// Shell form of every command issued, in order
    pub executed: Vec<String>,
    /// Working directory all outputs are relative to
    pub workdir: PathBuf,
}

/// Runs a [`CommandPlan`] through a [`CommandRunner`], one command at a time.
pub struct FitOrchestrator<'a, P: CommandPlan + ?Sized, R: CommandRunner + ?Sized> {
    plan: &'a P,
    runner: &'a mut R,
    workdir: PathBuf,
    reuse_workspace: bool,
}

impl<'a, P: CommandPlan + ?Sized, R: CommandRunner + ?Sized> FitOrchestrator<'a, P, R> {
    /// Orchestrator issuing commands in `workdir`.
    pub fn new(plan: &'a P, runner: &'a mut R, workdir: impl Into<PathBuf>) -> Self {
        Self { plan, runner, workdir: workdir.into(), reuse_workspace: false }
    }

    /// Skip the workspace build when a non-empty workspace already exists.
    pub fn reuse_workspace(mut self, yes: bool) -> Self {
        self.reuse_workspace = yes;
        self
    }

    /// Run every phase of `spec`. Stops at the first failing command.
    pub fn run(&mut self, spec: &FitSpec, target: &FitTarget) -> Result<FitRun> {
        spec.validate()?;
        let two_phase = spec.is_two_phase();
        let mut run = FitRun {
            name: OutputName::new(&target.card, spec)?,
            stage: FitStage::Pending,
            executed: Vec::new(),
            workdir: self.workdir.clone(),
        };

        let ws = self.workdir.join(&target.workspace);
        if self.reuse_workspace && non_empty(&ws) {
            log::info!("reusing workspace {}", ws.display());
        } else {
            let stage = self.plan.workspace(spec, target)?;
            self.execute(&stage, &mut run)?;
        }
        run.stage.advance(FitStage::WorkspaceBuilt, two_phase)?;

        let phase1 = self.plan.phase1(spec, target)?;
        self.execute(&phase1, &mut run)?;
        run.stage.advance(FitStage::Phase1Done, two_phase)?;

        if two_phase {
            let snapshot = phase1.snapshot.as_deref().ok_or_else(|| Error::FitExecution {
                command: last_command(&phase1),
                reason: "two-phase fit produced no snapshot".into(),
            })?;
            self.check_output(&phase1, snapshot)?;
            let phase2 = self.plan.phase2(spec, target, snapshot)?;
            self.execute(&phase2, &mut run)?;
            run.stage.advance(FitStage::Phase2Done, two_phase)?;
        }

        log::info!("fit {} finished ({} commands)", run.name.stem(), run.executed.len());
        Ok(run)
    }

    /// [`run`](Self::run), then read the outputs back with `parse`.
    pub fn run_and_parse<T, F>(
        &mut self,
        spec: &FitSpec,
        target: &FitTarget,
        parse: F,
    ) -> Result<(FitRun, T)>
    where
        F: FnOnce(&FitRun) -> Result<T>,
    {
        let mut run = self.run(spec, target)?;
        let parsed = parse(&run)?;
        run.stage.advance(FitStage::Parsed, spec.is_two_phase())?;
        Ok((run, parsed))
    }

    fn execute(&mut self, stage: &Stage, run: &mut FitRun) -> Result<()> {
        for cmd in &stage.commands {
            let line = cmd.to_shell();
            log::debug!("[{}] {line}", run.stage);
            let code = self.runner.run(cmd, &self.workdir).map_err(|e| Error::FitExecution {
                command: line.clone(),
                reason: e.to_string(),
            })?;
            run.executed.push(line.clone());
            if code != 0 {
                return Err(Error::FitExecution { command: line, reason: format!("exit code {code}") });
            }
        }
        for out in &stage.outputs {
            self.check_output(stage, out)?;
        }
        Ok(())
    }

    fn check_output(&self, stage: &Stage, out: &Path) -> Result<()> {
        let path = self.workdir.join(out);
        if non_empty(&path) {
            return Ok(());
        }
        let reason = if path.exists() { "is empty" } else { "was not written" };
        Err(Error::FitExecution {
            command: last_command(stage),
            reason: format!("output {} {reason}", out.display()),
        })
    }
}

fn non_empty(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

fn last_command(stage: &Stage) -> String {
    stage.commands.last().map(|c| c.to_shell()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let mut s = FitStage::Pending;
        s.advance(FitStage::WorkspaceBuilt, false).unwrap();
        s.advance(FitStage::Phase1Done, false).unwrap();
        assert!(s.is_complete(false));
        assert!(s.advance(FitStage::Phase2Done, false).is_err());
        s.advance(FitStage::Parsed, false).unwrap();
        assert_eq!(s.next(false), None);

        let mut s = FitStage::Phase1Done;
        assert!(!s.is_complete(true));
        let mut probe = s;
        assert!(probe.advance(FitStage::Parsed, true).is_err());
        s.advance(FitStage::Phase2Done, true).unwrap();
        assert!(s.is_complete(true));
    }

    #[test]
    fn test_no_skipping() {
        let mut s = FitStage::Pending;
        assert!(matches!(s.advance(FitStage::Phase1Done, false), Err(Error::Validation(_))));
        assert_eq!(s, FitStage::Pending);
    }
}
