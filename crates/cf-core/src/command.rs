//! Typed external commands and the local shell runner.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::Result;

/// One external tool invocation.
///
/// `argv()` is the argument-list form; `to_shell()` is the single
/// serialization used for logs, scripts and local execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable name
    pub program: String,
    /// Arguments, unquoted
    pub args: Vec<String>,
    /// File receiving stdout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<PathBuf>,
    /// File receiving stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<PathBuf>,
}

impl CommandSpec {
    /// Command with no arguments and no redirection.
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new(), stdout: None, stderr: None }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Send both stdout and stderr to `path`.
    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.stdout = Some(path.clone());
        self.stderr = Some(path);
        self
    }

    /// Send stdout and stderr to separate files.
    pub fn redirect(mut self, stdout: impl Into<PathBuf>, stderr: impl Into<PathBuf>) -> Self {
        self.stdout = Some(stdout.into());
        self.stderr = Some(stderr.into());
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone()).chain(self.args.iter().cloned()).collect()
    }

    /// Whether `flag` appears as an argument.
    pub fn has_arg(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Argument following `flag`, if present.
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        let i = self.args.iter().position(|a| a == flag)?;
        self.args.get(i + 1).map(String::as_str)
    }

    /// POSIX shell form, including `> out 2> err` redirection.
    pub fn to_shell(&self) -> String {
        let mut s = self.argv().iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ");
        if let Some(out) = &self.stdout {
            s.push_str(" > ");
            s.push_str(&shell_quote(&out.display().to_string()));
        }
        if let Some(err) = &self.stderr {
            s.push_str(" 2> ");
            s.push_str(&shell_quote(&err.display().to_string()));
        }
        s
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell())
    }
}

/// Quote `s` for `sh` unless it only contains unambiguous characters.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || "_-./=,:+@%".contains(c));
    if safe { s.to_string() } else { format!("'{}'", s.replace('\'', r"'\''")) }
}

/// Runs commands to completion. Implementations may be mocks.
pub trait CommandRunner {
    /// Run `command` with `workdir` as current directory; returns the exit code.
    fn run(&mut self, command: &CommandSpec, workdir: &Path) -> Result<i32>;
}

/// Synchronous execution through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct LocalShell;

impl CommandRunner for LocalShell {
    fn run(&mut self, command: &CommandSpec, workdir: &Path) -> Result<i32> {
        let line = command.to_shell();
        log::info!("running: {line}");
        let status = Command::new("sh").arg("-c").arg(&line).current_dir(workdir).status()?;
        // Killed by a signal: no exit code.
        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_form() {
        let cmd = CommandSpec::new("text2workspace.py")
            .arg("card.txt")
            .args(["-P", "HiggsAnalysis.CombinedLimit.PhysicsModel:multiSignalModel"])
            .args(["--PO", "map=.*/TTW:r_TTW[1,0,3]"])
            .log_to("t2w.txt");
        assert_eq!(
            cmd.to_shell(),
            "text2workspace.py card.txt -P HiggsAnalysis.CombinedLimit.PhysicsModel:multiSignalModel \
             --PO 'map=.*/TTW:r_TTW[1,0,3]' > t2w.txt 2> t2w.txt"
        );
        assert_eq!(cmd.arg_value("--PO"), Some("map=.*/TTW:r_TTW[1,0,3]"));
        assert_eq!(cmd.argv()[0], "text2workspace.py");
    }

    #[test]
    fn test_quote_escapes_single_quote() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("-t"), "-t");
    }

    #[test]
    fn test_local_shell_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut sh = LocalShell;
        let ok = CommandSpec::new("echo").arg("hello").log_to("out.txt");
        assert_eq!(sh.run(&ok, dir.path()).unwrap(), 0);
        let text = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(text.trim(), "hello");

        let bad = CommandSpec::new("false");
        assert_ne!(sh.run(&bad, dir.path()).unwrap(), 0);
    }
}
