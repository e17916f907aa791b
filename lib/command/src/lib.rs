//! Subprocess execution for the repository layer.
//!
//! Arguments are always passed explicitly, never through a shell,
//! so commit messages, issue summaries and paths need no quoting.
//! Failing to launch a process is an [Error]; a nonzero exit is
//! not, callers inspect the captured [ExecOutput].

use std::path::PathBuf;
use std::process::Stdio;

use ticketry_client::error::{Error, ErrorKind, Result};
use tokio::process::Command;
use tracing::trace;

/// Builder for one subprocess invocation.
#[derive(Debug, Clone)]
pub struct Exec {
  program: String,
  args: Vec<String>,
  cwd: Option<PathBuf>,
  env: Vec<(String, String)>,
}

impl Exec {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: None,
      env: Vec::new(),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cwd = Some(dir.into());
    self
  }

  /// Set a variable for the child only.
  pub fn env(
    mut self,
    key: impl Into<String>,
    value: impl Into<String>,
  ) -> Self {
    self.env.push((key.into(), value.into()));
    self
  }

  /// Run to completion, capturing both output streams.
  pub async fn output(self) -> Result<ExecOutput> {
    let mut cmd = Command::new(&self.program);
    cmd
      .args(&self.args)
      .kill_on_drop(true)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    for (key, value) in &self.env {
      cmd.env(key, value);
    }
    if let Some(dir) = &self.cwd {
      cmd.current_dir(dir);
    }
    trace!("exec: {} {:?}", self.program, self.args);
    let output = cmd.output().await.map_err(|e| {
      Error::new(
        ErrorKind::FilesystemError,
        format!("Failed to run '{}'", self.program),
      )
      .with_cause(e)
    })?;
    Ok(ExecOutput {
      code: output.status.code(),
      stdout: String::from_utf8_lossy(&output.stdout)
        .into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr)
        .into_owned(),
    })
  }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct ExecOutput {
  /// Exit code; `None` when the child died to a signal.
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl ExecOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }

  /// Fold a nonzero exit into the error taxonomy, carrying the
  /// child's stderr as the diagnostic.
  pub fn require_success(
    self,
    kind: ErrorKind,
    what: &str,
  ) -> Result<ExecOutput> {
    if self.success() {
      Ok(self)
    } else {
      Err(Error::new(
        kind,
        format!("{what} | {}", self.stderr.trim()),
      ))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn captures_stdout() {
    let out =
      Exec::new("echo").arg("hello").output().await.unwrap();
    assert!(out.success());
    assert_eq!(out.stdout.trim(), "hello");
  }

  #[tokio::test]
  async fn env_reaches_the_child_only() {
    let out = Exec::new("sh")
      .args(["-c", "echo $MARKER"])
      .env("MARKER", "present")
      .output()
      .await
      .unwrap();
    assert_eq!(out.stdout.trim(), "present");
    assert!(std::env::var("MARKER").is_err());
  }

  #[tokio::test]
  async fn missing_program_is_typed() {
    let err = Exec::new("definitely-not-a-real-binary")
      .output()
      .await
      .unwrap_err();
    assert_eq!(err.kind, ErrorKind::FilesystemError);
  }

  #[tokio::test]
  async fn nonzero_exit_folds_into_the_taxonomy() {
    let out = Exec::new("sh")
      .args(["-c", "echo oops >&2; exit 3"])
      .output()
      .await
      .unwrap();
    assert!(!out.success());
    assert_eq!(out.code, Some(3));
    let err = out
      .require_success(
        ErrorKind::GitOperationError,
        "scripted failure",
      )
      .unwrap_err();
    assert_eq!(err.kind, ErrorKind::GitOperationError);
    assert!(err.message.contains("oops"));
  }
}
