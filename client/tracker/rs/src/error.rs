use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure in the system is tagged with one of these kinds.
/// Callers branch on the kind, never on concrete source types.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
  InvalidInput,
  NotFound,
  AuthenticationFailed,
  RateLimited,
  TransientNetwork,
  RepositoryNotFound,
  DirtyWorkingTree,
  GitOperationError,
  FilesystemError,
  LinkCreationError,
  BrokenLink,
  SerializationError,
  StateCorrupt,
  Cancelled,
}

impl ErrorKind {
  /// Transient kinds are absorbed by the rate limiter's
  /// backoff contract and retried before they surface.
  pub fn is_transient(self) -> bool {
    matches!(self, ErrorKind::RateLimited | ErrorKind::TransientNetwork)
  }

  /// Fatal kinds abort the whole batch with partial results.
  pub fn is_fatal(self) -> bool {
    matches!(
      self,
      ErrorKind::AuthenticationFailed
        | ErrorKind::RepositoryNotFound
        | ErrorKind::DirtyWorkingTree
    )
  }
}

/// Tagged error value: a kind, a human message, an optional source,
/// and string context for machine consumers (eg. `retry_after_ms`).
#[derive(Debug, thiserror::Error)]
#[error("{kind} | {message}")]
pub struct Error {
  pub kind: ErrorKind,
  pub message: String,
  #[source]
  pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
  pub context: IndexMap<String, String>,
}

impl Error {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      cause: None,
      context: IndexMap::new(),
    }
  }

  pub fn with_cause(
    mut self,
    cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
  ) -> Self {
    self.cause = Some(cause.into());
    self
  }

  pub fn with_context(
    mut self,
    key: impl Into<String>,
    value: impl ToString,
  ) -> Self {
    self.context.insert(key.into(), value.to_string());
    self
  }

  pub fn is_transient(&self) -> bool {
    self.kind.is_transient()
  }

  pub fn is_fatal(&self) -> bool {
    self.kind.is_fatal()
  }

  /// Server-advertised retry delay, carried in context
  /// when the remote throttles a request.
  pub fn retry_after(&self) -> Option<Duration> {
    self
      .context
      .get("retry_after_ms")
      .and_then(|ms| ms.parse().ok())
      .map(Duration::from_millis)
  }
}

impl From<std::io::Error> for Error {
  fn from(e: std::io::Error) -> Self {
    Error::new(ErrorKind::FilesystemError, e.to_string()).with_cause(e)
  }
}
