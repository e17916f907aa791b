//! Shared entities, tagged errors, and the remote tracker client.
//!
//! Everything that crosses a crate boundary in Ticketry lives here:
//! the issue / state / profile data model, the error taxonomy, and
//! the [RemoteClient] capability set with its production HTTP
//! implementation and in-memory test double.

use std::time::Duration;

use async_trait::async_trait;

pub mod entities;
pub mod error;
pub mod mock;

mod http;
mod parse;

pub use http::HttpTrackerClient;

use entities::issue::Issue;
use error::Result;

/// Capability set over the remote ticket tracker.
///
/// Implementations signal `not_found` vs transient failures through
/// the error kind; they never panic on malformed remote data.
#[async_trait]
pub trait RemoteClient: Send + Sync {
  /// Fetch a single issue by key.
  async fn get_issue(&self, key: &str) -> Result<Issue>;

  /// Run a query in the remote dialect, returning at most
  /// `max_results` issues plus the total match count.
  async fn search(
    &self,
    jql: &str,
    max_results: usize,
  ) -> Result<SearchResults>;

  /// Total match count for a query, without fetching issues.
  async fn count(&self, jql: &str) -> Result<usize>;
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
  pub total: usize,
  pub issues: Vec<Issue>,
}

/// What the rate limiter needs to know about one remote response.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseMeta {
  pub status: u16,
  /// Server-advertised delay before the next attempt.
  pub retry_after: Option<Duration>,
  /// Requests left in the current quota window.
  pub quota_remaining: Option<u64>,
  /// Time until the quota window resets.
  pub quota_reset_in: Option<Duration>,
}

impl ResponseMeta {
  pub fn ok() -> Self {
    Self {
      status: 200,
      ..Default::default()
    }
  }

  pub fn throttled(retry_after: Option<Duration>) -> Self {
    Self {
      status: 429,
      retry_after,
      ..Default::default()
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn is_throttled(&self) -> bool {
    self.status == 429 || self.status == 503
  }
}

/// Observes every remote response, success or failure.
/// The rate limiter implements this to track backoff and quota.
pub trait ResponseObserver: Send + Sync {
  fn on_response(&self, meta: &ResponseMeta);
}
