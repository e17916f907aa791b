//! In-memory tracker double for tests and dry runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::entities::issue::Issue;
use crate::error::{Error, ErrorKind, Result};
use crate::{
  RemoteClient, ResponseMeta, ResponseObserver, SearchResults,
};

/// Scripted in-memory [RemoteClient]. Issues are registered up
/// front; searches answer from scripted (matcher, keys) pairs;
/// failures can be queued per key to exercise retry paths.
#[derive(Default)]
pub struct MockTrackerClient {
  issues: Mutex<IndexMap<String, Issue>>,
  /// (jql substring, matching keys), checked in insertion order.
  searches: Mutex<Vec<(String, Vec<String>)>>,
  failures: Mutex<IndexMap<String, VecDeque<ErrorKind>>>,
  get_calls: AtomicUsize,
  search_calls: AtomicUsize,
  observer: Mutex<Option<Arc<dyn ResponseObserver>>>,
}

impl MockTrackerClient {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert_issue(&self, issue: Issue) {
    self
      .issues
      .lock()
      .unwrap()
      .insert(issue.key.clone(), issue);
  }

  /// Any search whose JQL contains `matcher` returns these keys.
  pub fn script_search(
    &self,
    matcher: impl Into<String>,
    keys: impl IntoIterator<Item = impl Into<String>>,
  ) {
    self.searches.lock().unwrap().push((
      matcher.into(),
      keys.into_iter().map(Into::into).collect(),
    ));
  }

  /// Queue `times` failures of the given kind for one key.
  /// They are consumed before the issue resolves normally.
  pub fn fail_next(&self, key: &str, kind: ErrorKind, times: usize) {
    let mut failures = self.failures.lock().unwrap();
    let queue = failures.entry(key.to_string()).or_default();
    for _ in 0..times {
      queue.push_back(kind);
    }
  }

  pub fn set_observer(&self, observer: Arc<dyn ResponseObserver>) {
    *self.observer.lock().unwrap() = Some(observer);
  }

  pub fn get_calls(&self) -> usize {
    self.get_calls.load(Ordering::SeqCst)
  }

  pub fn search_calls(&self) -> usize {
    self.search_calls.load(Ordering::SeqCst)
  }

  fn observe(&self, meta: ResponseMeta) {
    if let Some(observer) = self.observer.lock().unwrap().as_ref() {
      observer.on_response(&meta);
    }
  }

  fn take_failure(&self, key: &str) -> Option<ErrorKind> {
    self
      .failures
      .lock()
      .unwrap()
      .get_mut(key)
      .and_then(VecDeque::pop_front)
  }
}

#[async_trait]
impl RemoteClient for MockTrackerClient {
  async fn get_issue(&self, key: &str) -> Result<Issue> {
    self.get_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(kind) = self.take_failure(key) {
      let meta = if kind == ErrorKind::RateLimited {
        ResponseMeta::throttled(None)
      } else {
        ResponseMeta {
          status: 500,
          ..Default::default()
        }
      };
      self.observe(meta);
      return Err(Error::new(
        kind,
        format!("Scripted {kind} failure for {key}"),
      ));
    }
    let issue = self.issues.lock().unwrap().get(key).cloned();
    match issue {
      Some(issue) => {
        self.observe(ResponseMeta::ok());
        Ok(issue)
      }
      None => {
        self.observe(ResponseMeta {
          status: 404,
          ..Default::default()
        });
        Err(Error::new(
          ErrorKind::NotFound,
          format!("Issue {key} does not exist"),
        ))
      }
    }
  }

  async fn search(
    &self,
    jql: &str,
    max_results: usize,
  ) -> Result<SearchResults> {
    self.search_calls.fetch_add(1, Ordering::SeqCst);
    self.observe(ResponseMeta::ok());
    let keys = self
      .searches
      .lock()
      .unwrap()
      .iter()
      .find(|(matcher, _)| jql.contains(matcher.as_str()))
      .map(|(_, keys)| keys.clone())
      .unwrap_or_default();
    let issues = self.issues.lock().unwrap();
    let matched: Vec<Issue> = keys
      .iter()
      .filter_map(|key| issues.get(key).cloned())
      .collect();
    let total = matched.len();
    Ok(SearchResults {
      total,
      issues: matched.into_iter().take(max_results).collect(),
    })
  }

  async fn count(&self, jql: &str) -> Result<usize> {
    self.search(jql, 0).await.map(|results| results.total)
  }
}
