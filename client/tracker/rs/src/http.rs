use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::entities::issue::Issue;
use crate::error::{Error, ErrorKind, Result};
use crate::parse::{DEFAULT_EPIC_FIELD, issue_from_remote};
use crate::{
  RemoteClient, ResponseMeta, ResponseObserver, SearchResults,
};

/// Search pages are fetched in chunks of this size.
const SEARCH_PAGE_SIZE: usize = 50;

/// Production tracker client over the REST API, basic auth.
pub struct HttpTrackerClient {
  client: reqwest::Client,
  base_url: String,
  email: String,
  api_token: String,
  epic_field: String,
  observer: Option<Arc<dyn ResponseObserver>>,
}

impl HttpTrackerClient {
  pub fn new(
    base_url: impl Into<String>,
    email: impl Into<String>,
    api_token: impl Into<String>,
  ) -> Self {
    let base_url = base_url.into();
    Self {
      client: reqwest::Client::new(),
      base_url: base_url.trim_end_matches('/').to_string(),
      email: email.into(),
      api_token: api_token.into(),
      epic_field: DEFAULT_EPIC_FIELD.to_string(),
      observer: None,
    }
  }

  /// Override the custom field carrying the epic link.
  pub fn with_epic_field(mut self, field: impl Into<String>) -> Self {
    self.epic_field = field.into();
    self
  }

  /// Report every response to the given observer
  /// (the rate limiter, in production wiring).
  pub fn with_observer(
    mut self,
    observer: Arc<dyn ResponseObserver>,
  ) -> Self {
    self.observer = Some(observer);
    self
  }

  fn observe(&self, meta: &ResponseMeta) {
    if let Some(observer) = &self.observer {
      observer.on_response(meta);
    }
  }

  async fn get_json(&self, url: String) -> Result<Value> {
    let resp = self
      .client
      .get(&url)
      .basic_auth(&self.email, Some(&self.api_token))
      .send()
      .await
      .map_err(|e| self.transport_error(e))?;
    self.handle(resp).await
  }

  async fn post_json(
    &self,
    url: String,
    body: Value,
  ) -> Result<Value> {
    let resp = self
      .client
      .post(&url)
      .basic_auth(&self.email, Some(&self.api_token))
      .json(&body)
      .send()
      .await
      .map_err(|e| self.transport_error(e))?;
    self.handle(resp).await
  }

  /// Failures with no response at all still reach the observer,
  /// reported as status 0.
  fn transport_error(&self, e: reqwest::Error) -> Error {
    self.observe(&ResponseMeta {
      status: 0,
      ..Default::default()
    });
    Error::new(
      ErrorKind::TransientNetwork,
      format!("Remote request failed: {e}"),
    )
    .with_cause(e)
  }

  async fn handle(&self, resp: reqwest::Response) -> Result<Value> {
    let meta = response_meta(&resp);
    self.observe(&meta);
    let status = resp.status();
    if status.is_success() {
      return resp.json().await.map_err(|e| {
        Error::new(
          ErrorKind::SerializationError,
          "Failed to decode remote response body",
        )
        .with_cause(e)
      });
    }
    let body = resp.text().await.unwrap_or_default();
    Err(status_error(status.as_u16(), &meta, body))
  }

  async fn search_page(
    &self,
    jql: &str,
    start_at: usize,
    max_results: usize,
  ) -> Result<(usize, Vec<Issue>)> {
    let body = json!({
      "jql": jql,
      "startAt": start_at,
      "maxResults": max_results,
    });
    let payload = self
      .post_json(format!("{}/rest/api/2/search", self.base_url), body)
      .await?;
    let total = payload["total"].as_u64().unwrap_or(0) as usize;
    let issues = payload["issues"]
      .as_array()
      .map(|issues| {
        issues
          .iter()
          .filter_map(|issue| {
            issue_from_remote(issue, &self.epic_field).ok()
          })
          .collect()
      })
      .unwrap_or_default();
    Ok((total, issues))
  }
}

#[async_trait]
impl RemoteClient for HttpTrackerClient {
  async fn get_issue(&self, key: &str) -> Result<Issue> {
    let payload = self
      .get_json(format!(
        "{}/rest/api/2/issue/{}",
        self.base_url,
        urlencoding::encode(key)
      ))
      .await
      .map_err(|e| match e.kind {
        ErrorKind::NotFound => Error::new(
          ErrorKind::NotFound,
          format!("Issue {key} does not exist"),
        ),
        _ => e,
      })?;
    issue_from_remote(&payload, &self.epic_field)
  }

  async fn search(
    &self,
    jql: &str,
    max_results: usize,
  ) -> Result<SearchResults> {
    let mut issues = Vec::new();
    let mut total = 0;
    while issues.len() < max_results {
      let page_size =
        SEARCH_PAGE_SIZE.min(max_results - issues.len());
      let (page_total, page) =
        self.search_page(jql, issues.len(), page_size).await?;
      total = page_total;
      let fetched = page.len();
      issues.extend(page);
      if fetched == 0 || issues.len() >= total {
        break;
      }
    }
    Ok(SearchResults { total, issues })
  }

  async fn count(&self, jql: &str) -> Result<usize> {
    let (total, _) = self.search_page(jql, 0, 0).await?;
    Ok(total)
  }
}

fn status_error(
  status: u16,
  meta: &ResponseMeta,
  body: String,
) -> Error {
  let message = remote_error_message(&body)
    .unwrap_or_else(|| format!("Remote returned status {status}"));
  match status {
    401 | 403 => {
      Error::new(ErrorKind::AuthenticationFailed, message)
    }
    404 => Error::new(ErrorKind::NotFound, message),
    429 | 503 => {
      let mut e = Error::new(ErrorKind::RateLimited, message);
      if let Some(retry_after) = meta.retry_after {
        e = e.with_context(
          "retry_after_ms",
          retry_after.as_millis(),
        );
      }
      e
    }
    400 => Error::new(ErrorKind::InvalidInput, message),
    _ => Error::new(ErrorKind::TransientNetwork, message),
  }
}

/// The tracker reports failures as `errorMessages: [..]`.
fn remote_error_message(body: &str) -> Option<String> {
  let payload: Value = serde_json::from_str(body).ok()?;
  let messages = payload["errorMessages"].as_array()?;
  let joined = messages
    .iter()
    .filter_map(Value::as_str)
    .collect::<Vec<_>>()
    .join(" | ");
  (!joined.is_empty()).then_some(joined)
}

fn response_meta(resp: &reqwest::Response) -> ResponseMeta {
  let headers = resp.headers();
  let header_u64 = |name: &str| {
    headers
      .get(name)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.trim().parse::<u64>().ok())
  };
  ResponseMeta {
    status: resp.status().as_u16(),
    retry_after: header_u64("retry-after")
      .map(Duration::from_secs),
    quota_remaining: header_u64("x-ratelimit-remaining"),
    quota_reset_in: header_u64("x-ratelimit-reset")
      .map(Duration::from_secs),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_errors_map_to_kinds() {
    let meta = ResponseMeta::throttled(Some(
      Duration::from_secs(3),
    ));
    let e = status_error(429, &meta, String::new());
    assert_eq!(e.kind, ErrorKind::RateLimited);
    assert_eq!(e.retry_after(), Some(Duration::from_secs(3)));

    let e = status_error(401, &ResponseMeta::ok(), String::new());
    assert_eq!(e.kind, ErrorKind::AuthenticationFailed);

    let e = status_error(404, &ResponseMeta::ok(), String::new());
    assert_eq!(e.kind, ErrorKind::NotFound);

    let e = status_error(502, &ResponseMeta::ok(), String::new());
    assert_eq!(e.kind, ErrorKind::TransientNetwork);
  }

  #[test]
  fn remote_error_messages_surface() {
    let body =
      r#"{"errorMessages":["Field 'epig' does not exist"]}"#;
    let e = status_error(400, &ResponseMeta::ok(), body.into());
    assert_eq!(e.kind, ErrorKind::InvalidInput);
    assert!(e.message.contains("epig"));
  }
}
