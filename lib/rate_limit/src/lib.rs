use std::sync::{Arc, Mutex};
use std::time::Duration;

use ticketry_client::{
  ResponseMeta, ResponseObserver,
  error::{Error, ErrorKind, Result},
};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
  /// Minimum spacing between requests.
  pub min_request_spacing: Duration,
  /// First backoff step after a throttled response.
  pub base_backoff: Duration,
  /// Backoff never grows past this.
  pub max_backoff_delay: Duration,
  /// Concurrency slots handed out by `acquire_slot`.
  pub max_concurrent_requests: usize,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self {
      min_request_spacing: Duration::from_millis(200),
      base_backoff: Duration::from_secs(1),
      max_backoff_delay: Duration::from_secs(60),
      max_concurrent_requests: 4,
    }
  }
}

/// Gates outbound request rate: enforces minimum spacing,
/// exponential backoff after throttled responses, and any
/// remote-advertised quota window. Counters sit behind one
/// mutex which is never held across a sleep.
pub struct RateLimiter {
  config: RateLimitConfig,
  slots: Arc<Semaphore>,
  inner: Mutex<Limiter>,
}

#[derive(Default)]
struct Limiter {
  last_request: Option<Instant>,
  consecutive_errors: u32,
  backoff_until: Option<Instant>,
  quota_remaining: Option<u64>,
  quota_reset_at: Option<Instant>,
  /// Slots currently handed out, so a double
  /// `release_slot` cannot grow capacity.
  slots_held: usize,
}

impl RateLimiter {
  pub fn new(config: RateLimitConfig) -> Arc<Self> {
    let slots =
      Arc::new(Semaphore::new(config.max_concurrent_requests));
    Arc::new(Self {
      config,
      slots,
      inner: Mutex::new(Limiter::default()),
    })
  }

  /// Block until the limiter is ready for the next request:
  /// any backoff window has elapsed, minimum spacing since the
  /// previous `wait` is satisfied, and the remote quota window
  /// is not exhausted. Returns `cancelled` if `ctx` fires first.
  pub async fn wait(&self, ctx: &CancellationToken) -> Result<()> {
    loop {
      if ctx.is_cancelled() {
        return Err(Error::new(
          ErrorKind::Cancelled,
          "Cancelled while waiting for rate limiter",
        ));
      }
      let delay = {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        match next_delay(&mut inner, &self.config, now) {
          Some(delay) => delay,
          None => {
            inner.last_request = Some(now);
            return Ok(());
          }
        }
        // Lock dropped here; sleep happens unlocked.
      };
      tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = ctx.cancelled() => {
          return Err(Error::new(
            ErrorKind::Cancelled,
            "Cancelled while waiting for rate limiter",
          ));
        }
      }
    }
  }

  /// Take one of the bounded concurrency slots.
  pub async fn acquire_slot(
    &self,
    ctx: &CancellationToken,
  ) -> Result<()> {
    if ctx.is_cancelled() {
      return Err(Error::new(
        ErrorKind::Cancelled,
        "Cancelled while waiting for a request slot",
      ));
    }
    tokio::select! {
      permit = self.slots.acquire() => {
        permit
          .expect("slot semaphore is never closed")
          .forget();
        self.inner.lock().unwrap().slots_held += 1;
        Ok(())
      }
      _ = ctx.cancelled() => Err(Error::new(
        ErrorKind::Cancelled,
        "Cancelled while waiting for a request slot",
      )),
    }
  }

  /// Return a slot. A release without a matching acquire is
  /// tolerated silently; capacity never exceeds the configured
  /// maximum.
  pub fn release_slot(&self) {
    let mut inner = self.inner.lock().unwrap();
    if inner.slots_held > 0 {
      inner.slots_held -= 1;
      self.slots.add_permits(1);
    }
  }

  /// Inspect one remote response: throttled responses extend the
  /// backoff window exponentially (`base * 2^(n-1)`, capped),
  /// honouring a larger server-advertised retry delay; quota
  /// headers are kept; a success resets the error streak.
  pub fn handle_response(&self, meta: &ResponseMeta) {
    let mut inner = self.inner.lock().unwrap();
    let now = Instant::now();
    if let Some(remaining) = meta.quota_remaining {
      inner.quota_remaining = Some(remaining);
    }
    if let Some(reset_in) = meta.quota_reset_in {
      inner.quota_reset_at = Some(now + reset_in);
    }
    if throttled_or_transient(meta) {
      inner.consecutive_errors += 1;
      let exp = inner.consecutive_errors.saturating_sub(1).min(16);
      let mut delay = self
        .config
        .base_backoff
        .saturating_mul(2u32.pow(exp))
        .min(self.config.max_backoff_delay);
      if let Some(retry_after) = meta.retry_after
        && retry_after > delay
      {
        delay = retry_after;
      }
      let until = now + delay;
      inner.backoff_until = match inner.backoff_until {
        Some(existing) if existing > until => Some(existing),
        _ => Some(until),
      };
    } else if meta.is_success() {
      inner.consecutive_errors = 0;
      inner.backoff_until = None;
    }
  }

  pub fn consecutive_errors(&self) -> u32 {
    self.inner.lock().unwrap().consecutive_errors
  }

  pub fn in_backoff(&self) -> bool {
    let inner = self.inner.lock().unwrap();
    inner
      .backoff_until
      .is_some_and(|until| until > Instant::now())
  }

  pub fn available_slots(&self) -> usize {
    self.slots.available_permits()
  }
}

impl ResponseObserver for RateLimiter {
  fn on_response(&self, meta: &ResponseMeta) {
    self.handle_response(meta)
  }
}

/// Network-level failures are reported as status 0; those and
/// 5xx responses back off like an explicit throttle.
fn throttled_or_transient(meta: &ResponseMeta) -> bool {
  meta.is_throttled() || meta.status == 0 || meta.status >= 500
}

fn next_delay(
  inner: &mut Limiter,
  config: &RateLimitConfig,
  now: Instant,
) -> Option<Duration> {
  if let Some(until) = inner.backoff_until {
    if until > now {
      return Some(until - now);
    }
    inner.backoff_until = None;
  }
  if let Some(last) = inner.last_request {
    let ready = last + config.min_request_spacing;
    if ready > now {
      return Some(ready - now);
    }
  }
  if inner.quota_remaining == Some(0) {
    match inner.quota_reset_at {
      Some(reset) if reset > now => return Some(reset - now),
      _ => {
        // Window passed without fresh headers.
        inner.quota_remaining = None;
        inner.quota_reset_at = None;
      }
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  fn limiter(config: RateLimitConfig) -> Arc<RateLimiter> {
    RateLimiter::new(config)
  }

  fn fast_config() -> RateLimitConfig {
    RateLimitConfig {
      min_request_spacing: Duration::from_millis(100),
      base_backoff: Duration::from_millis(500),
      max_backoff_delay: Duration::from_secs(5),
      max_concurrent_requests: 2,
    }
  }

  #[tokio::test(start_paused = true)]
  async fn enforces_request_spacing() {
    let limiter = limiter(fast_config());
    let ctx = CancellationToken::new();

    let start = Instant::now();
    limiter.wait(&ctx).await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);

    limiter.wait(&ctx).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(100));
  }

  #[tokio::test(start_paused = true)]
  async fn backoff_grows_exponentially_and_caps() {
    let limiter = limiter(fast_config());
    let ctx = CancellationToken::new();

    limiter.handle_response(&ResponseMeta::throttled(None));
    assert_eq!(limiter.consecutive_errors(), 1);
    limiter.handle_response(&ResponseMeta::throttled(None));
    limiter.handle_response(&ResponseMeta::throttled(None));
    assert_eq!(limiter.consecutive_errors(), 3);

    // Third consecutive error: 500ms * 2^2 = 2s.
    let start = Instant::now();
    limiter.wait(&ctx).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(2));

    // Far past the cap.
    for _ in 0..10 {
      limiter.handle_response(&ResponseMeta::throttled(None));
    }
    let start = Instant::now();
    limiter.wait(&ctx).await.unwrap();
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(5));
    assert!(waited < Duration::from_secs(6));
  }

  #[tokio::test(start_paused = true)]
  async fn larger_retry_after_wins() {
    let limiter = limiter(fast_config());
    let ctx = CancellationToken::new();

    limiter.handle_response(&ResponseMeta::throttled(Some(
      Duration::from_secs(3),
    )));

    let start = Instant::now();
    limiter.wait(&ctx).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(3));
  }

  #[tokio::test(start_paused = true)]
  async fn success_resets_error_streak() {
    let limiter = limiter(fast_config());

    limiter.handle_response(&ResponseMeta::throttled(None));
    limiter.handle_response(&ResponseMeta::throttled(None));
    assert_eq!(limiter.consecutive_errors(), 2);
    assert!(limiter.in_backoff());

    limiter.handle_response(&ResponseMeta::ok());
    assert_eq!(limiter.consecutive_errors(), 0);
    assert!(!limiter.in_backoff());
  }

  #[tokio::test(start_paused = true)]
  async fn quota_exhaustion_waits_for_reset() {
    let limiter = limiter(fast_config());
    let ctx = CancellationToken::new();

    limiter.handle_response(&ResponseMeta {
      status: 200,
      quota_remaining: Some(0),
      quota_reset_in: Some(Duration::from_secs(4)),
      ..Default::default()
    });

    let start = Instant::now();
    limiter.wait(&ctx).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(4));
  }

  #[tokio::test]
  async fn slots_are_bounded_and_double_release_is_silent() {
    let limiter = limiter(fast_config());
    let ctx = CancellationToken::new();

    limiter.acquire_slot(&ctx).await.unwrap();
    limiter.acquire_slot(&ctx).await.unwrap();
    assert_eq!(limiter.available_slots(), 0);

    limiter.release_slot();
    assert_eq!(limiter.available_slots(), 1);
    limiter.release_slot();
    assert_eq!(limiter.available_slots(), 2);
    // Unmatched release: tolerated, capacity stays put.
    limiter.release_slot();
    assert_eq!(limiter.available_slots(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn wait_honours_cancellation() {
    let limiter = limiter(fast_config());
    let ctx = CancellationToken::new();

    limiter.handle_response(&ResponseMeta::throttled(Some(
      Duration::from_secs(60),
    )));

    let cancel = ctx.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(10)).await;
      cancel.cancel();
    });

    let err = limiter.wait(&ctx).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
  }
}
