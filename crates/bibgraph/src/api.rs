//! The rate-limited, retrying client for the remote bibliographic API.
//!
//! All outbound API traffic flows through one [`ApiClient`], which owns the
//! process-wide [`RateLimiter`] and applies a bounded exponential-backoff
//! [`RetryPolicy`] around every GET. The HTTP layer itself sits behind the
//! [`Transport`] trait so tests can substitute counting doubles; production
//! code uses [`HttpTransport`] over `reqwest`.
//!
//! Failure classification follows the remote API's behavior: a non-200
//! status, a connection timeout, and a malformed JSON body are all transient
//! and retried; anything else propagates immediately.
//!
//! # Examples
//!
//! ```no_run
//! use bibgraph::{api::ApiClient, work::EntityId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let api = ApiClient::new("you@example.com");
//! let record = api.work(&EntityId::new("W2100837269")?).await?;
//! println!("Cited by {} works", record.cited_by_count);
//! # Ok(())
//! # }
//! ```

use std::num::NonZeroU32;

use async_trait::async_trait;
use governor::{
  clock::DefaultClock,
  state::{InMemoryState, NotKeyed},
  Quota,
};
use thiserror::Error;
use url::Url;

use super::*;
use crate::work::API_BASE;

/// Listing results requested per page: the API's maximum.
pub const PER_PAGE: usize = 200;

/// Requests permitted per rolling one-second window.
const REQUESTS_PER_SECOND: u32 = 10;

/// Bounds the outbound request rate to the remote API.
///
/// [`RateLimiter::acquire`] suspends the caller until a permit is available,
/// guaranteeing no more than N requests per rolling second across all
/// concurrent callers. Safe for concurrent use by many in-flight fetches;
/// fairness is approximately FIFO and starvation under sustained overload is
/// acceptable since the crawler self-throttles via backoff.
pub struct RateLimiter {
  /// The underlying direct (un-keyed) limiter.
  inner: governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl RateLimiter {
  /// Create a limiter permitting `per_second` requests per rolling second.
  pub fn new(per_second: u32) -> Self {
    let quota = Quota::per_second(NonZeroU32::new(per_second.max(1)).unwrap());
    Self { inner: governor::RateLimiter::direct(quota) }
  }

  /// Block until one request may be issued.
  pub async fn acquire(&self) { self.inner.until_ready().await }
}

/// A single failed fetch attempt, classified for retry purposes.
#[derive(Error, Debug)]
pub enum FetchError {
  /// The remote returned a status other than 200. Retryable.
  #[error("unexpected status {status} from GET {url}")]
  Status {
    /// The observed HTTP status code.
    status: u16,
    /// The requested URL.
    url:    String,
  },

  /// Establishing the connection timed out. Retryable.
  #[error("connection timed out for GET {url}")]
  ConnectTimeout {
    /// The requested URL.
    url: String,
  },

  /// The response body was not valid JSON. Retryable.
  #[error("malformed JSON body from GET {url}: {message}")]
  Decode {
    /// The requested URL.
    url:     String,
    /// Decoder diagnostic.
    message: String,
  },

  /// Any other transport-level failure (malformed URL, DNS, TLS). Not
  /// retryable; propagates immediately.
  #[error("request failed for GET {url}: {message}")]
  Transport {
    /// The requested URL.
    url:     String,
    /// Transport diagnostic.
    message: String,
  },
}

impl FetchError {
  /// Whether a retry could plausibly succeed.
  pub fn is_retryable(&self) -> bool { !matches!(self, FetchError::Transport { .. }) }
}

/// Classify a `reqwest` error into a [`FetchError`].
fn classify(url: &str, error: reqwest::Error) -> FetchError {
  if error.is_connect() || error.is_timeout() {
    FetchError::ConnectTimeout { url: url.to_string() }
  } else if error.is_decode() {
    FetchError::Decode { url: url.to_string(), message: error.to_string() }
  } else {
    FetchError::Transport { url: url.to_string(), message: error.to_string() }
  }
}

/// The HTTP seam: one GET returning a parsed JSON body.
///
/// Production code uses [`HttpTransport`]; tests inject doubles that count
/// calls and serve canned documents.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Issue a single GET and parse the response body as JSON.
  async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError>;
}

/// The production [`Transport`] over a shared `reqwest` client.
pub struct HttpTransport {
  /// Internal web client, reused across requests.
  client: reqwest::Client,
}

impl HttpTransport {
  /// Create a transport with a polite user agent.
  pub fn new() -> Self {
    Self {
      client: reqwest::Client::builder()
        .user_agent(concat!("bibgraph/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap(),
    }
  }
}

impl Default for HttpTransport {
  fn default() -> Self { Self::new() }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
    let response = self.client.get(url).send().await.map_err(|e| classify(url, e))?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
      return Err(FetchError::Status { status: status.as_u16(), url: url.to_string() });
    }
    response
      .json::<serde_json::Value>()
      .await
      .map_err(|e| FetchError::Decode { url: url.to_string(), message: e.to_string() })
  }
}

/// Bounded exponential backoff applied between retryable failures.
///
/// Defaults to 4 attempts total with delays of roughly 2s, 4s, 8s (the fourth
/// attempt is the last; the cap would clamp any further delay to 10s).
/// Injectable so tests can drop the delays to zero and verify attempt counts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  pub attempts: u32,
  /// Delay after the first failed attempt; doubles each retry.
  pub base:     Duration,
  /// Upper bound on any single delay.
  pub cap:      Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self { attempts: 4, base: Duration::from_secs(2), cap: Duration::from_secs(10) }
  }
}

impl RetryPolicy {
  /// The delay to sleep after failed attempt number `attempt` (1-based).
  pub fn delay(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    self.base.saturating_mul(factor).min(self.cap)
  }

  /// A policy with no delays, for tests exercising attempt counting.
  pub fn immediate() -> Self { Self { base: Duration::ZERO, ..Self::default() } }
}

/// One page of a filtered works listing.
#[derive(Debug, Deserialize)]
pub struct ListingPage {
  /// Listing metadata; fixed from the first page of a traversal.
  pub meta:    ListingMeta,
  /// Raw result documents. Left unparsed so a malformed entry can be
  /// skipped without discarding the page.
  pub results: Vec<serde_json::Value>,
}

/// Metadata attached to a listing page.
#[derive(Debug, Deserialize)]
pub struct ListingMeta {
  /// Total result count across all pages.
  pub count: usize,
}

/// The rate-limited, retrying API client.
///
/// Explicitly constructed and passed to the resolver/crawler at construction
/// time rather than living in a module-level singleton, so tests can run
/// multiple isolated instances.
pub struct ApiClient {
  /// The HTTP seam.
  transport: Arc<dyn Transport>,
  /// Process-wide limiter shared by every call through this client.
  limiter:   RateLimiter,
  /// Retry/backoff configuration.
  policy:    RetryPolicy,
  /// Base URL of the remote API.
  base_url:  String,
  /// Contact email sent with every request for API politeness.
  email:     String,
}

impl ApiClient {
  /// Create a client over the production HTTP transport.
  pub fn new(email: impl Into<String>) -> Self {
    Self::with_transport(Arc::new(HttpTransport::new()), email)
  }

  /// Create a client over an injected transport.
  pub fn with_transport(transport: Arc<dyn Transport>, email: impl Into<String>) -> Self {
    Self {
      transport,
      limiter: RateLimiter::new(REQUESTS_PER_SECOND),
      policy: RetryPolicy::default(),
      base_url: API_BASE.to_string(),
      email: email.into(),
    }
  }

  /// Replace the retry policy.
  pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// GET a URL and return its JSON body, retrying transient failures.
  ///
  /// Every attempt first passes through the rate limiter. On exhausting all
  /// attempts the last failure is surfaced as
  /// [`BibgraphError::RetriesExhausted`] with the offending URL; this is a
  /// terminal failure the caller must handle.
  pub async fn get_json(&self, url: &str) -> Result<serde_json::Value, BibgraphError> {
    let mut target = Url::parse(url)?;
    target.query_pairs_mut().append_pair("email", &self.email);
    let target = target.to_string();

    let mut attempt = 1;
    loop {
      self.limiter.acquire().await;
      match self.transport.get_json(&target).await {
        Ok(body) => return Ok(body),
        Err(e) if !e.is_retryable() => return Err(e.into()),
        Err(e) if attempt >= self.policy.attempts =>
          return Err(BibgraphError::RetriesExhausted { url: target, source: e }),
        Err(e) => {
          let delay = self.policy.delay(attempt);
          warn!(url = %target, attempt, ?delay, error = %e, "retrying API request");
          tokio::time::sleep(delay).await;
          attempt += 1;
        },
      }
    }
  }

  /// Fetch a single work record by entity ID.
  pub async fn work(&self, id: &EntityId) -> Result<WorkRecord, BibgraphError> {
    let url = format!("{}/works/{}", self.base_url, id.as_str());
    debug!(%url, "fetching work record");
    let body = self.get_json(&url).await?;
    Ok(serde_json::from_value(body)?)
  }

  /// Fetch one page of the filtered works listing for a traversal direction.
  pub async fn list_page(
    &self,
    direction: Direction,
    id: &EntityId,
    page: usize,
  ) -> Result<ListingPage, BibgraphError> {
    let url = format!(
      "{}/works?filter={}&page={}&per-page={}",
      self.base_url,
      direction.filter(id),
      page,
      PER_PAGE
    );
    debug!(%url, "fetching listing page");
    let body = self.get_json(&url).await?;
    Ok(serde_json::from_value(body)?)
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Instant,
  };

  use super::*;

  /// A transport that fails every call with a configurable error kind.
  struct AlwaysFailing {
    calls:     AtomicUsize,
    retryable: bool,
  }

  #[async_trait]
  impl Transport for AlwaysFailing {
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.retryable {
        Err(FetchError::ConnectTimeout { url: url.to_string() })
      } else {
        Err(FetchError::Transport { url: url.to_string(), message: "broken pipe".to_string() })
      }
    }
  }

  #[test]
  fn test_backoff_delays_are_exponential_and_capped() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay(1), Duration::from_secs(2));
    assert_eq!(policy.delay(2), Duration::from_secs(4));
    assert_eq!(policy.delay(3), Duration::from_secs(8));
    assert_eq!(policy.delay(4), Duration::from_secs(10));
    assert_eq!(policy.delay(10), Duration::from_secs(10));
  }

  #[traced_test]
  #[tokio::test]
  async fn test_retryable_failure_spends_exactly_four_attempts() {
    let transport = Arc::new(AlwaysFailing { calls: AtomicUsize::new(0), retryable: true });
    let api = ApiClient::with_transport(transport.clone(), "test@example.com")
      .with_policy(RetryPolicy::immediate());

    let result = api.get_json("https://api.openalex.org/works/W123456789").await;
    assert!(matches!(result, Err(BibgraphError::RetriesExhausted { .. })));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
  }

  #[tokio::test]
  async fn test_non_retryable_failure_propagates_immediately() {
    let transport = Arc::new(AlwaysFailing { calls: AtomicUsize::new(0), retryable: false });
    let api = ApiClient::with_transport(transport.clone(), "test@example.com")
      .with_policy(RetryPolicy::immediate());

    let result = api.get_json("https://api.openalex.org/works/W123456789").await;
    assert!(matches!(result, Err(BibgraphError::Fetch(FetchError::Transport { .. }))));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_requests_carry_the_contact_email() {
    let transport = crate::tests::MockTransport::new();
    transport.route("/works/W123456789", crate::tests::work_json("W123456789", 0));
    let api = ApiClient::with_transport(transport.clone(), "polite@example.com");

    api.get_json("https://api.openalex.org/works/W123456789").await.unwrap();
    let requests = transport.requests();
    assert!(requests[0].contains("email=polite%40example.com") || requests[0].contains("email=polite@example.com"));
  }

  #[tokio::test]
  async fn test_rate_limiter_bounds_burst_rate() {
    let limiter = RateLimiter::new(10);

    let start = Instant::now();
    for _ in 0..10 {
      limiter.acquire().await;
    }
    // A full burst fits in the window.
    assert!(start.elapsed() < Duration::from_millis(500));

    // The 11th permit has to wait for the window to roll.
    let before_overflow = Instant::now();
    limiter.acquire().await;
    assert!(before_overflow.elapsed() >= Duration::from_millis(50));
  }

  #[tokio::test]
  async fn test_rate_limiter_is_safe_under_concurrent_acquisition() {
    let limiter = Arc::new(RateLimiter::new(10));
    let start = Instant::now();

    let handles: Vec<_> = (0..20)
      .map(|_| {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.acquire().await })
      })
      .collect();
    for handle in handles {
      handle.await.unwrap();
    }

    // 20 permits at 10/s: the second half must spill past the first window.
    assert!(start.elapsed() >= Duration::from_millis(900));
  }
}
