//! Shared test fixtures: a routing transport double, canned API documents,
//! and a fully wired resolver over a temporary database.

use std::sync::Mutex;

use tempfile::TempDir;

use super::*;
use crate::api::{FetchError, RetryPolicy, Transport};

/// A [`Transport`] double serving canned JSON bodies by URL fragment.
///
/// Routes match by substring, first route wins. Unrouted URLs yield a 404
/// status error. Every call is recorded for assertions on request counts and
/// shapes.
pub(crate) struct MockTransport {
  /// (fragment, body) pairs checked in insertion order.
  routes:   Mutex<Vec<(String, serde_json::Value)>>,
  /// Every URL this transport was asked for, in order.
  requests: Mutex<Vec<String>>,
}

impl MockTransport {
  /// Create an empty transport behind an `Arc` ready for injection.
  pub(crate) fn new() -> Arc<Self> {
    Arc::new(Self { routes: Mutex::new(Vec::new()), requests: Mutex::new(Vec::new()) })
  }

  /// Serve `body` for any URL containing `fragment`.
  pub(crate) fn route(&self, fragment: &str, body: serde_json::Value) {
    self.routes.lock().unwrap().push((fragment.to_string(), body));
  }

  /// Total calls made through this transport.
  pub(crate) fn calls(&self) -> usize { self.requests.lock().unwrap().len() }

  /// Every requested URL, in call order.
  pub(crate) fn requests(&self) -> Vec<String> { self.requests.lock().unwrap().clone() }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
  async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
    self.requests.lock().unwrap().push(url.to_string());
    let routes = self.routes.lock().unwrap();
    for (fragment, body) in routes.iter() {
      if url.contains(fragment.as_str()) {
        return Ok(body.clone());
      }
    }
    Err(FetchError::Status { status: 404, url: url.to_string() })
  }
}

/// A minimal work document as the API would return it.
pub(crate) fn work_json(id: &str, cited_by: i64) -> serde_json::Value {
  serde_json::json!({
    "id": format!("https://openalex.org/{id}"),
    "title": format!("Work {id}"),
    "publication_year": 2020,
    "cited_by_count": cited_by,
  })
}

/// One listing page with the given total count and result documents.
pub(crate) fn listing_json(count: usize, results: &[serde_json::Value]) -> serde_json::Value {
  serde_json::json!({
    "meta": { "count": count },
    "results": results,
  })
}

/// A resolver wired to a temporary database and an injected transport, with
/// retry delays dropped to zero. The `TempDir` must be kept alive for the
/// duration of the test.
pub(crate) async fn test_stack(transport: Arc<MockTransport>) -> (Resolver, TempDir) {
  let dir = tempfile::tempdir().unwrap();
  let db = Database::open(dir.path().join("test.db")).await.unwrap();
  let api = ApiClient::with_transport(transport, "test@example.com")
    .with_policy(RetryPolicy::immediate());
  (Resolver::new(Arc::new(db), Arc::new(api)), dir)
}

mod end_to_end {
  use super::*;
  use crate::crawler::{CrawlOptions, Crawler};

  #[traced_test]
  #[tokio::test]
  async fn test_citation_traversal_resolves_crawls_and_caches() {
    let transport = MockTransport::new();
    transport.route("/works/W123456789", work_json("W123456789", 2));
    transport.route(
      "filter=cites:W123456789",
      listing_json(2, &[work_json("W1111111", 7), work_json("W2222222", 3)]),
    );
    let (resolver, _dir) = test_stack(transport.clone()).await;
    let crawler = Crawler::new(resolver.clone());

    let id = EntityId::new("W123456789").unwrap();
    let edges = crawler
      .edges(&id, Direction::Citations, CrawlOptions { limit: 1000, save_all: false })
      .await
      .unwrap();

    // Exactly the two citing works come back, most-cited first.
    assert_eq!(edges.ids, vec![
      "https://openalex.org/W1111111".to_string(),
      "https://openalex.org/W2222222".to_string(),
    ]);

    // Both records and the source landed in the cache.
    for key in ["W123456789", "W1111111", "W2222222"] {
      let key = format!("https://openalex.org/{key}");
      assert!(resolver.db.get_work(&key).await.unwrap().is_some(), "missing {key}");
    }

    // The crawl halted after page one; page two was never requested.
    assert!(!transport.requests().iter().any(|url| url.contains("page=2")));

    // A repeat traversal is fully served from cache.
    let calls = transport.calls();
    let again = crawler
      .edges(&id, Direction::Citations, CrawlOptions { limit: 1000, save_all: false })
      .await
      .unwrap();
    assert_eq!(again.ids, edges.ids);
    assert_eq!(transport.calls(), calls);
  }
}
