//! Cache-first resolution of work records.
//!
//! A [`Resolver`] owns handles to the cache and the API client and answers
//! "give me the record for this entity ID" by consulting the cache first and
//! falling back to the network, writing the result back on the way out. Once
//! cached, a record is considered permanently valid; [`Resolver::refresh`] is
//! the explicit path around that invariant.

use super::*;

/// Cache-first lookup of bibliographic records by entity ID.
///
/// Cheap to clone; clones share the same cache and client.
#[derive(Clone)]
pub struct Resolver {
  /// The persistent work cache.
  pub(crate) db:  Arc<Database>,
  /// The rate-limited API client.
  pub(crate) api: Arc<ApiClient>,
}

impl Resolver {
  /// Create a resolver over an open cache and an API client.
  pub fn new(db: Arc<Database>, api: Arc<ApiClient>) -> Self { Self { db, api } }

  /// Resolve a work record, from cache when possible.
  ///
  /// On a cache miss the record is fetched from the API, written back under
  /// the canonical URL key, and returned. Retry exhaustion on this path is a
  /// hard failure: callers cannot proceed without a resolved identity.
  pub async fn resolve(&self, id: &EntityId) -> Result<WorkRecord, BibgraphError> {
    let key = id.canonical_url();
    if let Some(record) = self.db.get_work(&key).await? {
      debug!(%id, "work record served from cache");
      return Ok(record);
    }
    self.refresh(id).await
  }

  /// Fetch a work record from the API unconditionally, overwriting any
  /// cached copy.
  pub async fn refresh(&self, id: &EntityId) -> Result<WorkRecord, BibgraphError> {
    let record = self.api.work(id).await?;
    self.db.upsert_work(&id.canonical_url(), &record).await?;
    debug!(%id, "work record fetched and cached");
    Ok(record)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tests::{test_stack, work_json, MockTransport};

  #[traced_test]
  #[tokio::test]
  async fn test_resolve_fetches_once_then_serves_from_cache() {
    let transport = MockTransport::new();
    transport.route("/works/W123456789", work_json("W123456789", 3));
    let (resolver, _dir) = test_stack(transport.clone()).await;

    let id = EntityId::new("W123456789").unwrap();
    let first = resolver.resolve(&id).await.unwrap();
    let second = resolver.resolve(&id).await.unwrap();

    assert_eq!(first.cited_by_count, 3);
    assert_eq!(second.cited_by_count, 3);
    // Second call is a pure cache hit.
    assert_eq!(transport.calls(), 1);
  }

  #[tokio::test]
  async fn test_resolved_record_round_trips_its_id() {
    let transport = MockTransport::new();
    transport.route("/works/W123456789", work_json("W123456789", 0));
    let (resolver, _dir) = test_stack(transport).await;

    let id = EntityId::new("https://openalex.org/W123456789").unwrap();
    let record = resolver.resolve(&id).await.unwrap();
    assert_eq!(record.entity_id().unwrap(), id);
  }

  #[tokio::test]
  async fn test_refresh_bypasses_the_cache() {
    let transport = MockTransport::new();
    transport.route("/works/W123456789", work_json("W123456789", 5));
    let (resolver, _dir) = test_stack(transport.clone()).await;

    let id = EntityId::new("W123456789").unwrap();
    resolver.resolve(&id).await.unwrap();
    resolver.refresh(&id).await.unwrap();

    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_unresolvable_entity_is_a_hard_failure() {
    let transport = MockTransport::new(); // no routes: every URL yields a 404
    let (resolver, _dir) = test_stack(transport).await;

    let id = EntityId::new("W999999999").unwrap();
    let result = resolver.resolve(&id).await;
    assert!(matches!(result, Err(BibgraphError::RetriesExhausted { .. })));
  }
}
