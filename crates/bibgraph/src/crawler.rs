//! The paginated citation-graph crawler.
//!
//! For a given work and direction (incoming citations or outgoing
//! references), [`Crawler::edges`] produces the ordered list of related
//! entity IDs plus their resolved records, serving from the cache whenever a
//! previously persisted traversal covers the request and paging through the
//! API otherwise.
//!
//! The crawl is sequential per (entity, direction): the stopping conditions
//! depend on the running total, so there is no page-level parallelism.
//! Partial failures make forward progress — a page-fetch error keeps the
//! edges accumulated so far, persists them, and a later call with a larger
//! limit re-pages past the stored set.

use super::*;
use crate::database::CachedEdgeList;

/// Default cap on the number of edges returned.
pub const DEFAULT_EDGE_LIMIT: usize = 1000;

/// Hard ceiling on any edge limit, matching the API's listing depth.
pub const MAX_EDGE_LIMIT: usize = 10_000;

/// Options for one traversal.
#[derive(Debug, Clone, Copy)]
pub struct CrawlOptions {
  /// Maximum number of edges to return. Clamped to [`MAX_EDGE_LIMIT`];
  /// zero returns an empty set without any I/O.
  pub limit:    usize,
  /// Persist every discovered record instead of only the first `limit`.
  pub save_all: bool,
}

impl Default for CrawlOptions {
  fn default() -> Self { Self { limit: DEFAULT_EDGE_LIMIT, save_all: false } }
}

/// The result of a traversal: ordered IDs and the records behind them.
///
/// IDs are canonical URLs sorted by the target's citation count, descending;
/// ties in arbitrary order. `works` maps each returned ID to its record
/// (holes are possible on cache-hit reads when a record was never
/// materialized).
#[derive(Debug, Default)]
pub struct EdgeSet {
  /// Ordered canonical URLs of the related works.
  pub ids:   Vec<String>,
  /// Records of the returned works, keyed by canonical URL.
  pub works: HashMap<String, WorkRecord>,
}

/// Paginated, stateful traversal of the citation graph around one work.
#[derive(Clone)]
pub struct Crawler {
  /// Shared resolver granting access to the cache and the API client.
  resolver: Resolver,
}

impl Crawler {
  /// Create a crawler over a resolver.
  pub fn new(resolver: Resolver) -> Self { Self { resolver } }

  /// The works related to `id` in the given direction.
  ///
  /// Serves entirely from the cache when a stored edge list either is
  /// exhausted (the producing crawl saw every edge) or already covers the
  /// requested limit; otherwise pages through the API, persists the full
  /// discovered list, and returns the first `limit` entries.
  pub async fn edges(
    &self,
    id: &EntityId,
    direction: Direction,
    options: CrawlOptions,
  ) -> Result<EdgeSet, BibgraphError> {
    let limit = options.limit.min(MAX_EDGE_LIMIT);
    if limit == 0 {
      return Ok(EdgeSet::default());
    }

    let key = id.canonical_url();
    if let Some(cached) = self.resolver.db.get_edge_list(&key, direction).await? {
      if cached.exhausted || cached.ids.len() >= limit {
        debug!(%id, %direction, cached = cached.ids.len(), "edge list served from cache");
        return self.from_cache(cached, limit).await;
      }
      debug!(
        %id, %direction,
        cached = cached.ids.len(),
        limit,
        "cached edge list is partial and smaller than requested; re-crawling"
      );
    }

    self.crawl(id, direction, limit, options.save_all).await
  }

  /// Serve a traversal from a previously persisted edge list.
  async fn from_cache(
    &self,
    cached: CachedEdgeList,
    limit: usize,
  ) -> Result<EdgeSet, BibgraphError> {
    let mut records = self.resolver.db.get_works(&cached.ids).await?;
    if records.len() < cached.ids.len() {
      debug!(
        ids = cached.ids.len(),
        materialized = records.len(),
        "some edge targets were never materialized; returning what the cache holds"
      );
    }

    records.sort_by(|a, b| b.cited_by_count.cmp(&a.cited_by_count));
    records.truncate(limit);

    let mut ids = Vec::with_capacity(records.len());
    let mut works = HashMap::with_capacity(records.len());
    for record in records {
      if let Some(record_id) = record.id.clone() {
        ids.push(record_id.clone());
        works.insert(record_id, record);
      }
    }
    Ok(EdgeSet { ids, works })
  }

  /// Cold path: page through the filtered listing and persist the results.
  async fn crawl(
    &self,
    id: &EntityId,
    direction: Direction,
    limit: usize,
    save_all: bool,
  ) -> Result<EdgeSet, BibgraphError> {
    // The source record's cited-by count bounds the incoming direction only.
    let bound = match direction {
      Direction::Citations => Some(self.resolver.resolve(id).await?.cited_by_count.max(0) as usize),
      Direction::References => None,
    };

    let mut discovered: Vec<(String, WorkRecord)> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut page = 1;
    let mut total: Option<usize> = None;
    let mut max_pages = 1;
    let mut exhausted = false;

    loop {
      // Exhaustion checks come before the limit check so a crawl that hits
      // both is recorded as exhausted.
      if let Some(total) = total {
        if discovered.len() >= total {
          exhausted = true;
          break;
        }
      }
      if let Some(bound) = bound {
        if discovered.len() >= bound {
          exhausted = true;
          break;
        }
      }
      if discovered.len() >= limit {
        break;
      }

      let listing = match self.resolver.api.list_page(direction, id, page).await {
        Ok(listing) => listing,
        Err(e) => {
          // Keep the accumulated edges; a later call resumes past them.
          warn!(%id, %direction, page, error = %e, "page fetch failed; keeping partial results");
          break;
        },
      };
      if listing.results.is_empty() {
        exhausted = true;
        break;
      }

      let page_len = listing.results.len();
      for entry in listing.results {
        let Some(entry_id) = entry.get("id").and_then(|v| v.as_str()).map(str::to_owned) else {
          warn!(%id, %direction, page, "listing entry without an id; skipping");
          continue;
        };
        if !seen.insert(entry_id.clone()) {
          continue;
        }
        match serde_json::from_value::<WorkRecord>(entry) {
          Ok(record) => discovered.push((entry_id, record)),
          Err(e) => {
            warn!(target_id = %entry_id, error = %e, "unparseable listing entry; skipping");
          },
        }
      }

      // Total and page count are fixed from the first page's metadata.
      if total.is_none() {
        total = Some(listing.meta.count);
        max_pages = listing.meta.count.div_ceil(page_len);
      }
      if page >= max_pages {
        exhausted = true;
        break;
      }
      page += 1;
    }

    // Sorted at write time so cache-hit reads and cold-path returns agree.
    discovered.sort_by(|a, b| b.1.cited_by_count.cmp(&a.1.cited_by_count));
    let all_ids: Vec<String> = discovered.iter().map(|(entry_id, _)| entry_id.clone()).collect();

    let key = id.canonical_url();
    self
      .resolver
      .db
      .upsert_edge_list(
        &key,
        direction,
        &CachedEdgeList { ids: all_ids, exhausted, complete: save_all },
      )
      .await?;

    let persisted: Vec<(String, WorkRecord)> = if save_all {
      discovered.clone()
    } else {
      discovered.iter().take(limit).cloned().collect()
    };
    self.resolver.db.upsert_works(persisted).await?;

    let mut ids = Vec::new();
    let mut works = HashMap::new();
    for (entry_id, record) in discovered.into_iter().take(limit) {
      ids.push(entry_id.clone());
      works.insert(entry_id, record);
    }
    debug!(%id, %direction, returned = ids.len(), exhausted, "traversal complete");
    Ok(EdgeSet { ids, works })
  }
}
