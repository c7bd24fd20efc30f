//! The persistent work cache.
//!
//! Backed by SQLite with two logical collections: resolved work records keyed
//! by canonical entity URL, and citation/reference edge lists keyed by
//! (canonical URL, direction). All writes are upserts; nothing is ever
//! invalidated automatically, since bibliographic metadata is treated as
//! append-only for the lifetime of the dataset.

use std::path::Path;

use rusqlite::{params, params_from_iter};
use tokio_rusqlite::Connection;

use super::*;

/// Maximum bound parameters per batched `IN` query. Kept comfortably under
/// SQLite's variable limit.
const IN_CHUNK: usize = 500;

/// A cached edge list for one (entity, direction) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEdgeList {
  /// Full discovered target list, canonical URLs, pre-truncation.
  pub ids:       Vec<String>,
  /// Whether the crawl that produced this list saw every edge (halted by
  /// total/bound/no-more-pages rather than by the caller's limit or a page
  /// error). Non-exhausted lists may be re-crawled by a larger-limit call.
  pub exhausted: bool,
  /// Whether every discovered record was persisted (a `save_all` crawl).
  pub complete:  bool,
}

/// Database handle for the work cache.
pub struct Database {
  /// Async SQLite connection.
  conn: Connection,
}

impl Database {
  /// Open or create a database at the specified path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, BibgraphError> {
    let conn = Connection::open(path.as_ref()).await?;

    // Initialize schema
    conn
      .call(|conn| {
        conn.execute_batch(include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/init.sql")))?;
        Ok(())
      })
      .await?;

    Ok(Self { conn })
  }

  /// Get default database path in user's data directory.
  pub fn default_path() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("bibgraph").join("bibgraph.db")
  }

  /// Upsert a single work record under the given canonical URL key.
  pub async fn upsert_work(&self, key: &str, record: &WorkRecord) -> Result<(), BibgraphError> {
    self.upsert_works(vec![(key.to_string(), record.clone())]).await
  }

  /// Upsert a batch of work records in one transaction.
  ///
  /// Each entry pairs the canonical URL key with the record stored under it.
  pub async fn upsert_works(
    &self,
    entries: Vec<(String, WorkRecord)>,
  ) -> Result<(), BibgraphError> {
    if entries.is_empty() {
      return Ok(());
    }

    // Serialize outside the connection thread so JSON errors stay typed.
    let mut rows = Vec::with_capacity(entries.len());
    for (key, record) in &entries {
      rows.push((key.clone(), record.cited_by_count, serde_json::to_string(record)?));
    }

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare_cached(
            "INSERT INTO works (id, cited_by_count, record)
                         VALUES (?1, ?2, ?3)
                         ON CONFLICT(id) DO UPDATE SET
                             cited_by_count = excluded.cited_by_count,
                             record = excluded.record",
          )?;
          for (key, cited_by_count, record) in &rows {
            stmt.execute(params![key, cited_by_count, record])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await
      .map_err(BibgraphError::from)
  }

  /// Get a work record by its canonical URL key.
  pub async fn get_work(&self, key: &str) -> Result<Option<WorkRecord>, BibgraphError> {
    let key = key.to_string();

    let row: Option<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached("SELECT record FROM works WHERE id = ?1")?;
        match stmt.query_row(params![key], |row| row.get::<_, String>(0)) {
          Ok(record) => Ok(Some(record)),
          Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    match row {
      Some(record) => Ok(Some(serde_json::from_str(&record)?)),
      None => Ok(None),
    }
  }

  /// Batch-get work records for a set of canonical URL keys.
  ///
  /// Missing keys are silently absent from the result; callers decide how to
  /// treat holes. Order of the returned records is unspecified.
  pub async fn get_works(&self, keys: &[String]) -> Result<Vec<WorkRecord>, BibgraphError> {
    let mut records = Vec::with_capacity(keys.len());

    for chunk in keys.chunks(IN_CHUNK) {
      let chunk = chunk.to_vec();
      let rows: Vec<String> = self
        .conn
        .call(move |conn| {
          let placeholders = vec!["?"; chunk.len()].join(", ");
          let mut stmt =
            conn.prepare(&format!("SELECT record FROM works WHERE id IN ({placeholders})"))?;
          let rows = stmt
            .query_map(params_from_iter(chunk.iter()), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
          Ok(rows)
        })
        .await?;

      for row in rows {
        records.push(serde_json::from_str(&row)?);
      }
    }

    Ok(records)
  }

  /// Upsert the edge list for one (entity, direction) pair.
  pub async fn upsert_edge_list(
    &self,
    key: &str,
    direction: Direction,
    list: &CachedEdgeList,
  ) -> Result<(), BibgraphError> {
    let key = key.to_string();
    let direction = direction.as_str();
    let ids = serde_json::to_string(&list.ids)?;
    let (exhausted, complete) = (list.exhausted, list.complete);

    self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "INSERT INTO edge_lists (work_id, direction, ids, exhausted, complete)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(work_id, direction) DO UPDATE SET
                         ids = excluded.ids,
                         exhausted = excluded.exhausted,
                         complete = excluded.complete",
        )?;
        stmt.execute(params![key, direction, ids, exhausted, complete])?;
        Ok(())
      })
      .await
      .map_err(BibgraphError::from)
  }

  /// Get the cached edge list for one (entity, direction) pair.
  pub async fn get_edge_list(
    &self,
    key: &str,
    direction: Direction,
  ) -> Result<Option<CachedEdgeList>, BibgraphError> {
    let key = key.to_string();
    let direction = direction.as_str();

    let row: Option<(String, bool, bool)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT ids, exhausted, complete FROM edge_lists
                     WHERE work_id = ?1 AND direction = ?2",
        )?;
        match stmt.query_row(params![key, direction], |row| {
          Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?, row.get::<_, bool>(2)?))
        }) {
          Ok(row) => Ok(Some(row)),
          Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    match row {
      Some((ids, exhausted, complete)) =>
        Ok(Some(CachedEdgeList { ids: serde_json::from_str(&ids)?, exhausted, complete })),
      None => Ok(None),
    }
  }
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use super::*;

  /// Helper function to create a test record.
  fn test_record(id: &str, cited_by_count: i64) -> WorkRecord {
    WorkRecord {
      id: Some(format!("https://openalex.org/{id}")),
      title: Some(format!("Work {id}")),
      cited_by_count,
      ..WorkRecord::default()
    }
  }

  /// Helper function to set up a test database.
  async fn setup_test_db() -> (Database, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let db = Database::open(&db_path).await.unwrap();
    (db, dir)
  }

  #[tokio::test]
  async fn test_database_creation() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");

    let _db = Database::open(&db_path).await.unwrap();

    assert!(db_path.exists());
  }

  #[tokio::test]
  async fn test_upsert_and_get_work() -> Result<(), BibgraphError> {
    let (db, _dir) = setup_test_db().await;
    let record = test_record("W1000", 7);
    let key = record.id.clone().unwrap();

    db.upsert_work(&key, &record).await?;

    let retrieved = db.get_work(&key).await?.expect("record should exist");
    assert_eq!(retrieved.title, record.title);
    assert_eq!(retrieved.cited_by_count, 7);

    Ok(())
  }

  #[tokio::test]
  async fn test_get_nonexistent_work() -> Result<(), BibgraphError> {
    let (db, _dir) = setup_test_db().await;

    let result = db.get_work("https://openalex.org/W9999").await?;

    assert!(result.is_none());
    Ok(())
  }

  #[tokio::test]
  async fn test_upsert_overwrites_existing_record() -> Result<(), BibgraphError> {
    let (db, _dir) = setup_test_db().await;
    let key = "https://openalex.org/W1000".to_string();

    db.upsert_work(&key, &test_record("W1000", 1)).await?;
    db.upsert_work(&key, &test_record("W1000", 2)).await?;

    let retrieved = db.get_work(&key).await?.unwrap();
    assert_eq!(retrieved.cited_by_count, 2);
    Ok(())
  }

  #[tokio::test]
  async fn test_batch_get_returns_only_present_records() -> Result<(), BibgraphError> {
    let (db, _dir) = setup_test_db().await;

    let entries: Vec<(String, WorkRecord)> = (0..5)
      .map(|i| {
        let record = test_record(&format!("W100{i}"), i);
        (record.id.clone().unwrap(), record)
      })
      .collect();
    db.upsert_works(entries).await?;

    let keys = vec![
      "https://openalex.org/W1000".to_string(),
      "https://openalex.org/W1003".to_string(),
      "https://openalex.org/W1999".to_string(), // not cached
    ];
    let records = db.get_works(&keys).await?;
    assert_eq!(records.len(), 2);

    Ok(())
  }

  #[tokio::test]
  async fn test_edge_list_round_trip() -> Result<(), BibgraphError> {
    let (db, _dir) = setup_test_db().await;
    let key = "https://openalex.org/W1000";

    let list = CachedEdgeList {
      ids:       vec![
        "https://openalex.org/W2000".to_string(),
        "https://openalex.org/W3000".to_string(),
      ],
      exhausted: true,
      complete:  false,
    };
    db.upsert_edge_list(key, Direction::Citations, &list).await?;

    let retrieved = db.get_edge_list(key, Direction::Citations).await?.unwrap();
    assert_eq!(retrieved, list);

    // The two directions are independent collections.
    assert!(db.get_edge_list(key, Direction::References).await?.is_none());

    Ok(())
  }

  #[tokio::test]
  async fn test_edge_list_upsert_overwrites() -> Result<(), BibgraphError> {
    let (db, _dir) = setup_test_db().await;
    let key = "https://openalex.org/W1000";

    let partial = CachedEdgeList {
      ids:       vec!["https://openalex.org/W2000".to_string()],
      exhausted: false,
      complete:  false,
    };
    db.upsert_edge_list(key, Direction::References, &partial).await?;

    let full = CachedEdgeList {
      ids:       vec![
        "https://openalex.org/W2000".to_string(),
        "https://openalex.org/W3000".to_string(),
      ],
      exhausted: true,
      complete:  true,
    };
    db.upsert_edge_list(key, Direction::References, &full).await?;

    let retrieved = db.get_edge_list(key, Direction::References).await?.unwrap();
    assert_eq!(retrieved, full);

    Ok(())
  }
}
