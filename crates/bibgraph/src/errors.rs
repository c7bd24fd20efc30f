//! Error types for the bibgraph library.
//!
//! This module provides a comprehensive error type that encompasses all
//! possible failure modes when working with the citation graph, including:
//! - Entity ID validation
//! - Network fetches and retry exhaustion
//! - Record deserialization
//! - Cache database operations
//! - Local file system access
//!
//! Two kinds of failure are deliberately *not* represented here: the
//! full-text pipeline's degradations (missing DOI, no open-access URL, failed
//! download or extraction) are reported through
//! [`crate::fulltext::TextOutcome`] variants so that batch callers keep
//! making forward progress instead of catching exceptions.

use thiserror::Error;

use super::*;

/// Errors that can occur when working with the bibgraph library.
///
/// Only two classes of error are expected to propagate to callers as hard
/// failures: validation errors ([`BibgraphError::InvalidEntityId`],
/// [`BibgraphError::Parse`]) and terminal fetch failures on the entity
/// resolution path ([`BibgraphError::RetriesExhausted`]), since downstream
/// logic cannot proceed without a resolved identity. Everything else wraps
/// infrastructure errors transparently.
#[derive(Error, Debug)]
pub enum BibgraphError {
  /// The provided work identifier doesn't match the expected format.
  ///
  /// Valid identifiers are a `W` followed by 4-10 digits, optionally in the
  /// canonical URL form. The string parameter carries the rejected input.
  #[error("Invalid work entity ID: {0}")]
  InvalidEntityId(String),

  /// A response document failed structural validation on deserialization.
  ///
  /// Raised when an API response or a cached document cannot be decoded
  /// into a [`crate::work::WorkRecord`] or listing page. Never retried.
  #[error("Malformed record: {0}")]
  Parse(#[from] serde_json::Error),

  /// All retry attempts against the API were spent.
  ///
  /// Carries the offending URL and the last observed failure so callers can
  /// report exactly what the remote end did.
  #[error("Retries exhausted for GET {url}: {source}")]
  RetriesExhausted {
    /// The URL of the failing request.
    url:    String,
    /// The failure observed on the final attempt.
    source: FetchError,
  },

  /// A non-retryable transport failure.
  #[error(transparent)]
  Fetch(#[from] FetchError),

  /// A network request outside the retrying API client failed.
  #[error(transparent)]
  Network(#[from] reqwest::Error),

  /// Failed to parse a URL.
  #[error(transparent)]
  InvalidUrl(#[from] url::ParseError),

  /// A SQLite operation failed.
  #[error(transparent)]
  Sqlite(#[from] rusqlite::Error),

  /// An async SQLite operation failed.
  #[error(transparent)]
  AsyncSqlite(#[from] tokio_rusqlite::Error),

  /// A file system operation failed.
  #[error(transparent)]
  Path(#[from] std::io::Error),

  /// Reading or appending the sanitized-name ledger failed.
  #[error(transparent)]
  Ledger(#[from] csv::Error),
}
