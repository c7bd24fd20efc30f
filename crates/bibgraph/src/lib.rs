//! A library for crawling and locally caching the citation graph of scholarly
//! works, with full-text acquisition from open-access PDFs.
//!
//! The crate is built around four cooperating pieces:
//!
//! - [`api::ApiClient`]: a rate-limited, retrying HTTP client for the remote
//!   bibliographic API.
//! - [`database::Database`]: a SQLite-backed cache of resolved work records
//!   and citation/reference edge lists. Cached data is never invalidated;
//!   bibliographic metadata is treated as append-only.
//! - [`resolver::Resolver`] and [`crawler::Crawler`]: cache-first entity
//!   resolution and the paginated citation-graph traversal.
//! - [`fulltext::FulltextPipeline`]: locating, downloading, and extracting
//!   plain text from open-access PDFs.
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bibgraph::{
//!   api::ApiClient,
//!   crawler::{CrawlOptions, Crawler},
//!   database::Database,
//!   resolver::Resolver,
//!   work::{Direction, EntityId},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!   let db = Arc::new(Database::open(Database::default_path()).await?);
//!   let api = Arc::new(ApiClient::new("you@example.com"));
//!   let resolver = Resolver::new(db, api);
//!
//!   let id = EntityId::new("W2100837269")?;
//!   let work = resolver.resolve(&id).await?;
//!   println!("Title: {}", work.title.as_deref().unwrap_or("<untitled>"));
//!
//!   let crawler = Crawler::new(resolver);
//!   let edges = crawler.edges(&id, Direction::Citations, CrawlOptions::default()).await?;
//!   println!("Citing works: {}", edges.ids.len());
//!
//!   Ok(())
//! }
//! ```

#![warn(missing_docs, clippy::missing_docs_in_private_items)]

use std::{
  collections::{HashMap, HashSet},
  path::PathBuf,
  sync::Arc,
  time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
#[cfg(test)] use tracing_test::traced_test;

pub mod api;
pub mod crawler;
pub mod database;
pub mod errors;
pub mod fulltext;
pub mod resolver;
pub mod work;
#[cfg(test)] mod tests;

use api::{ApiClient, FetchError};
use database::Database;
use errors::BibgraphError;
use resolver::Resolver;
use work::{Direction, EntityId, WorkRecord};
