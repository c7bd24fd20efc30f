//! Bibliographic work types: validated entity identifiers, resolved work
//! records, and the two citation-graph directions.
//!
//! A *work* is a scholarly document (article, book, dataset, thesis). Works
//! are identified by an entity ID of the form `W` plus 4-10 digits, and keyed
//! in the cache by the canonical URL form of that ID.
//!
//! # Examples
//!
//! ```
//! use bibgraph::work::EntityId;
//!
//! // Bare IDs and canonical URLs normalize to the same identifier.
//! let a = EntityId::new("W2100837269").unwrap();
//! let b = EntityId::new("https://openalex.org/W2100837269").unwrap();
//! assert_eq!(a, b);
//! assert_eq!(a.canonical_url(), "https://openalex.org/W2100837269");
//!
//! // Invalid identifiers fail fast, before any network call.
//! assert!(EntityId::new("A12345").is_err());
//! ```

use std::str::FromStr;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use super::*;

/// Prefix of canonical entity URLs; the cache primary key is this plus the
/// bare entity ID.
pub const CANONICAL_BASE: &str = "https://openalex.org/";

/// Base URL of the remote bibliographic API.
pub const API_BASE: &str = "https://api.openalex.org";

/// A validated identifier for a bibliographic work.
///
/// Construction accepts either the bare form (`W2100837269`) or the canonical
/// URL form (`https://openalex.org/W2100837269`) and normalizes to the bare
/// form. Anything else is rejected with
/// [`BibgraphError::InvalidEntityId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
  /// Parse and validate an entity ID from a bare token or canonical URL.
  pub fn new(input: &str) -> Result<Self, BibgraphError> {
    lazy_static! {
      /// Accepted pattern for a bare work identifier.
      static ref WORK_ID: Regex = Regex::new(r"^W\d{4,10}$").unwrap();
    }

    let bare = input.strip_prefix(CANONICAL_BASE).unwrap_or(input);
    if WORK_ID.is_match(bare) {
      Ok(Self(bare.to_string()))
    } else {
      Err(BibgraphError::InvalidEntityId(input.to_string()))
    }
  }

  /// The bare identifier, e.g. `W2100837269`.
  pub fn as_str(&self) -> &str { &self.0 }

  /// The fully-qualified form used as the cache primary key.
  pub fn canonical_url(&self) -> String { format!("{CANONICAL_BASE}{}", self.0) }
}

impl std::fmt::Display for EntityId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

impl FromStr for EntityId {
  type Err = BibgraphError;

  fn from_str(s: &str) -> Result<Self, Self::Err> { Self::new(s) }
}

/// The direction of a citation-graph traversal relative to the source work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
  /// Incoming edges: works that cite the subject work.
  Citations,
  /// Outgoing edges: works the subject work cites.
  References,
}

impl Direction {
  /// The listing filter expression selecting this direction's edges.
  pub(crate) fn filter(&self, id: &EntityId) -> String {
    match self {
      Direction::Citations => format!("cites:{}", id.as_str()),
      Direction::References => format!("cited_by:{}", id.as_str()),
    }
  }

  /// Stable name used as part of the edge-list cache key.
  pub fn as_str(&self) -> &'static str {
    match self {
      Direction::Citations => "citations",
      Direction::References => "references",
    }
  }
}

impl std::fmt::Display for Direction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// A resolved bibliographic work record.
///
/// This mirrors the remote API's work document, pruned to the fields the
/// system reads plus general descriptive metadata. Every field is optional on
/// the wire; unknown fields are ignored on deserialization. Records are
/// immutable once fetched within a session and may be refreshed by re-fetch
/// via [`crate::resolver::Resolver::refresh`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkRecord {
  /// Canonical entity URL of this work.
  pub id:               Option<String>,
  /// The work's title.
  pub title:            Option<String>,
  /// Display name; usually identical to the title.
  pub display_name:     Option<String>,
  /// The work's DOI, typically in URL-prefixed form.
  pub doi:              Option<String>,
  /// Year of publication.
  pub publication_year: Option<i32>,
  /// Full publication date, when known.
  pub publication_date: Option<NaiveDate>,
  /// Number of works citing this one. Drives edge-list ordering.
  #[serde(default)]
  pub cited_by_count:   i64,
  /// The kind of document (article, book, dataset, ...).
  #[serde(rename = "type")]
  pub work_type:        Option<String>,
  /// Language code of the work's text.
  pub language:         Option<String>,
  /// Whether the work has been retracted.
  pub is_retracted:     Option<bool>,
  /// The best open-access location, including a candidate PDF URL.
  pub best_oa_location: Option<OaLocation>,
  /// All known locations of the work.
  pub locations:        Option<Vec<OaLocation>>,
  /// Summary open-access status.
  pub open_access:      Option<OpenAccess>,
  /// The work's authors with their positions.
  pub authorships:      Option<Vec<Authorship>>,
  /// Volume/issue/page bibliographic info.
  pub biblio:           Option<Biblio>,
  /// Canonical URLs of the works this one cites.
  pub referenced_works: Option<Vec<String>>,
}

impl WorkRecord {
  /// The validated entity ID of this record.
  ///
  /// Fails with [`BibgraphError::InvalidEntityId`] when the record carries no
  /// ID or a malformed one.
  pub fn entity_id(&self) -> Result<EntityId, BibgraphError> {
    match &self.id {
      Some(id) => EntityId::new(id),
      None => Err(BibgraphError::InvalidEntityId("<missing id>".to_string())),
    }
  }

  /// The candidate open-access PDF URL, if any.
  pub fn pdf_url(&self) -> Option<&str> {
    self.best_oa_location.as_ref().and_then(|location| location.pdf_url.as_deref())
  }
}

/// An open-access location of a work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OaLocation {
  /// Whether this location is open access.
  pub is_oa:            Option<bool>,
  /// URL of the location's landing page.
  pub landing_page_url: Option<String>,
  /// Direct URL of a PDF at this location.
  pub pdf_url:          Option<String>,
  /// License the copy is offered under.
  pub license:          Option<String>,
  /// Which version of the work this copy is (published, accepted, ...).
  pub version:          Option<String>,
}

/// Summary open-access information of a work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAccess {
  /// Whether any open-access copy exists.
  pub is_oa:     Option<bool>,
  /// Open-access status class (gold, green, bronze, ...).
  pub oa_status: Option<String>,
  /// URL of the best open-access copy.
  pub oa_url:    Option<String>,
}

/// An author of a work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
  /// Canonical entity URL of the author.
  pub id:           Option<String>,
  /// The author's display name.
  pub display_name: Option<String>,
  /// The author's ORCID URL.
  pub orcid:        Option<String>,
}

/// An authorship: an author together with their byline position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Authorship {
  /// Position in the byline (first, middle, last).
  pub author_position: Option<String>,
  /// The author themselves.
  pub author:          Option<Author>,
}

/// Old-timey bibliographic info for a work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Biblio {
  /// Journal volume.
  pub volume:     Option<String>,
  /// Journal issue.
  pub issue:      Option<String>,
  /// First page of the work.
  pub first_page: Option<String>,
  /// Last page of the work.
  pub last_page:  Option<String>,
}
