//! PDF acquisition and plain-text extraction for resolved works.
//!
//! The [`FulltextPipeline`] turns a [`WorkRecord`] into extracted text in
//! three steps: derive a stable on-disk name from the work's DOI, download
//! the open-access PDF if it is not already present, and extract per-page
//! text. Every degradation (no DOI, no PDF URL, download failure, extraction
//! failure) is an explicit [`TextOutcome`] variant rather than an error, so
//! callers iterating a corpus decide themselves whether a miss is fatal.
//!
//! Downloads sit behind the [`PdfFetcher`] trait the same way API traffic
//! sits behind `Transport`, so tests inject counting doubles instead of a
//! network.

use std::path::Path;

use async_trait::async_trait;
use lopdf::Document;

use super::*;
use crate::api::FetchError;

/// Download attempts per PDF before giving up.
const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Per-attempt timeout on PDF downloads.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// The result of asking for a work's full text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOutcome {
  /// Text was extracted, whitespace-normalized.
  Extracted(String),
  /// The record carries no DOI, so no stable file name can be derived.
  MissingDoi,
  /// The record names no open-access PDF URL.
  NoPdfUrl,
  /// Every download attempt failed or returned a non-PDF payload.
  DownloadFailed,
  /// The file exists but text could not be extracted from it.
  ExtractionFailed,
}

impl TextOutcome {
  /// Degrade to plain text: the extracted text, or empty on any miss.
  pub fn into_text(self) -> String {
    match self {
      TextOutcome::Extracted(text) => text,
      _ => String::new(),
    }
  }
}

/// How page-level extraction failures are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtractionPolicy {
  /// Any failing page discards the whole document.
  #[default]
  AllOrNothing,
  /// Failing pages are dropped; the rest of the document survives.
  SkipBadPages,
}

/// A downloaded candidate PDF, prior to validation.
#[derive(Debug, Clone)]
pub struct PdfPayload {
  /// The response's Content-Type header, when present.
  pub content_type: Option<String>,
  /// The raw response body.
  pub body:         Vec<u8>,
}

impl PdfPayload {
  /// Whether this payload looks like an actual PDF: either the server says
  /// so, or the body carries the PDF magic.
  pub fn is_pdf(&self) -> bool {
    self.content_type.as_deref().is_some_and(|ct| ct.contains("pdf"))
      || self.body.starts_with(b"%PDF-")
  }
}

/// The download seam: one GET returning the raw payload.
#[async_trait]
pub trait PdfFetcher: Send + Sync {
  /// Download one URL.
  async fn fetch(&self, url: &str) -> Result<PdfPayload, FetchError>;
}

/// The production [`PdfFetcher`] over a dedicated `reqwest` client with a
/// download-appropriate timeout.
pub struct HttpPdfFetcher {
  /// Internal web client, reused across downloads.
  client: reqwest::Client,
}

impl HttpPdfFetcher {
  /// Create a fetcher with the standard timeout and user agent.
  pub fn new() -> Self {
    Self {
      client: reqwest::Client::builder()
        .user_agent(concat!("bibgraph/", env!("CARGO_PKG_VERSION")))
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .unwrap(),
    }
  }
}

impl Default for HttpPdfFetcher {
  fn default() -> Self { Self::new() }
}

#[async_trait]
impl PdfFetcher for HttpPdfFetcher {
  async fn fetch(&self, url: &str) -> Result<PdfPayload, FetchError> {
    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| FetchError::Transport { url: url.to_string(), message: e.to_string() })?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
      return Err(FetchError::Status { status: status.as_u16(), url: url.to_string() });
    }
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|value| value.to_str().ok())
      .map(str::to_owned);
    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::Transport { url: url.to_string(), message: e.to_string() })?
      .to_vec();
    Ok(PdfPayload { content_type, body })
  }
}

/// Strip the URL prefix from a DOI, leaving the bare registrant form.
pub fn bare_doi(doi: &str) -> &str {
  doi
    .strip_prefix("https://doi.org/")
    .or_else(|| doi.strip_prefix("http://doi.org/"))
    .or_else(|| doi.strip_prefix("doi.org/"))
    .unwrap_or(doi)
}

/// Map every non-alphanumeric character to `_`, yielding a filesystem-safe
/// file stem.
pub fn sanitize_name(input: &str) -> String {
  input.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

/// Collapse whitespace runs to single spaces and trim.
pub fn clean_text(input: &str) -> String { input.split_whitespace().collect::<Vec<_>>().join(" ") }

/// Append-only CSV ledger mapping original names to sanitized file stems.
///
/// Read in full on each lookup; the corpus of downloaded works is small
/// enough that this beats keeping a second index consistent.
pub struct NameLedger {
  /// Path of the backing CSV file. Created on first append.
  path: PathBuf,
}

impl NameLedger {
  /// A ledger backed by the given CSV path.
  pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

  /// All (original, sanitized) pairs currently in the ledger.
  fn entries(&self) -> Result<Vec<(String, String)>, BibgraphError> {
    if !self.path.exists() {
      return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new().has_headers(false).from_path(&self.path)?;
    let mut entries = Vec::new();
    for row in reader.records() {
      let row = row?;
      if let (Some(original), Some(sanitized)) = (row.get(0), row.get(1)) {
        entries.push((original.to_string(), sanitized.to_string()));
      }
    }
    Ok(entries)
  }

  /// Record a name mapping, unless the identical pair is already present.
  pub fn record(&self, original: &str, sanitized: &str) -> Result<(), BibgraphError> {
    let pair = (original.to_string(), sanitized.to_string());
    if self.entries()?.contains(&pair) {
      return Ok(());
    }
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    writer.write_record([original, sanitized])?;
    writer.flush()?;
    Ok(())
  }

  /// Reverse lookup: the original name behind a sanitized file stem.
  pub fn original_for(&self, sanitized: &str) -> Result<Option<String>, BibgraphError> {
    Ok(
      self
        .entries()?
        .into_iter()
        .find(|(_, s)| s == sanitized)
        .map(|(original, _)| original),
    )
  }
}

/// Acquires PDFs for resolved works and extracts their text.
pub struct FulltextPipeline {
  /// The download seam.
  fetcher: Arc<dyn PdfFetcher>,
  /// Directory PDFs are stored in, one file per work.
  pdf_dir: PathBuf,
  /// Name-mapping ledger living alongside the PDFs.
  ledger:  NameLedger,
  /// Page-failure handling during extraction.
  policy:  ExtractionPolicy,
}

impl FulltextPipeline {
  /// A pipeline over the production HTTP fetcher, storing PDFs under
  /// `pdf_dir`.
  pub fn new(pdf_dir: impl Into<PathBuf>) -> Self {
    Self::with_fetcher(Arc::new(HttpPdfFetcher::new()), pdf_dir)
  }

  /// A pipeline over an injected fetcher.
  pub fn with_fetcher(fetcher: Arc<dyn PdfFetcher>, pdf_dir: impl Into<PathBuf>) -> Self {
    let pdf_dir = pdf_dir.into();
    let ledger = NameLedger::new(pdf_dir.join("names.csv"));
    Self { fetcher, pdf_dir, ledger, policy: ExtractionPolicy::default() }
  }

  /// Replace the extraction policy.
  pub fn with_policy(mut self, policy: ExtractionPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// The on-disk PDF path for a record, derived from its DOI.
  pub fn pdf_path(&self, record: &WorkRecord) -> Option<PathBuf> {
    let doi = record.doi.as_deref()?;
    Some(self.pdf_dir.join(format!("{}.pdf", sanitize_name(bare_doi(doi)))))
  }

  /// Acquire and extract the full text of a work.
  ///
  /// An already-downloaded PDF is reused without touching the network.
  /// Degradations come back as [`TextOutcome`] variants; this method never
  /// fails across the component boundary.
  pub async fn text_for(&self, record: &WorkRecord) -> TextOutcome {
    let Some(doi) = record.doi.as_deref() else {
      debug!(id = ?record.id, "record carries no DOI; skipping full text");
      return TextOutcome::MissingDoi;
    };
    let original = bare_doi(doi);
    let name = sanitize_name(original);
    if let Err(e) = self.ledger.record(original, &name) {
      // A ledger write failure degrades bookkeeping, not the pipeline.
      warn!(%name, error = %e, "failed to record name mapping");
    }

    let path = self.pdf_dir.join(format!("{name}.pdf"));
    if !path.exists() {
      let Some(url) = record.pdf_url() else {
        debug!(%name, "no open-access PDF URL");
        return TextOutcome::NoPdfUrl;
      };
      if !self.download(url, &path).await {
        return TextOutcome::DownloadFailed;
      }
    }

    self.extract(&path).await
  }

  /// Download a PDF with bounded attempts and payload validation.
  ///
  /// Returns whether a validated payload landed at `path`.
  async fn download(&self, url: &str, path: &Path) -> bool {
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
      match self.fetcher.fetch(url).await {
        Ok(payload) if payload.is_pdf() => {
          if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
              error!(path = %path.display(), error = %e, "failed to create PDF directory");
              return false;
            }
          }
          match tokio::fs::write(path, &payload.body).await {
            Ok(()) => {
              debug!(%url, path = %path.display(), bytes = payload.body.len(), "PDF downloaded");
              return true;
            },
            Err(e) => {
              error!(path = %path.display(), error = %e, "failed to write PDF");
              return false;
            },
          }
        },
        Ok(payload) => {
          warn!(
            %url, attempt,
            content_type = payload.content_type.as_deref().unwrap_or("<none>"),
            "payload is not a PDF"
          );
        },
        Err(e) => {
          warn!(%url, attempt, error = %e, "PDF download attempt failed");
        },
      }
    }
    false
  }

  /// Extract the document's text on a blocking thread.
  async fn extract(&self, path: &Path) -> TextOutcome {
    let path = path.to_path_buf();
    let policy = self.policy;
    match tokio::task::spawn_blocking(move || extract_pages(&path, policy)).await {
      Ok(Some(text)) => TextOutcome::Extracted(text),
      Ok(None) => TextOutcome::ExtractionFailed,
      Err(e) => {
        error!(error = %e, "extraction task panicked");
        TextOutcome::ExtractionFailed
      },
    }
  }
}

/// Parse a PDF and extract page text according to the policy.
///
/// `None` means the document was discarded: it failed to parse, or a page
/// failed under [`ExtractionPolicy::AllOrNothing`].
fn extract_pages(path: &Path, policy: ExtractionPolicy) -> Option<String> {
  let document = match Document::load(path) {
    Ok(document) => document,
    Err(e) => {
      warn!(path = %path.display(), error = %e, "failed to parse PDF");
      return None;
    },
  };

  let mut pages = Vec::new();
  for (page_no, _) in document.get_pages() {
    match document.extract_text(&[page_no]) {
      Ok(text) => {
        let text = clean_text(&text);
        if !text.is_empty() {
          pages.push(text);
        }
      },
      Err(e) => match policy {
        ExtractionPolicy::AllOrNothing => {
          warn!(path = %path.display(), page_no, error = %e, "page extraction failed; discarding document");
          return None;
        },
        ExtractionPolicy::SkipBadPages => {
          warn!(path = %path.display(), page_no, error = %e, "page extraction failed; skipping page");
        },
      },
    }
  }
  Some(pages.join(" "))
}
