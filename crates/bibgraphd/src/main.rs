use std::{path::PathBuf, sync::Arc};

use bibgraph::{
  api::ApiClient,
  crawler::{CrawlOptions, Crawler, EdgeSet, DEFAULT_EDGE_LIMIT},
  database::Database,
  fulltext::{ExtractionPolicy, FulltextPipeline, TextOutcome},
  resolver::Resolver,
  work::{Direction, EntityId},
};
use clap::{builder::ArgAction, Parser, Subcommand};
use console::{style, Emoji};
use errors::BibgraphdErrors;
use tracing::{debug, trace};
use tracing_subscriber::EnvFilter;

pub mod errors;

static LOOKING_GLASS: Emoji<'_, '_> = Emoji("🔍 ", "");
static BOOKS: Emoji<'_, '_> = Emoji("📚 ", "");
static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
static PAPER: Emoji<'_, '_> = Emoji("📄 ", "");
static GRAPH: Emoji<'_, '_> = Emoji("🕸️  ", "");
static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "");
static SUCCESS: Emoji<'_, '_> = Emoji("✨ ", "");

#[derive(Parser)]
#[command(author, version, about = "CLI for the bibgraph citation-graph cache")]
struct Cli {
  /// Verbose mode (-v, -vv, -vvv)
  #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        help = "Increase logging verbosity"
    )]
  verbose: u8,

  /// Path to the database file
  #[arg(long, short, global = true)]
  path: Option<PathBuf>,

  /// Contact email sent with API requests
  #[arg(long, global = true, default_value = "bibgraph@example.org")]
  email: String,

  /// Skip all interactive confirmations
  #[arg(long, global = true)]
  accept_defaults: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Initialize a new bibgraph database
  Init,
  /// Fetch a work record and cache it
  Fetch {
    /// Work entity ID (bare W-number or canonical URL)
    id:      String,
    /// Bypass the cache and re-fetch from the API
    #[arg(long)]
    refresh: bool,
  },
  /// Crawl the works citing a given work
  Citations {
    /// Work entity ID (bare W-number or canonical URL)
    id:       String,
    /// Maximum number of edges to return
    #[arg(long, default_value_t = DEFAULT_EDGE_LIMIT)]
    limit:    usize,
    /// Persist every discovered record, not only the returned ones
    #[arg(long)]
    save_all: bool,
  },
  /// Crawl the works a given work references
  References {
    /// Work entity ID (bare W-number or canonical URL)
    id:       String,
    /// Maximum number of edges to return
    #[arg(long, default_value_t = DEFAULT_EDGE_LIMIT)]
    limit:    usize,
    /// Persist every discovered record, not only the returned ones
    #[arg(long)]
    save_all: bool,
  },
  /// Download a work's open-access PDF and print its text
  Text {
    /// Work entity ID (bare W-number or canonical URL)
    id:             String,
    /// Directory PDFs are stored in
    #[arg(long)]
    pdf_dir:        Option<PathBuf>,
    /// Keep pages that extract successfully even if others fail
    #[arg(long)]
    skip_bad_pages: bool,
  },
  /// Removes the entire database
  Clean,
}

/// Setup logging with the specified verbosity level
fn setup_logging(verbosity: u8) {
  let filter = match verbosity {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_file(true)
    .with_line_number(true)
    .with_thread_ids(true)
    .with_target(true)
    .init();
}

/// Open the database and wire up a resolver over the API client.
async fn open_resolver(
  path: Option<PathBuf>,
  email: &str,
) -> Result<Resolver, BibgraphdErrors> {
  let path = path.unwrap_or_else(Database::default_path);
  trace!("Using database at: {}", path.display());
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  let db = Arc::new(Database::open(&path).await?);
  let api = Arc::new(ApiClient::new(email));
  Ok(Resolver::new(db, api))
}

/// Print an edge-set summary: count plus one line per returned work.
fn print_edges(edges: &EdgeSet, label: &str) {
  println!("\n{} Found {} {label}:", style(SUCCESS).green(), style(edges.ids.len()).yellow());
  for (i, id) in edges.ids.iter().enumerate() {
    let Some(record) = edges.works.get(id) else { continue };
    println!(
      "{}. {} {}",
      style(i + 1).yellow(),
      style(record.title.as_deref().unwrap_or("<untitled>")).white().bold(),
      style(format!("(cited by {})", record.cited_by_count)).cyan()
    );
    println!("   {} {}", style("ID:").green(), style(id).blue().underlined());
  }
}

/// Run a traversal in the given direction and print the result.
async fn run_crawl(
  resolver: Resolver,
  id: &str,
  direction: Direction,
  limit: usize,
  save_all: bool,
) -> Result<(), BibgraphdErrors> {
  let id = EntityId::new(id)?;
  println!(
    "{} Crawling {} of {}",
    style(GRAPH).cyan(),
    style(direction).cyan(),
    style(&id).yellow()
  );

  let crawler = Crawler::new(resolver);
  let edges = crawler.edges(&id, direction, CrawlOptions { limit, save_all }).await?;

  if edges.ids.is_empty() {
    println!("{} No {} found for {}", style(WARNING).yellow(), direction, style(id).yellow());
  } else {
    print_edges(&edges, direction.as_str());
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BibgraphdErrors> {
  let cli = Cli::parse();
  setup_logging(cli.verbose);

  match cli.command {
    Commands::Init => {
      let path = cli.path.unwrap_or_else(|| {
        let default_path = Database::default_path();
        println!(
          "{} Using default database path: {}",
          style(BOOKS).cyan(),
          style(default_path.display()).yellow()
        );
        default_path
      });

      if path.exists() {
        println!(
          "{} Database already exists at: {}",
          style(WARNING).yellow(),
          style(path.display()).yellow()
        );

        let confirm = cli.accept_defaults
          || dialoguer::Confirm::new()
            .with_prompt(
              "Do you want to reinitialize this database? This will erase all existing data",
            )
            .default(false)
            .interact()?;

        if !confirm {
          println!("{} Keeping existing database", style("ℹ").blue());
          return Ok(());
        }

        if !cli.accept_defaults {
          // Require typing INIT for final confirmation
          let input = dialoguer::Input::<String>::new()
            .with_prompt(format!(
              "{} Type {} to confirm reinitialization",
              style("⚠️").red(),
              style("INIT").red().bold()
            ))
            .interact_text()?;

          if input != "INIT" {
            println!("{} Operation cancelled, keeping existing database", style("ℹ").blue());
            return Ok(());
          }
        }

        println!("{} Removing existing database", style(WARNING).yellow());
        std::fs::remove_file(&path)?;

        // Also remove any auxiliary files (WAL, shared memory)
        let aux_files = glob::glob(&format!("{}*", path.display()))?;
        for file in aux_files.flatten() {
          std::fs::remove_file(file)?;
        }
      }

      // Create parent directories if they don't exist
      if let Some(parent) = path.parent() {
        trace!("Creating parent directories: {}", parent.display());
        std::fs::create_dir_all(parent)?;
      }

      println!(
        "{} Initializing database at: {}",
        style(ROCKET).cyan(),
        style(path.display()).yellow()
      );

      Database::open(&path).await?;

      println!("{} Database initialized successfully!", style(SUCCESS).green());
      Ok(())
    },

    Commands::Fetch { id, refresh } => {
      let resolver = open_resolver(cli.path, &cli.email).await?;
      let id = EntityId::new(&id)?;

      println!("{} Fetching work: {}", style(LOOKING_GLASS).cyan(), style(&id).yellow());

      let record =
        if refresh { resolver.refresh(&id).await? } else { resolver.resolve(&id).await? };
      debug!("Work record: {:?}", record);

      println!("\n{} Work details:", style(PAPER).green());
      println!(
        "   {} {}",
        style("Title:").green().bold(),
        style(record.title.as_deref().unwrap_or("<untitled>")).white()
      );
      if let Some(authorships) = &record.authorships {
        let authors = authorships
          .iter()
          .filter_map(|a| a.author.as_ref()?.display_name.as_deref())
          .collect::<Vec<_>>();
        if !authors.is_empty() {
          println!("   {} {}", style("Authors:").green().bold(), style(authors.join(", ")).white());
        }
      }
      if let Some(year) = record.publication_year {
        println!("   {} {}", style("Year:").green().bold(), style(year).white());
      }
      println!(
        "   {} {}",
        style("Cited by:").green().bold(),
        style(record.cited_by_count).white()
      );
      if let Some(doi) = &record.doi {
        println!("   {} {}", style("DOI:").green().bold(), style(doi).blue().underlined());
      }
      if let Some(url) = record.pdf_url() {
        println!("   {} {}", style("PDF URL:").green().bold(), style(url).blue().underlined());
      }
      Ok(())
    },

    Commands::Citations { id, limit, save_all } => {
      let resolver = open_resolver(cli.path, &cli.email).await?;
      run_crawl(resolver, &id, Direction::Citations, limit, save_all).await
    },

    Commands::References { id, limit, save_all } => {
      let resolver = open_resolver(cli.path, &cli.email).await?;
      run_crawl(resolver, &id, Direction::References, limit, save_all).await
    },

    Commands::Text { id, pdf_dir, skip_bad_pages } => {
      let resolver = open_resolver(cli.path, &cli.email).await?;
      let id = EntityId::new(&id)?;

      println!("{} Fetching work: {}", style(LOOKING_GLASS).cyan(), style(&id).yellow());
      let record = resolver.resolve(&id).await?;

      let pdf_dir = pdf_dir.unwrap_or_else(|| {
        Database::default_path().parent().map(PathBuf::from).unwrap_or_default().join("pdfs")
      });
      let policy =
        if skip_bad_pages { ExtractionPolicy::SkipBadPages } else { ExtractionPolicy::AllOrNothing };
      let pipeline = FulltextPipeline::new(&pdf_dir).with_policy(policy);

      println!("{} Acquiring full text into: {}", style(PAPER).cyan(), style(pdf_dir.display()).yellow());
      match pipeline.text_for(&record).await {
        TextOutcome::Extracted(text) => {
          println!("{} Extracted {} characters:\n", style(SUCCESS).green(), style(text.len()).yellow());
          println!("{text}");
        },
        TextOutcome::MissingDoi => {
          println!("{} Work has no DOI; cannot derive a file name", style(WARNING).yellow());
        },
        TextOutcome::NoPdfUrl => {
          println!("{} Work has no open-access PDF URL", style(WARNING).yellow());
        },
        TextOutcome::DownloadFailed => {
          println!("{} PDF download failed after all attempts", style(WARNING).yellow());
        },
        TextOutcome::ExtractionFailed => {
          println!("{} PDF downloaded but text extraction failed", style(WARNING).yellow());
        },
      }
      Ok(())
    },

    Commands::Clean => {
      let path = cli.path.unwrap_or_else(Database::default_path);
      if path.exists() {
        println!(
          "{} Database found at: {}",
          style(WARNING).yellow(),
          style(path.display()).yellow()
        );

        if !cli.accept_defaults {
          // First confirmation
          if !dialoguer::Confirm::new()
            .with_prompt("Are you sure you want to delete this database?")
            .default(false)
            .wait_for_newline(true)
            .interact()?
          {
            println!("{} Operation cancelled", style("✖").red());
            return Ok(());
          }

          // Require typing DELETE for final confirmation
          let input = dialoguer::Input::<String>::new()
            .with_prompt(format!(
              "{} Type {} to confirm deletion",
              style("⚠️").red(),
              style("DELETE").red().bold()
            ))
            .interact_text()?;

          if input != "DELETE" {
            println!("{} Operation cancelled", style("✖").red());
            return Ok(());
          }
        }

        println!(
          "{} Removing database: {}",
          style(WARNING).yellow(),
          style(path.display()).yellow()
        );
        std::fs::remove_file(&path)?;

        // Also remove any auxiliary files (WAL, shared memory)
        let aux_files = glob::glob(&format!("{}*", path.display()))?;
        for file in aux_files.flatten() {
          std::fs::remove_file(file)?;
        }
        println!("{} Database files cleaned", style(SUCCESS).green());
      } else {
        println!(
          "{} No database found at: {}",
          style(WARNING).yellow(),
          style(path.display()).yellow()
        );
      }
      Ok(())
    },
  }
}
