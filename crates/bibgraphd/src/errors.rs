//! Error types for the bibgraphd CLI application.
//!
//! This module provides a comprehensive error type that encompasses all
//! possible failure modes when running the CLI, including:
//! - User interaction errors
//! - API and cache errors from the underlying library
//! - File system operations
//! - Pattern matching errors
//!
//! The errors are designed to be transparent, allowing the underlying error
//! details to be displayed to the user while maintaining proper error
//! handling and propagation.

use thiserror::Error;

/// Errors that can occur during CLI operations.
///
/// This enum wraps various error types from dependencies and the underlying
/// library into a single error type for the CLI application. It uses the
/// `transparent` error handling pattern to preserve the original error
/// messages and context.
#[derive(Error, Debug)]
pub enum BibgraphdErrors {
  /// Errors from user interaction dialogs
  #[error(transparent)]
  Dialoguer(#[from] dialoguer::Error),

  /// Errors from the underlying bibgraph library
  #[error(transparent)]
  Bibgraph(#[from] bibgraph::errors::BibgraphError),

  /// File system and IO operation errors
  #[error(transparent)]
  IO(#[from] std::io::Error),

  /// Glob pattern matching errors
  #[error(transparent)]
  Glob(#[from] glob::PatternError),
}
