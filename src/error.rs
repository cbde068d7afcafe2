// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Stowage

use thiserror::Error;

/// Result type alias for Stowage operations
pub type Result<T> = std::result::Result<T, StowageError>;

/// Stowage error types
#[derive(Error, Debug)]
pub enum StowageError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Classifier not available: {0}")]
    ClassifierUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Planning error: {0}")]
    Plan(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Pattern error: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl StowageError {
    /// I/O failures are worth retrying on the next commit cycle;
    /// everything else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self, StowageError::FileSystem(_))
    }
}
