// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Stowage: hot-folder intake and auto-sorting
//!
//! Files dropped into a hot folder are staged as items, classified into a
//! category and project, and committed into a dated folder tree under a
//! root directory. Every phase is persisted in SQLite so work survives
//! restarts.

pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod item;
pub mod ollama;
pub mod pipeline;
pub mod planner;
pub mod watcher;

pub use config::AppConfig;
pub use error::{Result, StowageError};
