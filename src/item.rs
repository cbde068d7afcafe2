// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Item data model: the unit of work moving through the intake pipeline

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::StowageError;

/// Pipeline status of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    #[serde(rename = "inbox")]
    Inbox,
    #[serde(rename = "autosort-staging")]
    Staging,
    #[serde(rename = "auto-sorted")]
    AutoSorted,
    #[serde(rename = "committed")]
    Committed,
    #[serde(rename = "blacklist")]
    Blacklist,
    #[serde(rename = "error")]
    Error,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 6] = [
        ItemStatus::Inbox,
        ItemStatus::Staging,
        ItemStatus::AutoSorted,
        ItemStatus::Committed,
        ItemStatus::Blacklist,
        ItemStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Inbox => "inbox",
            ItemStatus::Staging => "autosort-staging",
            ItemStatus::AutoSorted => "auto-sorted",
            ItemStatus::Committed => "committed",
            ItemStatus::Blacklist => "blacklist",
            ItemStatus::Error => "error",
        }
    }

    /// Sorted items have reached their final location
    pub fn is_sorted(&self) -> bool {
        matches!(self, ItemStatus::AutoSorted | ItemStatus::Committed)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = StowageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ItemStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StowageError::InvalidStatus(s.to_string()))
    }
}

/// A file tracked by the item store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Surrogate key, 0 until first persisted
    pub id: i64,
    /// Where the file was when it entered the pipeline
    pub source_path: PathBuf,
    /// Current on-disk location
    pub path: PathBuf,
    pub filename: String,
    /// Lower-cased, without the dot
    pub extension: String,
    pub project: String,
    pub category: String,
    pub tags: Vec<String>,
    pub confidence: f64,
    pub status: ItemStatus,
    /// Epoch seconds, set once
    pub created_ts: i64,
    pub updated_ts: i64,
}

impl Item {
    /// A fresh, unpersisted inbox item for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = normalize_path(&path.into());
        let (filename, extension) = split_name(&path);
        Self {
            id: 0,
            source_path: path.clone(),
            path,
            filename,
            extension,
            project: String::new(),
            category: String::new(),
            tags: Vec::new(),
            confidence: 0.0,
            status: ItemStatus::Inbox,
            created_ts: 0,
            updated_ts: 0,
        }
    }

    /// Fill `filename`/`extension` from `path` when blank and clean up tags
    /// and confidence. Applied by the store on every write.
    pub fn normalize(&mut self) {
        self.path = normalize_path(&self.path);
        if self.source_path.as_os_str().is_empty() {
            self.source_path = self.path.clone();
        }
        let (filename, extension) = split_name(&self.path);
        if self.filename.trim().is_empty() {
            self.filename = filename;
        }
        if self.extension.trim().is_empty() {
            self.extension = extension;
        } else {
            self.extension = self.extension.trim_start_matches('.').to_lowercase();
        }
        self.tags = split_tags(&self.tags.join(","));
        self.confidence = clamp_confidence(self.confidence);
    }
}

/// Clamp to [0,1], mapping NaN to 0
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Split a raw tag string on `,;|`, trim, drop empties and case-insensitive
/// duplicates (first spelling wins)
pub fn split_tags(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split([',', ';', '|'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .map(String::from)
        .collect()
}

/// Canonical comma-joined tag string
pub fn normalize_tags(raw: &str) -> String {
    split_tags(raw).join(",")
}

/// Absolute, lexically normalized form of a path. Relative paths resolve
/// against the working directory; `.` is dropped and `..` pops a component.
pub fn normalize_path(path: &Path) -> PathBuf {
    if path.as_os_str().is_empty() {
        return PathBuf::new();
    }
    let absolute = if path.is_relative() {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// (filename, lower-cased extension without dot)
pub fn split_name(path: &Path) -> (String, String) {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    (filename, extension)
}

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}
