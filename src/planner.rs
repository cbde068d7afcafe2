// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Target path planning and conflict resolution
//!
//! Turns configuration plus item metadata into `root / segments / filename`.
//! Apart from reading a file's creation time when an item carries no
//! timestamp, and existence checks for conflicts, this is pure computation.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::classifier::UNSORTED;
use crate::config::{AppConfig, ConflictPolicy, ExtensionGroup, RoutingConfig, Segment};
use crate::item::Item;
use crate::{Result, StowageError};

/// Group used when no configured group lists the extension
pub const DEFAULT_GROUP: &str = "Others";

const ILLEGAL_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Where an item should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPath {
    pub folder: PathBuf,
    pub full_path: PathBuf,
}

/// Outcome of applying the conflict policy to a planned path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Destination is free; write here
    Write(PathBuf),
    /// Destination exists and will be replaced
    Overwrite(PathBuf),
    /// Destination exists and must not be touched
    Skip(PathBuf),
}

/// Make a string safe as a single path segment: illegal characters and
/// control characters become `_`, trailing dots and spaces are trimmed, and
/// an empty result becomes `_`.
pub fn sanitize_segment(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| if ILLEGAL_CHARS.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    let trimmed = replaced.trim_end_matches(['.', ' ']);
    if trimmed.is_empty() || trimmed.trim().is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `name (n).ext` next to `path`
pub fn rename_candidate(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    path.with_file_name(name)
}

/// `path` itself if free, otherwise the first free `name (n).ext`, n = 1, 2, ...
pub fn next_free_name(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let mut n: u32 = 1;
    loop {
        let candidate = rename_candidate(path, n);
        if !candidate.exists() {
            return candidate;
        }
        n = n.saturating_add(1);
    }
}

/// Default project token for a date: `yyyyMM`
pub fn default_project(date: &DateTime<Utc>) -> String {
    format!("{:04}{:02}", date.year(), date.month())
}

/// The date an item is filed under: its `created_ts`, else the file's
/// creation (or modification) time, else now
pub fn item_date(item: &Item) -> DateTime<Utc> {
    if item.created_ts > 0 {
        if let Some(date) = Utc.timestamp_opt(item.created_ts, 0).single() {
            return date;
        }
    }
    std::fs::metadata(&item.path)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

/// Builds destination paths from configuration
#[derive(Debug, Clone)]
pub struct PathPlanner {
    root: Option<PathBuf>,
    routing: RoutingConfig,
    groups: Vec<ExtensionGroup>,
    conflict: ConflictPolicy,
}

impl PathPlanner {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            root: config.resolved_root(),
            routing: config.routing.clone(),
            groups: config.extension_groups.clone(),
            conflict: config.conflict,
        }
    }

    /// First configured group listing `extension` (case- and dot-insensitive)
    pub fn extension_group(&self, extension: &str) -> Option<&str> {
        let ext = extension.trim().trim_start_matches('.');
        if ext.is_empty() {
            return None;
        }
        self.groups
            .iter()
            .find(|g| {
                g.extensions
                    .iter()
                    .any(|e| e.trim().trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
            .map(|g| g.name.as_str())
    }

    /// Extension group or [`DEFAULT_GROUP`]
    pub fn group_or_default(&self, extension: &str) -> &str {
        self.extension_group(extension).unwrap_or(DEFAULT_GROUP)
    }

    /// Category segment: the classified category when there is one,
    /// otherwise the extension group
    pub fn category_for(&self, item: &Item) -> String {
        let category = item.category.trim();
        if category.is_empty() || category.eq_ignore_ascii_case(UNSORTED) {
            self.group_or_default(&item.extension).to_string()
        } else {
            category.to_string()
        }
    }

    /// Project segment: locked project, else the item's own, else `yyyyMM`
    pub fn project_for(&self, item: &Item, locked: Option<&str>, date: &DateTime<Utc>) -> String {
        if let Some(locked) = locked.map(str::trim).filter(|p| !p.is_empty()) {
            return locked.to_string();
        }
        let own = item.project.trim();
        if own.is_empty() {
            default_project(date)
        } else {
            own.to_string()
        }
    }

    /// Segment order for this plan. A locked project is always included and
    /// anchors the path: it moves to the front, the rest keep their order.
    fn active_segments(&self, project_locked: bool) -> Vec<Segment> {
        let mut order = self.routing.ordered_segments();
        if project_locked {
            order.retain(|s| *s != Segment::Project);
            order.insert(0, Segment::Project);
        }
        order
            .into_iter()
            .filter(|s| self.routing.enabled(*s) || (project_locked && *s == Segment::Project))
            .collect()
    }

    /// Sanitized folder segments below the root
    pub fn segments(&self, item: &Item, locked: Option<&str>) -> Vec<String> {
        let locked = locked.map(str::trim).filter(|p| !p.is_empty());
        let date = item_date(item);

        self.active_segments(locked.is_some())
            .into_iter()
            .map(|segment| {
                let raw = match segment {
                    Segment::Year => format!("{:04}", date.year()),
                    Segment::Quarter => format!("Q{}", date.month0() / 3 + 1),
                    Segment::Month => format!("{:02}", date.month()),
                    Segment::Week => format!("W{:02}", date.iso_week().week()),
                    Segment::Project => self.project_for(item, locked, &date),
                    Segment::Category => self.category_for(item),
                };
                sanitize_segment(&raw)
            })
            .collect()
    }

    /// Plan the destination for `item`
    pub fn plan(&self, item: &Item, locked: Option<&str>) -> Result<PlannedPath> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| StowageError::Config("no root directory configured".to_string()))?;

        if item.filename.trim().is_empty() {
            return Err(StowageError::Plan(format!(
                "item {} has no file name",
                item.path.display()
            )));
        }

        let mut folder = root.clone();
        for segment in self.segments(item, locked) {
            folder.push(segment);
        }
        let full_path = folder.join(sanitize_segment(&item.filename));
        debug!("Planned {:?} -> {:?}", item.path, full_path);

        Ok(PlannedPath { folder, full_path })
    }

    /// Apply the configured conflict policy to a planned path
    pub fn resolve_conflict(&self, planned: &Path) -> Resolution {
        resolve_conflict(planned, self.conflict)
    }
}

/// Apply `policy` to `planned`
pub fn resolve_conflict(planned: &Path, policy: ConflictPolicy) -> Resolution {
    if !planned.exists() {
        return Resolution::Write(planned.to_path_buf());
    }
    match policy {
        ConflictPolicy::Replace => Resolution::Overwrite(planned.to_path_buf()),
        ConflictPolicy::Skip => Resolution::Skip(planned.to_path_buf()),
        ConflictPolicy::Rename => Resolution::Write(next_free_name(planned)),
    }
}
