// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Stowage
//!
//! The pipeline only ever reads an [`AppConfig`]; it is handed to each
//! component's constructor and never persisted by the pipeline itself.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Root of the sorted target tree
    #[serde(default = "default_root_dir")]
    pub root_dir: String,

    /// Hot folder watched for new files
    #[serde(default = "default_hot_folder")]
    pub hot_folder: String,

    /// Move or copy files on commit
    #[serde(default)]
    pub transfer: TransferMode,

    /// What to do when the planned destination already exists
    #[serde(default)]
    pub conflict: ConflictPolicy,

    /// Which path segments to build and in what order
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Extension -> group table used for the category segment
    #[serde(default = "default_extension_groups")]
    pub extension_groups: Vec<ExtensionGroup>,

    /// Classification settings
    #[serde(default)]
    pub classification: ClassificationConfig,

    /// Project every item is filed under, overriding the date default
    #[serde(default)]
    pub locked_project: Option<String>,

    /// Hot-folder watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Commit journal settings
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Move,
    Copy,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    Replace,
    #[default]
    Rename,
    Skip,
}

/// A routing segment of the target path
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Year,
    Quarter,
    Month,
    Week,
    Project,
    Category,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RoutingConfig {
    #[serde(default = "default_true")]
    pub use_year: bool,
    #[serde(default)]
    pub use_quarter: bool,
    #[serde(default)]
    pub use_month: bool,
    #[serde(default)]
    pub use_week: bool,
    #[serde(default)]
    pub use_project: bool,
    #[serde(default = "default_true")]
    pub use_category: bool,
    /// Declared segment order; segments missing from the list are appended
    /// in the default order
    #[serde(default = "default_segment_order")]
    pub segment_order: Vec<Segment>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExtensionGroup {
    pub name: String,
    pub extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassificationConfig {
    /// Items below this confidence stay staged on commit
    #[serde(default)]
    pub confidence_threshold: f64,
    /// Preferred category labels, checked before any other rule
    #[serde(default)]
    pub taxonomy: Vec<String>,
    #[serde(default)]
    pub ai: AiConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ai_url")]
    pub url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_ai_prompt")]
    pub prompt: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    /// Classify and commit as soon as a file is staged
    #[serde(default)]
    pub auto_commit: bool,
    /// Glob patterns (matched against the file name) never staged
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "default_stable_wait")]
    pub stable_wait_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: String,
}

// Default value functions
fn default_root_dir() -> String { "./sorted".to_string() }
fn default_hot_folder() -> String { "./inbox".to_string() }
fn default_true() -> bool { true }
fn default_ai_url() -> String { "http://localhost:11434/api/generate".to_string() }
fn default_ai_model() -> String { "llama3.2:3b".to_string() }
fn default_timeout() -> u64 { 30 }
fn default_retries() -> u32 { 1 }
fn default_stable_wait() -> u64 { 10 }
fn default_db_path() -> String { "stowage.db".to_string() }
fn default_history_path() -> String { "stowage_history.jsonl".to_string() }

fn default_ai_prompt() -> String {
    "Classify this file name into one short lowercase category label \
     (for example: invoice, contract, report, photo). \
     Return ONLY the label, or 'unsorted' if unsure.".to_string()
}

pub fn default_segment_order() -> Vec<Segment> {
    vec![
        Segment::Year,
        Segment::Quarter,
        Segment::Month,
        Segment::Week,
        Segment::Project,
        Segment::Category,
    ]
}

fn group(name: &str, extensions: &[&str]) -> ExtensionGroup {
    ExtensionGroup {
        name: name.to_string(),
        extensions: extensions.iter().map(|e| e.to_string()).collect(),
    }
}

pub fn default_extension_groups() -> Vec<ExtensionGroup> {
    vec![
        group("Documents", &["pdf", "doc", "docx", "odt", "rtf", "txt", "md"]),
        group("Spreadsheets", &["xls", "xlsx", "csv", "ods"]),
        group("Presentations", &["ppt", "pptx", "odp", "key"]),
        group("Images", &["jpg", "jpeg", "png", "gif", "webp", "heic", "bmp", "tiff", "svg"]),
        group("Audio", &["mp3", "wav", "flac", "ogg", "m4a"]),
        group("Videos", &["mp4", "mkv", "webm", "avi", "mov"]),
        group("Archives", &["zip", "tar", "gz", "7z", "rar"]),
        group("Code", &["rs", "py", "js", "ts", "go", "java", "c", "cpp", "h"]),
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            hot_folder: default_hot_folder(),
            transfer: TransferMode::default(),
            conflict: ConflictPolicy::default(),
            routing: RoutingConfig::default(),
            extension_groups: default_extension_groups(),
            classification: ClassificationConfig::default(),
            locked_project: None,
            watcher: WatcherConfig::default(),
            database: DatabaseConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            use_year: true,
            use_quarter: false,
            use_month: false,
            use_week: false,
            use_project: false,
            use_category: true,
            segment_order: default_segment_order(),
        }
    }
}

impl RoutingConfig {
    /// Whether a segment is switched on by its toggle
    pub fn enabled(&self, segment: Segment) -> bool {
        match segment {
            Segment::Year => self.use_year,
            Segment::Quarter => self.use_quarter,
            Segment::Month => self.use_month,
            Segment::Week => self.use_week,
            Segment::Project => self.use_project,
            Segment::Category => self.use_category,
        }
    }

    /// Declared order with duplicates dropped and missing segments appended
    pub fn ordered_segments(&self) -> Vec<Segment> {
        let mut order: Vec<Segment> = Vec::with_capacity(6);
        for seg in self.segment_order.iter().chain(default_segment_order().iter()) {
            if !order.contains(seg) {
                order.push(*seg);
            }
        }
        order
    }
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.0,
            taxonomy: Vec::new(),
            ai: AiConfig::default(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_ai_url(),
            model: default_ai_model(),
            timeout_secs: default_timeout(),
            retries: default_retries(),
            prompt: default_ai_prompt(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            auto_commit: false,
            ignore_patterns: Vec::new(),
            stable_wait_secs: default_stable_wait(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::StowageError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config.normalized())
        } else {
            info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Load configuration, falling back to defaults when the file is unreadable
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{}; falling back to default configuration", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Replace out-of-range or malformed values with sane defaults
    pub fn normalized(mut self) -> Self {
        let threshold = self.classification.confidence_threshold;
        if !threshold.is_finite() {
            warn!("Invalid confidence threshold {}, using 0.0", threshold);
            self.classification.confidence_threshold = 0.0;
        } else {
            self.classification.confidence_threshold = threshold.clamp(0.0, 1.0);
        }

        if self.root_dir.trim().is_empty() {
            warn!("Empty root directory, using {}", default_root_dir());
            self.root_dir = default_root_dir();
        }

        self.extension_groups.retain(|g| {
            let keep = !g.name.trim().is_empty();
            if !keep {
                warn!("Dropping extension group without a name");
            }
            keep
        });

        self.classification.taxonomy.retain(|t| !t.trim().is_empty());

        if let Some(project) = &self.locked_project {
            if project.trim().is_empty() {
                self.locked_project = None;
            }
        }
        self
    }

    /// Root directory as an absolute path (relative roots resolve against
    /// the working directory). `None` when no root is configured.
    pub fn resolved_root(&self) -> Option<PathBuf> {
        resolve_dir(&self.root_dir)
    }

    /// Hot folder as an absolute path
    pub fn resolved_hot_folder(&self) -> Option<PathBuf> {
        resolve_dir(&self.hot_folder)
    }
}

fn resolve_dir(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        return Some(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => Some(cwd.join(path)),
        Err(e) => {
            warn!("Cannot resolve {:?} against working directory: {}", raw, e);
            Some(path)
        }
    }
}
