// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Intake pipeline: Stage -> Classify -> Commit
//!
//! Each phase persists its result before returning, so a restart between
//! phases resumes from the item's last stored status. Commit runs under a
//! single-writer lock and never aborts the batch for one bad item.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::classifier::{AiClassifier, Classifier, MatchSource};
use crate::config::{AppConfig, TransferMode};
use crate::db::{Database, ItemStore};
use crate::history::{self, History, HistoryEntry};
use crate::item::{clamp_confidence, normalize_path, split_name, Item, ItemStatus};
use crate::planner::{item_date, PathPlanner, Resolution};
use crate::{Result, StowageError};

/// Cooperative cancellation signal, backed by a `watch` channel
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that is never cancelled
    pub fn never() -> Self {
        Self::default()
    }

    /// A token plus the sender that cancels it (send `true`)
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self::from_receiver(rx))
    }

    pub fn from_receiver(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }
}

/// Counts from one `commit_pending` run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    /// Files transferred (or already in place) and marked sorted
    pub committed: usize,
    /// Staged items whose source was gone, marked sorted without I/O
    pub missing: usize,
    /// Destination existed under the skip policy
    pub skipped: usize,
    /// Confidence below threshold, left staged
    pub deferred: usize,
    pub failed: usize,
    /// The run stopped early on cancellation
    pub cancelled: bool,
}

/// Counts from one undo run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UndoReport {
    pub undone: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum CommitOutcome {
    Committed,
    Missing,
    Skipped,
    Deferred,
}

/// Confidence assigned for a classification. A specific match beats an
/// extension guess, and a known extension group beats `Others`.
pub fn confidence_for(source: MatchSource, group_known: bool) -> f64 {
    match source {
        MatchSource::Taxonomy => 0.95,
        MatchSource::Keyword => 0.85,
        MatchSource::Ai => 0.8,
        MatchSource::Pattern => 0.75,
        MatchSource::Extension | MatchSource::Fallback => {
            if group_known {
                0.6
            } else {
                0.3
            }
        }
    }
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(18) // EXDEV
}

#[cfg(windows)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}

/// Rename, falling back to copy + remove across filesystems
pub fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!("Cross-device move {:?} -> {:?}, copying", source, target);
            fs::copy(source, target)?;
            fs::remove_file(source)
        }
        Err(e) => Err(e),
    }
}

/// Copy or move `source` to `target`, creating parent folders.
/// With `replace`, a move deletes the existing destination first
/// (best effort); a copy simply overwrites it.
pub fn transfer(source: &Path, target: &Path, mode: TransferMode, replace: bool) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    match mode {
        TransferMode::Copy => {
            fs::copy(source, target)?;
        }
        TransferMode::Move => {
            if replace && target.exists() {
                if let Err(e) = fs::remove_file(target) {
                    warn!("Could not remove {:?} before replacing it: {}", target, e);
                }
            }
            move_file(source, target)?;
        }
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn file_created_ts(meta: &fs::Metadata) -> i64 {
    meta.created()
        .or_else(|_| meta.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// The intake pipeline over an item store
pub struct Pipeline<S: ItemStore = Database> {
    store: S,
    classifier: Classifier,
    planner: PathPlanner,
    transfer: TransferMode,
    locked_project: Option<String>,
    threshold: f64,
    history: Option<History>,
    commit_lock: Mutex<()>,
}

impl<S: ItemStore> Pipeline<S> {
    /// Wire a pipeline from configuration, a store and an optional AI
    /// classifier
    pub fn new(config: &AppConfig, store: S, ai: Option<Arc<dyn AiClassifier>>) -> Self {
        Self {
            store,
            classifier: Classifier::new(config.classification.taxonomy.clone(), ai),
            planner: PathPlanner::new(config),
            transfer: config.transfer,
            locked_project: config
                .locked_project
                .as_ref()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            threshold: clamp_confidence(config.classification.confidence_threshold),
            history: None,
            commit_lock: Mutex::new(()),
        }
    }

    /// Record every commit in a journal (enables undo)
    pub fn with_history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn planner(&self) -> &PathPlanner {
        &self.planner
    }

    /// Record a file as an `inbox` item. No-op when the path is not an
    /// existing file; an existing row for the path is returned untouched.
    pub async fn stage_only(&self, path: &Path, cancel: &CancelToken) -> Result<Option<Item>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let path = normalize_path(path);

        let meta = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => {
                debug!("Not a regular file, not staging: {:?}", path);
                return Ok(None);
            }
            Err(e) => {
                debug!("Cannot stage {:?}: {}", path, e);
                return Ok(None);
            }
        };

        if let Some(existing) = self.store.try_get_by_path(&path)? {
            debug!("Already tracked as item {} ({})", existing.id, existing.status);
            return Ok(Some(existing));
        }

        // A copy leaves its source behind; don't file it twice
        if self.transfer == TransferMode::Copy {
            if let Some(copied) = self.store.try_get_by_source_path(&path)? {
                if copied.status.is_sorted() {
                    debug!("{:?} was already copied to {:?}", path, copied.path);
                    return Ok(Some(copied));
                }
            }
        }

        let mut item = Item::new(&path);
        item.created_ts = file_created_ts(&meta);
        let stored = self.store.upsert(&item)?;
        info!("Staged {:?} as item {}", path, stored.id);
        Ok(Some(stored))
    }

    /// Predict category, project and confidence for a file and move it to
    /// `autosort-staging`. Creates the item if the file is not yet tracked.
    /// Blacklisted and already sorted items are returned unchanged.
    pub async fn classify_only(&self, path: &Path, cancel: &CancelToken) -> Result<Option<Item>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let path = normalize_path(path);

        let mut item = match self.store.try_get_by_path(&path)? {
            Some(item) => item,
            None => match self.stage_only(&path, cancel).await? {
                Some(item) => item,
                None => return Ok(None),
            },
        };

        if item.status == ItemStatus::Blacklist || item.status.is_sorted() {
            debug!("Item {} is {}, not reclassifying", item.id, item.status);
            return Ok(Some(item));
        }

        let classification = self
            .classifier
            .classify_detailed(&item.filename, &item.extension)
            .await;
        let group_known = self.planner.extension_group(&item.extension).is_some();

        item.confidence = confidence_for(classification.source, group_known);
        item.category = classification.category;
        let date = item_date(&item);
        item.project = self
            .planner
            .project_for(&item, self.locked_project.as_deref(), &date);
        item.status = ItemStatus::Staging;

        let stored = self.store.upsert(&item)?;
        info!(
            "Classified {:?}: {} / {} ({:.0}%, {:?})",
            stored.filename,
            stored.category,
            stored.project,
            stored.confidence * 100.0,
            classification.source
        );
        Ok(Some(stored))
    }

    /// Stage and classify in one call
    pub async fn process(&self, path: &Path, cancel: &CancelToken) -> Result<Option<Item>> {
        match self.stage_only(path, cancel).await? {
            Some(_) => self.classify_only(path, cancel).await,
            None => Ok(None),
        }
    }

    /// Transfer every staged item to its planned destination.
    /// Per-item failures are logged and counted; the batch carries on.
    pub async fn commit_pending(&self, cancel: &CancelToken) -> Result<CommitReport> {
        let _writer = self.commit_lock.lock().await;

        let staged = self.store.query_by_status(ItemStatus::Staging).try_collect()?;
        let mut report = CommitReport::default();
        if staged.is_empty() {
            debug!("Nothing staged");
            return Ok(report);
        }
        info!("Committing {} staged items", staged.len());

        for item in staged {
            if cancel.is_cancelled() {
                info!("Commit cancelled after {} items", report.committed);
                report.cancelled = true;
                break;
            }

            let id = item.id;
            let source = item.path.clone();
            match self.commit_item(item).await {
                Ok(CommitOutcome::Committed) => report.committed += 1,
                Ok(CommitOutcome::Missing) => report.missing += 1,
                Ok(CommitOutcome::Skipped) => report.skipped += 1,
                Ok(CommitOutcome::Deferred) => report.deferred += 1,
                Err(e) if e.is_transient() => {
                    warn!("Failed to commit {:?}, left staged: {}", source, e);
                    report.failed += 1;
                }
                Err(e) => {
                    error!("Failed to commit {:?}: {}", source, e);
                    report.failed += 1;
                    if let Err(e) = self.store.set_status(id, ItemStatus::Error) {
                        warn!("Could not mark item {} as error: {}", id, e);
                    }
                }
            }
        }

        info!(
            "Commit finished: {} committed, {} missing, {} skipped, {} deferred, {} failed",
            report.committed, report.missing, report.skipped, report.deferred, report.failed
        );
        Ok(report)
    }

    async fn commit_item(&self, mut item: Item) -> Result<CommitOutcome> {
        let source = item.path.clone();

        if !source.exists() {
            info!("Source {:?} is gone, marking item {} sorted", source, item.id);
            item.status = ItemStatus::AutoSorted;
            self.store.upsert(&item)?;
            return Ok(CommitOutcome::Missing);
        }
        if !source.is_file() {
            return Err(StowageError::Plan(format!(
                "{} is not a regular file",
                source.display()
            )));
        }

        if clamp_confidence(item.confidence) < self.threshold {
            debug!(
                "Item {} below confidence threshold ({:.2} < {:.2})",
                item.id, item.confidence, self.threshold
            );
            return Ok(CommitOutcome::Deferred);
        }

        let planned = self.planner.plan(&item, self.locked_project.as_deref())?;

        if same_file(&source, &planned.full_path) {
            debug!("{:?} is already in place", source);
            item.status = ItemStatus::AutoSorted;
            self.store.upsert(&item)?;
            return Ok(CommitOutcome::Committed);
        }

        let target = match self.planner.resolve_conflict(&planned.full_path) {
            Resolution::Skip(existing) => {
                info!("{:?} exists, skipping {:?}", existing, source);
                return Ok(CommitOutcome::Skipped);
            }
            Resolution::Overwrite(target) => {
                transfer(&source, &target, self.transfer, true)?;
                target
            }
            Resolution::Write(target) => {
                transfer(&source, &target, self.transfer, false)?;
                target
            }
        };

        (item.filename, item.extension) = split_name(&target);
        item.path = target.clone();
        item.status = ItemStatus::AutoSorted;
        let stored = self.store.upsert(&item)?;
        info!("Committed {:?} -> {:?}", source, target);

        if let Some(history) = &self.history {
            let file_hash = history::hash_file(&target).unwrap_or_else(|e| {
                warn!("Could not hash {:?}: {}", target, e);
                String::new()
            });
            let entry = history::create_entry(
                stored.id,
                source,
                target,
                self.transfer,
                stored.category.clone(),
                stored.project.clone(),
                file_hash,
            );
            if let Err(e) = history.append(&entry) {
                warn!("Failed to write history entry: {}", e);
            }
        }

        Ok(CommitOutcome::Committed)
    }

    /// Reverse the newest `count` commits recorded in the journal. Moved
    /// files go back, copies are deleted, and the item returns to `inbox`.
    pub async fn undo_recent(&self, count: usize, dry_run: bool) -> Result<UndoReport> {
        let history = self
            .history
            .as_ref()
            .ok_or_else(|| StowageError::Config("no history journal configured".to_string()))?;
        let _writer = self.commit_lock.lock().await;

        let mut report = UndoReport::default();
        for entry in history.get_undoable()?.into_iter().take(count) {
            match self.undo_entry(history, &entry, dry_run) {
                Ok(true) => report.undone += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!("Failed to undo {:?}: {}", entry.new_path, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    fn undo_entry(&self, history: &History, entry: &HistoryEntry, dry_run: bool) -> Result<bool> {
        if !entry.new_path.exists() {
            warn!("File not found (may have been moved/deleted): {:?}", entry.new_path);
            return Ok(false);
        }
        if !entry.file_hash.is_empty() && history::hash_file(&entry.new_path)? != entry.file_hash {
            warn!("{:?} changed since it was committed, leaving it", entry.new_path);
            return Ok(false);
        }

        match entry.transfer {
            TransferMode::Move => {
                if entry.original_path.exists() {
                    warn!("Original path already exists: {:?}", entry.original_path);
                    return Ok(false);
                }
                if dry_run {
                    info!("Would move {:?} back to {:?}", entry.new_path, entry.original_path);
                    return Ok(true);
                }
                if let Some(parent) = entry.original_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                move_file(&entry.new_path, &entry.original_path)?;
            }
            TransferMode::Copy => {
                if dry_run {
                    info!("Would delete copy {:?}", entry.new_path);
                    return Ok(true);
                }
                fs::remove_file(&entry.new_path)?;
            }
        }

        history.mark_undone(&entry.id)?;
        if let Some(mut item) = self.store.get(entry.item_id)? {
            (item.filename, item.extension) = split_name(&entry.original_path);
            item.path = entry.original_path.clone();
            item.status = ItemStatus::Inbox;
            self.store.upsert(&item)?;
        }
        info!("Undone: {:?} -> {:?}", entry.new_path, entry.original_path);
        Ok(true)
    }

    /// Administrative status reset for a tracked path
    pub fn reset(&self, path: &Path, status: ItemStatus) -> Result<Item> {
        let item = self
            .store
            .try_get_by_path(path)?
            .ok_or_else(|| StowageError::NotFound(path.display().to_string()))?;
        self.store.set_status(item.id, status)?;
        info!("Item {} reset from {} to {}", item.id, item.status, status);
        Ok(Item { status, ..item })
    }

    /// Exclude a path from sorting. Untracked paths get a row so later
    /// staging finds and preserves it.
    pub fn blacklist(&self, path: &Path) -> Result<Item> {
        let mut item = match self.store.try_get_by_path(path)? {
            Some(item) => item,
            None => Item::new(path),
        };
        item.status = ItemStatus::Blacklist;
        let stored = self.store.upsert(&item)?;
        info!("Blacklisted {:?}", stored.path);
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConflictPolicy;
    use crate::db::{ItemFilter, PageCursor};
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Store that cancels the run as soon as the first item is sorted
    struct CancelAfterFirstSort {
        inner: Database,
        cancel: watch::Sender<bool>,
    }

    impl ItemStore for CancelAfterFirstSort {
        fn upsert(&self, item: &Item) -> Result<Item> {
            let stored = self.inner.upsert(item)?;
            if stored.status == ItemStatus::AutoSorted {
                let _ = self.cancel.send(true);
            }
            Ok(stored)
        }

        fn get(&self, id: i64) -> Result<Option<Item>> {
            self.inner.get(id)
        }

        fn fetch_page(&self, filter: &ItemFilter, after: Option<PageCursor>, limit: usize) -> Result<Vec<Item>> {
            self.inner.fetch_page(filter, after, limit)
        }

        fn query_distinct_projects(&self, filter: Option<&str>) -> Result<Vec<String>> {
            self.inner.query_distinct_projects(filter)
        }

        fn try_get_by_path(&self, path: &Path) -> Result<Option<Item>> {
            self.inner.try_get_by_path(path)
        }

        fn try_get_by_source_path(&self, path: &Path) -> Result<Option<Item>> {
            self.inner.try_get_by_source_path(path)
        }

        fn try_get_by_paths(&self, paths: &[PathBuf]) -> Result<Vec<Item>> {
            self.inner.try_get_by_paths(paths)
        }

        fn set_status(&self, id: i64, status: ItemStatus) -> Result<bool> {
            self.inner.set_status(id, status)
        }

        fn delete(&self, id: i64) -> Result<bool> {
            self.inner.delete(id)
        }

        fn purge_missing(&self) -> Result<usize> {
            self.inner.purge_missing()
        }

        fn status_counts(&self) -> Result<Vec<(ItemStatus, i64)>> {
            self.inner.status_counts()
        }
    }

    struct Fixture {
        _dir: TempDir,
        inbox: std::path::PathBuf,
        root: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("inbox");
        let root = dir.path().join("sorted");
        fs::create_dir_all(&inbox).unwrap();
        Fixture { _dir: dir, inbox, root }
    }

    fn config_for(fx: &Fixture) -> AppConfig {
        AppConfig {
            root_dir: fx.root.to_string_lossy().to_string(),
            ..AppConfig::default()
        }
    }

    fn pipeline(config: &AppConfig) -> Pipeline {
        Pipeline::new(config, Database::in_memory().unwrap(), None)
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(confidence_for(MatchSource::Taxonomy, false) > confidence_for(MatchSource::Keyword, false));
        assert!(confidence_for(MatchSource::Extension, true) > confidence_for(MatchSource::Extension, false));
        assert!(confidence_for(MatchSource::Fallback, true) > confidence_for(MatchSource::Fallback, false));
    }

    #[test]
    fn test_cancel_token() {
        assert!(!CancelToken::never().is_cancelled());
        let (tx, token) = CancelToken::channel();
        assert!(!token.is_cancelled());
        tx.send(true).unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_stage_missing_path_is_noop() {
        let fx = fixture();
        let p = pipeline(&config_for(&fx));
        let staged = p.stage_only(&fx.inbox.join("nope.txt"), &CancelToken::never()).await.unwrap();
        assert!(staged.is_none());
        assert!(p.stage_only(&fx.inbox, &CancelToken::never()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restage_preserves_row() {
        let fx = fixture();
        let p = pipeline(&config_for(&fx));
        let file = fx.inbox.join("report.txt");
        fs::write(&file, "q3").unwrap();
        let cancel = CancelToken::never();

        p.stage_only(&file, &cancel).await.unwrap();
        let classified = p.classify_only(&file, &cancel).await.unwrap().unwrap();
        let restaged = p.stage_only(&file, &cancel).await.unwrap().unwrap();

        assert_eq!(restaged.id, classified.id);
        assert_eq!(restaged.status, ItemStatus::Staging);
        assert_eq!(restaged.category, "report");
    }

    #[tokio::test]
    async fn test_classify_creates_and_uses_lock() {
        let fx = fixture();
        let mut config = config_for(&fx);
        config.locked_project = Some("Apollo".to_string());
        let p = pipeline(&config);
        let file = fx.inbox.join("IMG_2044.heic");
        fs::write(&file, "pixels").unwrap();

        let item = p.classify_only(&file, &CancelToken::never()).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Staging);
        assert_eq!(item.category, "photo");
        assert_eq!(item.project, "Apollo");
        assert_eq!(item.confidence, 0.85);
    }

    #[tokio::test]
    async fn test_unknown_extension_gets_low_confidence() {
        let fx = fixture();
        let p = pipeline(&config_for(&fx));
        let file = fx.inbox.join("blob.qqq");
        fs::write(&file, "?").unwrap();
        let item = p.classify_only(&file, &CancelToken::never()).await.unwrap().unwrap();
        assert_eq!(item.category, "unsorted");
        assert_eq!(item.confidence, 0.3);
    }

    #[tokio::test]
    async fn test_threshold_defers_low_confidence() {
        let fx = fixture();
        let mut config = config_for(&fx);
        config.classification.confidence_threshold = 0.5;
        let p = pipeline(&config);
        let file = fx.inbox.join("blob.qqq");
        fs::write(&file, "?").unwrap();
        let cancel = CancelToken::never();
        p.classify_only(&file, &cancel).await.unwrap();

        let report = p.commit_pending(&cancel).await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(report.committed, 0);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_copy_mode_keeps_source() {
        let fx = fixture();
        let mut config = config_for(&fx);
        config.transfer = TransferMode::Copy;
        let p = pipeline(&config);
        let file = fx.inbox.join("minutes.md");
        fs::write(&file, "notes").unwrap();
        let cancel = CancelToken::never();
        p.classify_only(&file, &cancel).await.unwrap();

        let report = p.commit_pending(&cancel).await.unwrap();
        assert_eq!(report.committed, 1);
        assert!(file.exists());

        let sorted = p.store().query_by_status(ItemStatus::AutoSorted).try_collect().unwrap();
        assert_eq!(sorted.len(), 1);
        assert!(sorted[0].path.starts_with(&fx.root));
        assert_eq!(fs::read_to_string(&sorted[0].path).unwrap(), "notes");

        // Sweeping the hot folder again finds the copy instead of a new item
        let again = p.process(&file, &cancel).await.unwrap().unwrap();
        assert_eq!(again.id, sorted[0].id);
        assert_eq!(p.commit_pending(&cancel).await.unwrap().committed, 0);
        assert_eq!(p.store().count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_overwrites_destination() {
        let fx = fixture();
        let mut config = config_for(&fx);
        config.conflict = ConflictPolicy::Replace;
        let p = pipeline(&config);
        let file = fx.inbox.join("budget.xlsx");
        fs::write(&file, "new").unwrap();
        let cancel = CancelToken::never();
        let item = p.classify_only(&file, &cancel).await.unwrap().unwrap();

        let planned = p.planner().plan(&item, None).unwrap();
        fs::create_dir_all(&planned.folder).unwrap();
        fs::write(&planned.full_path, "old").unwrap();

        let report = p.commit_pending(&cancel).await.unwrap();
        assert_eq!(report.committed, 1);
        assert_eq!(fs::read_to_string(&planned.full_path).unwrap(), "new");
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_cancelled_commit_stops_before_first_item() {
        let fx = fixture();
        let p = pipeline(&config_for(&fx));
        let cancel = CancelToken::never();
        for name in ["a.txt", "b.txt"] {
            let file = fx.inbox.join(name);
            fs::write(&file, name).unwrap();
            p.classify_only(&file, &cancel).await.unwrap();
        }

        let (tx, token) = CancelToken::channel();
        tx.send(true).unwrap();
        let report = p.commit_pending(&token).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.committed, 0);
        assert_eq!(p.store().query_by_status(ItemStatus::Staging).count(), 2);
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_keeps_partial_progress() {
        let fx = fixture();
        let (tx, token) = CancelToken::channel();
        let store = CancelAfterFirstSort {
            inner: Database::in_memory().unwrap(),
            cancel: tx,
        };
        let p = Pipeline::new(&config_for(&fx), store, None);

        let never = CancelToken::never();
        let files: Vec<_> = ["one.txt", "two.txt", "three.txt"]
            .iter()
            .map(|name| {
                let file = fx.inbox.join(name);
                fs::write(&file, name).unwrap();
                file
            })
            .collect();
        for file in &files {
            p.classify_only(file, &never).await.unwrap();
        }

        let report = p.commit_pending(&token).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.committed, 1);

        let sorted = p.store().inner.query_by_status(ItemStatus::AutoSorted).try_collect().unwrap();
        assert_eq!(sorted.len(), 1);
        assert!(sorted[0].path.starts_with(&fx.root));
        assert!(sorted[0].path.exists());
        assert!(!sorted[0].source_path.exists());
        assert_eq!(p.store().inner.query_by_status(ItemStatus::Staging).count(), 2);
        assert_eq!(files.iter().filter(|f| f.exists()).count(), 2);
    }

    #[tokio::test]
    async fn test_planning_error_marks_item_error() {
        let fx = fixture();
        let mut config = config_for(&fx);
        config.root_dir = String::new();
        let p = pipeline(&config);
        let file = fx.inbox.join("x.txt");
        fs::write(&file, "x").unwrap();
        let cancel = CancelToken::never();
        let item = p.classify_only(&file, &cancel).await.unwrap().unwrap();

        let report = p.commit_pending(&cancel).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(p.store().get(item.id).unwrap().unwrap().status, ItemStatus::Error);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_blacklist_is_not_reclassified() {
        let fx = fixture();
        let p = pipeline(&config_for(&fx));
        let file = fx.inbox.join("secret.pdf");
        fs::write(&file, "x").unwrap();
        let cancel = CancelToken::never();

        p.blacklist(&file).unwrap();
        let item = p.classify_only(&file, &cancel).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Blacklist);
        let report = p.commit_pending(&cancel).await.unwrap();
        assert_eq!(report, CommitReport::default());
    }

    #[tokio::test]
    async fn test_reset_unknown_path() {
        let fx = fixture();
        let p = pipeline(&config_for(&fx));
        assert!(matches!(
            p.reset(&fx.inbox.join("ghost"), ItemStatus::Inbox),
            Err(StowageError::NotFound(_))
        ));
    }
}
