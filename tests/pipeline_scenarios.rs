// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! End-to-end intake scenarios against a scratch directory and an
//! in-memory store.

use async_trait::async_trait;
use chrono::Datelike;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use stowage::classifier::AiClassifier;
use stowage::config::{AppConfig, ConflictPolicy};
use stowage::db::{Database, ItemStore};
use stowage::history::History;
use stowage::item::ItemStatus;
use stowage::pipeline::{CancelToken, Pipeline};
use stowage::planner::item_date;
use stowage::{Result, StowageError};

struct Scratch {
    dir: TempDir,
    inbox: PathBuf,
    root: PathBuf,
}

impl Scratch {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("inbox");
        let root = dir.path().join("sorted");
        fs::create_dir_all(&inbox).unwrap();
        Self { dir, inbox, root }
    }

    fn config(&self) -> AppConfig {
        AppConfig {
            root_dir: self.root.to_string_lossy().to_string(),
            hot_folder: self.inbox.to_string_lossy().to_string(),
            ..AppConfig::default()
        }
    }

    fn drop_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.inbox.join(name);
        fs::write(&path, content).unwrap();
        path
    }
}

fn pipeline(config: &AppConfig) -> Pipeline {
    Pipeline::new(config, Database::in_memory().unwrap(), None)
}

#[tokio::test]
async fn basic_stage_classify_commit() {
    let scratch = Scratch::new();
    let p = pipeline(&scratch.config());
    let cancel = CancelToken::never();
    let file = scratch.drop_file("invoice_202304.pdf", "%PDF-1.7");

    let staged = p.stage_only(&file, &cancel).await.unwrap().unwrap();
    assert_eq!(staged.status, ItemStatus::Inbox);
    assert_eq!(staged.extension, "pdf");

    let classified = p.classify_only(&file, &cancel).await.unwrap().unwrap();
    assert_eq!(classified.id, staged.id);
    assert_eq!(classified.category, "invoice");
    assert_eq!(classified.status, ItemStatus::Staging);

    let report = p.commit_pending(&cancel).await.unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(report.failed, 0);

    let year = item_date(&classified).year().to_string();
    let expected = scratch.root.join(year).join("invoice").join("invoice_202304.pdf");
    assert!(expected.exists());
    assert!(!file.exists());

    let item = p.store().get(staged.id).unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::AutoSorted);
    assert_eq!(item.path, expected);
    assert_eq!(item.source_path, file);

    // Nothing left to do
    let again = p.commit_pending(&cancel).await.unwrap();
    assert_eq!(again.committed, 0);
}

#[tokio::test]
async fn missing_source_is_marked_sorted_without_io() {
    let scratch = Scratch::new();
    let p = pipeline(&scratch.config());
    let cancel = CancelToken::never();
    let file = scratch.drop_file("contract_acme.docx", "terms");

    let item = p.classify_only(&file, &cancel).await.unwrap().unwrap();
    fs::remove_file(&file).unwrap();

    let report = p.commit_pending(&cancel).await.unwrap();
    assert_eq!(report.missing, 1);
    assert_eq!(report.committed, 0);
    assert!(!scratch.root.exists());

    let item = p.store().get(item.id).unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::AutoSorted);
    assert_eq!(item.path, file);
}

#[tokio::test]
async fn purge_drops_rows_without_files() {
    let scratch = Scratch::new();
    let p = pipeline(&scratch.config());
    let cancel = CancelToken::never();

    let files: Vec<PathBuf> = ["a.txt", "b.txt", "c.txt"]
        .iter()
        .map(|name| scratch.drop_file(name, name))
        .collect();
    for file in &files {
        p.stage_only(file, &cancel).await.unwrap();
    }
    fs::remove_file(&files[1]).unwrap();

    assert_eq!(p.store().purge_missing().unwrap(), 1);
    assert_eq!(p.store().count().unwrap(), 2);
    assert!(p.store().try_get_by_path(&files[1]).unwrap().is_none());
}

#[tokio::test]
async fn skip_never_overwrites() {
    let scratch = Scratch::new();
    let mut config = scratch.config();
    config.conflict = ConflictPolicy::Skip;
    let p = pipeline(&config);
    let cancel = CancelToken::never();
    let file = scratch.drop_file("meeting_notes.txt", "new");

    let item = p.classify_only(&file, &cancel).await.unwrap().unwrap();
    let planned = p.planner().plan(&item, None).unwrap();
    fs::create_dir_all(&planned.folder).unwrap();
    fs::write(&planned.full_path, "old").unwrap();

    let report = p.commit_pending(&cancel).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(fs::read_to_string(&planned.full_path).unwrap(), "old");
    assert!(file.exists());
    assert_eq!(
        p.store().get(item.id).unwrap().unwrap().status,
        ItemStatus::Staging
    );
}

#[tokio::test]
async fn rename_picks_next_free_suffix() {
    let scratch = Scratch::new();
    let p = pipeline(&scratch.config());
    let cancel = CancelToken::never();
    let file = scratch.drop_file("invoice_202304.pdf", "third");

    let item = p.classify_only(&file, &cancel).await.unwrap().unwrap();
    let planned = p.planner().plan(&item, None).unwrap();
    fs::create_dir_all(&planned.folder).unwrap();
    fs::write(&planned.full_path, "first").unwrap();
    fs::write(planned.folder.join("invoice_202304 (1).pdf"), "second").unwrap();

    let report = p.commit_pending(&cancel).await.unwrap();
    assert_eq!(report.committed, 1);

    let renamed = planned.folder.join("invoice_202304 (2).pdf");
    assert_eq!(fs::read_to_string(&renamed).unwrap(), "third");
    assert_eq!(fs::read_to_string(&planned.full_path).unwrap(), "first");
    let stored = p.store().get(item.id).unwrap().unwrap();
    assert_eq!(stored.path, renamed);
    assert_eq!(stored.filename, "invoice_202304 (2).pdf");
    assert_eq!(stored.extension, "pdf");
}

#[tokio::test]
async fn relative_and_absolute_paths_share_one_row() {
    let dir = tempfile::Builder::new()
        .prefix("stage-rel")
        .tempdir_in(".")
        .unwrap();
    let relative = PathBuf::from(".")
        .join(dir.path().file_name().unwrap())
        .join("a.pdf");
    fs::write(&relative, "x").unwrap();
    let absolute = std::env::current_dir().unwrap().join(&relative);

    let p = pipeline(&AppConfig::default());
    let cancel = CancelToken::never();
    let first = p.stage_only(&relative, &cancel).await.unwrap().unwrap();
    let second = p.stage_only(&absolute, &cancel).await.unwrap().unwrap();

    assert_eq!(first.id, second.id);
    assert!(first.path.is_absolute());
    assert_eq!(p.store().count().unwrap(), 1);
    assert!(p.store().try_get_by_path(&relative).unwrap().is_some());
}

#[tokio::test]
async fn locked_project_anchors_destination() {
    let scratch = Scratch::new();
    let mut config = scratch.config();
    config.locked_project = Some("Harbor Bridge".to_string());
    config.routing.use_year = false;
    let p = pipeline(&config);
    let cancel = CancelToken::never();
    let file = scratch.drop_file("scan_0001.png", "pixels");

    p.process(&file, &cancel).await.unwrap();
    let report = p.commit_pending(&cancel).await.unwrap();
    assert_eq!(report.committed, 1);
    assert!(scratch
        .root
        .join("Harbor Bridge")
        .join("scan")
        .join("scan_0001.png")
        .exists());
}

#[tokio::test]
async fn undo_restores_moved_file() {
    let scratch = Scratch::new();
    let history = History::new(scratch.dir.path().join("history.jsonl"));
    let p = pipeline(&scratch.config()).with_history(history);
    let cancel = CancelToken::never();
    let file = scratch.drop_file("tax_2023.pdf", "return");

    let item = p.process(&file, &cancel).await.unwrap().unwrap();
    p.commit_pending(&cancel).await.unwrap();
    assert!(!file.exists());

    let dry = p.undo_recent(1, true).await.unwrap();
    assert_eq!(dry.undone, 1);
    assert!(!file.exists());

    let report = p.undo_recent(5, false).await.unwrap();
    assert_eq!(report.undone, 1);
    assert_eq!(fs::read_to_string(&file).unwrap(), "return");

    let item = p.store().get(item.id).unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Inbox);
    assert_eq!(item.path, file);
    assert_eq!(item.filename, "tax_2023.pdf");

    // Already undone
    assert_eq!(p.undo_recent(1, false).await.unwrap().undone, 0);
}

#[tokio::test]
async fn undo_without_journal_is_a_config_error() {
    let scratch = Scratch::new();
    let p = pipeline(&scratch.config());
    assert!(matches!(
        p.undo_recent(1, false).await,
        Err(StowageError::Config(_))
    ));
}

struct EchoAi(Option<&'static str>);

#[async_trait]
impl AiClassifier for EchoAi {
    fn name(&self) -> &str {
        "echo"
    }

    async fn classify(&self, _text: &str) -> Result<String> {
        self.0
            .map(String::from)
            .ok_or_else(|| StowageError::ClassifierUnavailable("offline".to_string()))
    }
}

#[tokio::test]
async fn ai_answer_used_and_failure_falls_through() {
    let scratch = Scratch::new();
    let config = scratch.config();
    let cancel = CancelToken::never();

    let with_ai = Pipeline::new(
        &config,
        Database::in_memory().unwrap(),
        Some(Arc::new(EchoAi(Some("travel"))) as Arc<dyn AiClassifier>),
    );
    let file = scratch.drop_file("receipt_hotel.pdf", "stay");
    let item = with_ai.classify_only(&file, &cancel).await.unwrap().unwrap();
    assert_eq!(item.category, "travel");

    let broken = Pipeline::new(
        &config,
        Database::in_memory().unwrap(),
        Some(Arc::new(EchoAi(None)) as Arc<dyn AiClassifier>),
    );
    let item = broken.classify_only(&file, &cancel).await.unwrap().unwrap();
    assert_eq!(item.category, "invoice");
}
