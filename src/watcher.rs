// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Hot-folder watcher

use glob::Pattern;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::Result;

/// What the hot folder reports
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// A file appeared (created, or renamed into the folder)
    Arrived(PathBuf),
    /// A file left the folder
    Removed(PathBuf),
    Error(String),
}

/// Non-recursive notify watcher over a single hot folder
pub struct HotFolderWatcher {
    _watcher: RecommendedWatcher,
    folder: PathBuf,
    events: Receiver<notify::Result<Event>>,
}

impl HotFolderWatcher {
    /// Start watching `folder`, creating it if needed
    pub fn start(folder: &Path) -> Result<Self> {
        if !folder.exists() {
            std::fs::create_dir_all(folder)?;
            info!("Created hot folder: {:?}", folder);
        }

        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(tx, Config::default().with_poll_interval(Duration::from_secs(2)))?;
        watcher.watch(folder, RecursiveMode::NonRecursive)?;
        info!("Watching: {:?}", folder);

        Ok(Self {
            _watcher: watcher,
            folder: folder.to_path_buf(),
            events: rx,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Next relevant event, or `None` after `timeout` (or for events that
    /// do not change the folder's contents)
    pub fn next_event(&self, timeout: Duration) -> Option<WatchEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(Ok(event)) => classify_event(event),
            Ok(Err(e)) => Some(WatchEvent::Error(e.to_string())),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(WatchEvent::Error("Watcher disconnected".to_string())),
        }
    }
}

/// Map a notify event onto the hot folder's view. A rename reports its
/// destination, so files moved into the folder count as arrivals; content
/// modifications are ignored since `wait_for_stable` covers writes.
fn classify_event(event: Event) -> Option<WatchEvent> {
    match event.kind {
        EventKind::Create(_) => event.paths.first().cloned().map(WatchEvent::Arrived),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.first().cloned().map(WatchEvent::Removed)
        }
        EventKind::Modify(ModifyKind::Name(_)) => event.paths.last().cloned().map(WatchEvent::Arrived),
        EventKind::Remove(_) => event.paths.first().cloned().map(WatchEvent::Removed),
        _ => None,
    }
}

/// User-configured file name patterns that are never staged
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    patterns: Vec<Pattern>,
}

impl IgnoreList {
    /// Compile patterns, skipping (and logging) invalid ones
    pub fn new(raw: &[String]) -> Self {
        let patterns = raw
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Ignoring invalid pattern {:?}: {}", p, e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn matches(&self, filename: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(filename))
    }
}

/// Check if a file should be staged
pub fn should_process(path: &Path, ignore: &IgnoreList) -> bool {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };

    // Skip hidden files
    if filename.starts_with('.') {
        return false;
    }

    // Skip temporary files
    let temp_extensions = [".tmp", ".part", ".crdownload", ".partial", ".download"];
    for ext in &temp_extensions {
        if filename.ends_with(ext) {
            return false;
        }
    }

    // Skip system files
    let skip_names = ["desktop.ini", "thumbs.db", ".ds_store"];
    if skip_names.iter().any(|n| filename.eq_ignore_ascii_case(n)) {
        return false;
    }

    !ignore.matches(filename)
}

/// Wait for file to be stable (not being written)
pub async fn wait_for_stable(path: &Path, max_wait: Duration) -> bool {
    let check_interval = Duration::from_millis(500);
    let start = std::time::Instant::now();

    let mut last_size = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return false,
    };

    loop {
        tokio::time::sleep(check_interval).await;

        // Check if we've exceeded max wait time
        if start.elapsed() > max_wait {
            warn!("File stability check timed out for {:?}", path);
            return true; // Proceed anyway
        }

        // Check if file still exists
        let current_size = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            Err(_) => return false, // File was deleted
        };

        // If size hasn't changed, file is stable
        if current_size == last_size {
            return true;
        }

        last_size = current_size;
        debug!("File {:?} still being written, size: {}", path, current_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::CreateKind;

    #[test]
    fn test_should_process_skips_noise() {
        let none = IgnoreList::default();
        assert!(should_process(Path::new("/hot/invoice.pdf"), &none));
        assert!(!should_process(Path::new("/hot/.hidden"), &none));
        assert!(!should_process(Path::new("/hot/movie.mp4.part"), &none));
        assert!(!should_process(Path::new("/hot/Thumbs.db"), &none));
    }

    #[test]
    fn test_ignore_patterns() {
        let ignore = IgnoreList::new(&["*.lnk".to_string(), "[".to_string(), "~$*".to_string()]);
        assert!(!should_process(Path::new("/hot/shortcut.lnk"), &ignore));
        assert!(!should_process(Path::new("/hot/~$report.docx"), &ignore));
        assert!(should_process(Path::new("/hot/report.docx"), &ignore));
    }

    #[test]
    fn test_event_mapping() {
        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/hot/a.pdf"));
        assert_eq!(classify_event(created), Some(WatchEvent::Arrived(PathBuf::from("/hot/a.pdf"))));

        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/hot/a.part"))
            .add_path(PathBuf::from("/hot/a.pdf"));
        assert_eq!(classify_event(renamed), Some(WatchEvent::Arrived(PathBuf::from("/hot/a.pdf"))));

        let moved_out = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/hot/b.pdf"));
        assert_eq!(classify_event(moved_out), Some(WatchEvent::Removed(PathBuf::from("/hot/b.pdf"))));

        let written = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(PathBuf::from("/hot/a.pdf"));
        assert_eq!(classify_event(written), None);
    }

    #[test]
    fn test_start_creates_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let hot = dir.path().join("hot");
        let watcher = HotFolderWatcher::start(&hot).unwrap();
        assert!(hot.is_dir());
        assert_eq!(watcher.folder(), hot.as_path());
        assert_eq!(watcher.next_event(Duration::from_millis(10)), None);
    }

    #[tokio::test]
    async fn test_wait_for_stable_on_missing_file() {
        assert!(!wait_for_stable(Path::new("/definitely/not/here"), Duration::from_secs(1)).await);
    }
}
