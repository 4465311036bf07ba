//! Spec file change notification.
//!
//! Watches the directory containing the spec file (non-recursively) and
//! filters events down to that one file name. Editors that save by writing a
//! temporary file and renaming it over the original replace the inode, which
//! would silently end a watch placed on the file itself.
//!
//! No debouncing is done here: one save may produce several
//! [`WatchEvent::Changed`] events.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::mock::error::{MockError, Result};

/// Capacity of the watcher's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Events emitted by the spec watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The spec file was written.
    Changed,
    /// The underlying watch mechanism failed.
    Error(String),
}

/// Watches one spec file for writes.
pub struct SpecWatcher {
    path: PathBuf,
    rx: mpsc::Receiver<WatchEvent>,
    /// Dropping the OS watcher releases the watch and closes the channel.
    inner: Option<RecommendedWatcher>,
}

impl SpecWatcher {
    /// Start watching `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Watch`] if the path has no parent or file name,
    /// or the OS watch cannot be installed.
    pub fn watch(path: &Path) -> Result<Self> {
        let watch_error = |reason: String| MockError::Watch {
            path: path.display().to_string(),
            reason,
        };

        let file_name = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| watch_error("path has no file name".to_string()))?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            Some(_) => PathBuf::from("."),
            None => return Err(watch_error("path has no parent directory".to_string())),
        };

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) if is_write_to(&event, &file_name) => WatchEvent::Changed,
                Ok(_) => return,
                Err(e) => WatchEvent::Error(e.to_string()),
            };
            // Runs on notify's own thread, outside the async runtime.
            let _ = tx.blocking_send(event);
        })
        .map_err(|e| watch_error(format!("failed to create file watcher: {e}")))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| watch_error(format!("failed to watch {}: {e}", dir.display())))?;

        tracing::debug!("Watching {} for changes", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            rx,
            inner: Some(watcher),
        })
    }

    /// A watcher fed by the returned sender instead of the filesystem.
    pub fn from_channel(path: impl Into<PathBuf>) -> (mpsc::Sender<WatchEvent>, Self) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let watcher = Self {
            path: path.into(),
            rx,
            inner: None,
        };
        (tx, watcher)
    }

    /// The watched path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the watcher has been closed.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }

    /// Take an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        self.rx.try_recv().ok()
    }

    /// Release the OS watch. Queued events can still be drained.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!("Stopped watching {}", self.path.display());
        }
        self.rx.close();
    }
}

/// Whether `event` is a content change to the file named `file_name`.
///
/// Renames count only on the destination side: a rename away from the spec
/// file leaves nothing for the mock server to read.
fn is_write_to(event: &Event, file_name: &OsString) -> bool {
    let matches_name = |p: &PathBuf| p.file_name() == Some(file_name.as_os_str());

    match event.kind {
        EventKind::Create(_)
        | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().any(matches_name)
        }
        // Paths are [from, to].
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().is_some_and(matches_name)
        }
        // Backends that cannot tell the two sides apart report each path
        // separately; only the one still present is the destination.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any | RenameMode::Other)) => event
            .paths
            .iter()
            .any(|p| matches_name(p) && p.exists()),
        _ => false,
    }
}
