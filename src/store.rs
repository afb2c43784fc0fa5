//! Persistence for the notified-set and badge documents.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StateError;
use crate::types::{BadgeFormat, BadgeState, NotifiedState};

/// Storage for the state a run reads once and writes once.
pub trait StateStore: Send + Sync {
    /// Loads the notified set. Missing or malformed data yields an empty set.
    fn load_notified(&self) -> Result<NotifiedState, StateError>;

    /// Replaces the stored notified set.
    fn save_notified(&self, state: &NotifiedState) -> Result<(), StateError>;

    /// Replaces the stored badge document.
    fn save_badge(&self, badge: &BadgeState) -> Result<(), StateError>;
}

/// JSON files on disk, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileStore {
    notified_path: PathBuf,
    badge_path: PathBuf,
    badge_format: BadgeFormat,
}

impl FileStore {
    pub fn new(notified_path: impl Into<PathBuf>, badge_path: impl Into<PathBuf>) -> Self {
        Self {
            notified_path: notified_path.into(),
            badge_path: badge_path.into(),
            badge_format: BadgeFormat::default(),
        }
    }

    pub fn badge_format(mut self, format: BadgeFormat) -> Self {
        self.badge_format = format;
        self
    }

    pub fn notified_path(&self) -> &Path {
        &self.notified_path
    }

    pub fn badge_path(&self) -> &Path {
        &self.badge_path
    }
}

impl StateStore for FileStore {
    fn load_notified(&self) -> Result<NotifiedState, StateError> {
        let path = &self.notified_path;
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No notified state yet, starting empty");
                return Ok(NotifiedState::new());
            }
            Err(e) => {
                return Err(StateError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };

        match serde_json::from_str(&content) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Notified state is malformed, starting empty"
                );
                Ok(NotifiedState::new())
            }
        }
    }

    fn save_notified(&self, state: &NotifiedState) -> Result<(), StateError> {
        write_json_atomic(&self.notified_path, state)
    }

    fn save_badge(&self, badge: &BadgeState) -> Result<(), StateError> {
        let document = badge.to_document(self.badge_format)?;
        write_json_atomic(&self.badge_path, &document)
    }
}

/// Writes pretty JSON to a sibling temp file and renames it over `path`.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StateError> {
    let io_error = |source: std::io::Error| StateError::Io {
        path: path.display().to_string(),
        source,
    };

    let mut content = serde_json::to_string_pretty(value)?;
    content.push('\n');

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(io_error)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(io_error)?;
    tmp.write_all(content.as_bytes()).map_err(io_error)?;
    tmp.as_file().sync_all().map_err(io_error)?;
    tmp.persist(path).map_err(|source| StateError::Persist {
        path: path.display().to_string(),
        source,
    })?;

    debug!(path = %path.display(), "Wrote state file");
    Ok(())
}

/// In-process store, useful for tests and for embedding the poller elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    notified: Mutex<NotifiedState>,
    badge: Mutex<Option<BadgeState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notified(state: NotifiedState) -> Self {
        Self {
            notified: Mutex::new(state),
            badge: Mutex::new(None),
        }
    }

    /// Returns a copy of the stored notified set.
    pub fn notified(&self) -> NotifiedState {
        self.notified
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Returns the last saved badge, if any.
    pub fn badge(&self) -> Option<BadgeState> {
        *self.badge.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateStore for MemoryStore {
    fn load_notified(&self) -> Result<NotifiedState, StateError> {
        Ok(self.notified())
    }

    fn save_notified(&self, state: &NotifiedState) -> Result<(), StateError> {
        *self.notified.lock().unwrap_or_else(|e| e.into_inner()) = state.clone();
        Ok(())
    }

    fn save_badge(&self, badge: &BadgeState) -> Result<(), StateError> {
        *self.badge.lock().unwrap_or_else(|e| e.into_inner()) = Some(*badge);
        Ok(())
    }
}
