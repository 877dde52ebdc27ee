use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// File marker distinguishing a fresh session from a reload. The first
/// launch creates the marker; any later launch that finds it is a reload.
#[derive(Debug, Clone)]
pub struct SessionMarker {
    path: PathBuf,
}

impl SessionMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` when the marker already exists. Otherwise writes it and
    /// returns `false`.
    pub fn is_reload(&self) -> io::Result<bool> {
        if self.path.exists() {
            debug!(path = %self.path.display(), "session marker present");
            return Ok(true);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, b"fresh")?;
        debug!(path = %self.path.display(), "session marker written");
        Ok(false)
    }

    /// Remove the marker so the next launch counts as fresh.
    pub fn clear(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error),
            _ => Ok(()),
        }
    }
}
