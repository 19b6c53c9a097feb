//! Crash-safe whole-file replacement.
//!
//! Writers produce a temp file in the target directory and rename it over
//! the destination, so readers observe either the previous or the new full
//! body, never a partial one. A per-path lock table serializes access
//! within the process; the node runs one process per home directory, so no
//! cross-process locking is needed.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

static LOCKS: Mutex<BTreeMap<PathBuf, Arc<Mutex<()>>>> = Mutex::new(BTreeMap::new());

fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    let mut table = LOCKS.lock();
    table.entry(path.to_path_buf()).or_default().clone()
}

/// A whole-file read/write handle with atomic replace.
#[derive(Clone, Debug)]
pub struct AtomicFile {
    path: PathBuf,
}

impl AtomicFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the full file body.
    pub fn read(&self) -> io::Result<String> {
        let lock = lock_for(&self.path);
        let _guard = lock.lock();
        std::fs::read_to_string(&self.path)
    }

    /// Replace the full file body via write-temp-then-rename.
    pub fn write(&self, content: &str) -> io::Result<()> {
        let lock = lock_for(&self.path);
        let _guard = lock.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension(format!("tmp.{}", std::process::id()));
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)
    }

    /// Delete the file if present.
    pub fn remove(&self) -> io::Result<()> {
        let lock = lock_for(&self.path);
        let _guard = lock.lock();
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
