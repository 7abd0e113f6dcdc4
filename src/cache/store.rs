//! SC-023: Artifact stores — where cached script text lives.
//!
//! A store holds the full text of one artifact (source plus trailer). File
//! stores write atomically: temp file, then rename.

use crate::core::error::{Result, ScriptError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub trait ArtifactStore: Send + Sync {
    /// Display name, used in logs and errors.
    fn name(&self) -> &str;

    fn load(&self) -> Result<String>;

    fn save(&self, text: &str) -> Result<()>;

    fn is_writable(&self) -> bool;
}

/// Store backed by a file on disk.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    name: String,
    writable: bool,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self {
            path,
            name,
            writable: true,
        }
    }

    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            writable: false,
            ..Self::new(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn io(path: &Path) -> impl FnOnce(std::io::Error) -> ScriptError {
    let path = path.to_path_buf();
    move |source| ScriptError::Io { path, source }
}

/// Write `text` to `path` atomically (write to temp, then rename).
pub fn write_atomic(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io(parent))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    std::fs::write(&tmp_path, text).map_err(io(&tmp_path))?;
    std::fs::rename(&tmp_path, path).map_err(io(path))?;
    Ok(())
}

impl ArtifactStore for FileStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<String> {
        std::fs::read_to_string(&self.path).map_err(io(&self.path))
    }

    fn save(&self, text: &str) -> Result<()> {
        if !self.writable {
            return Err(ScriptError::Persist {
                artifact: self.name.clone(),
                message: "store is read-only".to_string(),
            });
        }
        write_atomic(&self.path, text)
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}

/// In-memory store, mainly for embedding and tests.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    text: Mutex<String>,
    writable: bool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            text: Mutex::new(text.to_string()),
            writable: true,
            saves: AtomicUsize::new(0),
        }
    }

    pub fn read_only(name: &str, text: &str) -> Self {
        Self {
            writable: false,
            ..Self::new(name, text)
        }
    }

    pub fn text(&self) -> String {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl ArtifactStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<String> {
        Ok(self.text())
    }

    fn save(&self, text: &str) -> Result<()> {
        if !self.writable {
            return Err(ScriptError::Persist {
                artifact: self.name.clone(),
                message: "store is read-only".to_string(),
            });
        }
        *self.text.lock().unwrap_or_else(|e| e.into_inner()) = text.to_string();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}
