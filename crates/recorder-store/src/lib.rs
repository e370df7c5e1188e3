//! File store backing the streaming recorder: resolves serve paths to
//! absolute locations under one root directory, creates empty target files
//! named from a hint (extension derived from the MIME type), and hands out
//! append-mode sinks.
//!
//! The store never deletes or truncates: targets grow by append only, and a
//! resumed recording reopens the same file. Created files are recorded in a
//! JSON index under the root so their MIME types survive restarts.

pub mod mime;

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Serve-path prefix for everything below the store root.
pub const SERVE_PREFIX: &str = "files";

const INDEX_FILE: &str = ".index.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error("file already exists: {0}")]
    Exists(String),
    #[error("file index corrupted: {0}")]
    Index(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One resolved target: the caller-visible serve path plus the writable
/// absolute location it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub serve_path: String,
    pub absolute_path: PathBuf,
    pub mime_type: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileIndex {
    files: Vec<FileRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileRecord {
    serve_path: String,
    mime_type: String,
    owner_id: Option<i64>,
    created_ms: u64,
}

/// Root-directory file store.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    index: Mutex<FileIndex>,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory and loading the
    /// index when one exists.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            let raw = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&raw)?
        } else {
            FileIndex::default()
        };
        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List folders available for new targets: `/` plus every subdirectory
    /// of the root, as serve-style relative paths.
    pub fn all_directories(&self) -> io::Result<Vec<String>> {
        let mut dirs = vec!["/".to_string()];
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let path = entry.path();
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    dirs.push(rel.to_string_lossy().replace('\\', "/"));
                }
                pending.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Resolve an existing target by its serve path.
    ///
    /// Falls back to a filesystem check when the index has no record, so
    /// recordings created before a restart can still be resumed.
    pub fn find_one(&self, serve_path: &str) -> Option<StoredFile> {
        let rel = serve_path.strip_prefix(SERVE_PREFIX)?.strip_prefix('/')?;
        if !name_is_safe(rel) {
            return None;
        }
        let absolute_path = self.root.join(rel);
        if !absolute_path.is_file() {
            return None;
        }
        let mime_type = {
            let index = lock(&self.index);
            index
                .files
                .iter()
                .find(|f| f.serve_path == serve_path)
                .map(|f| f.mime_type.clone())
        };
        Some(StoredFile {
            serve_path: serve_path.to_string(),
            absolute_path,
            mime_type,
        })
    }

    /// Create an empty target file named `<name>.<ext>` with the extension
    /// derived from `mime_type`, inside `folder` (or the root). Fails when
    /// the name collides; callers wanting uniqueness put a timestamp in the
    /// name (see [`now_millis`]).
    pub fn create_from_empty(
        &self,
        name: &str,
        mime_type: &str,
        owner_id: Option<i64>,
        folder: Option<&str>,
    ) -> Result<StoredFile, StoreError> {
        if name.is_empty() || !name_is_safe(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        let ext = mime::extension_for_mime(mime_type).unwrap_or("bin");
        let file_name = format!("{name}.{ext}");

        let (dir, rel) = match folder.filter(|f| !f.is_empty() && *f != "/") {
            Some(folder) => {
                let folder = folder.trim_matches('/');
                if !name_is_safe(folder) {
                    return Err(StoreError::InvalidName(folder.to_string()));
                }
                (self.root.join(folder), format!("{folder}/{file_name}"))
            }
            None => (self.root.clone(), file_name.clone()),
        };
        std::fs::create_dir_all(&dir)?;

        let absolute_path = dir.join(&file_name);
        let serve_path = format!("{SERVE_PREFIX}/{rel}");
        match OpenOptions::new().write(true).create_new(true).open(&absolute_path) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::Exists(serve_path));
            }
            Err(e) => return Err(e.into()),
        }

        {
            let mut index = lock(&self.index);
            index.files.push(FileRecord {
                serve_path: serve_path.clone(),
                mime_type: mime_type.to_string(),
                owner_id,
                created_ms: now_millis(),
            });
            self.save_index(&index)?;
        }
        tracing::debug!(serve_path = %serve_path, mime = %mime_type, "created empty target");

        Ok(StoredFile {
            serve_path,
            absolute_path,
            mime_type: Some(mime_type.to_string()),
        })
    }

    /// Open the target's sink in append mode. The file must already exist;
    /// append never creates or truncates.
    pub fn open_append(&self, file: &StoredFile) -> io::Result<File> {
        OpenOptions::new().append(true).open(&file.absolute_path)
    }

    fn save_index(&self, index: &FileIndex) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(index)?;
        std::fs::write(self.root.join(INDEX_FILE), raw)?;
        Ok(())
    }
}

/// Milliseconds since the Unix epoch, for generated target names.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Reject path traversal and absolute components in names and folders.
fn name_is_safe(name: &str) -> bool {
    !name.starts_with('/')
        && !name.contains('\\')
        && !name.contains("..")
        && !name.contains('\0')
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|err| err.into_inner())
}
