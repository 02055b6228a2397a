//! In-memory runtime.

use async_trait::async_trait;
use parking_lot::RwLock;
use path_clean::PathClean;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{FileMetadata, Runtime, RuntimeError, RuntimeResult};

#[derive(Debug, Clone)]
struct MemoryFile {
    content: Vec<u8>,
    modified: u64,
}

/// Files held in memory with explicit modification times.
///
/// Directories exist implicitly as parents of files. Cloning shares the
/// underlying storage, so a test can keep a handle and edit files while a
/// tracer reads them.
#[derive(Debug, Clone)]
pub struct MemoryRuntime {
    files: Arc<RwLock<BTreeMap<PathBuf, MemoryFile>>>,
    cwd: PathBuf,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new("/")
    }
}

impl MemoryRuntime {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            files: Arc::new(RwLock::new(BTreeMap::new())),
            cwd: cwd.into(),
        }
    }

    fn normalize(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.clean()
        } else {
            self.cwd.join(path).clean()
        }
    }

    /// Add or replace a file with modification time `1`.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.add_file_at(path, content, 1);
    }

    /// Add or replace a file with an explicit modification time.
    pub fn add_file_at(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>, modified: u64) {
        let path = self.normalize(path.as_ref());
        self.files.write().insert(
            path,
            MemoryFile {
                content: content.into(),
                modified,
            },
        );
    }

    /// Bump a file's modification time. Returns `false` if it does not exist.
    pub fn touch(&self, path: impl AsRef<Path>) -> bool {
        let path = self.normalize(path.as_ref());
        match self.files.write().get_mut(&path) {
            Some(file) => {
                file.modified += 1;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, path: impl AsRef<Path>) -> bool {
        let path = self.normalize(path.as_ref());
        self.files.write().remove(&path).is_some()
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.files
            .read()
            .keys()
            .any(|file| file != path && file.starts_with(path))
    }
}

#[async_trait]
impl Runtime for MemoryRuntime {
    async fn read_file(&self, path: &Path) -> RuntimeResult<Vec<u8>> {
        let normalized = self.normalize(path);
        self.files
            .read()
            .get(&normalized)
            .map(|file| file.content.clone())
            .ok_or(RuntimeError::FileNotFound(normalized))
    }

    async fn metadata(&self, path: &Path) -> RuntimeResult<FileMetadata> {
        let normalized = self.normalize(path);
        if let Some(file) = self.files.read().get(&normalized) {
            return Ok(FileMetadata {
                size: file.content.len() as u64,
                is_dir: false,
                is_file: true,
                modified: Some(file.modified),
            });
        }
        if self.is_dir(&normalized) {
            return Ok(FileMetadata {
                size: 0,
                is_dir: true,
                is_file: false,
                modified: None,
            });
        }
        Err(RuntimeError::FileNotFound(normalized))
    }

    async fn read_dir(&self, path: &Path) -> RuntimeResult<Vec<String>> {
        let normalized = self.normalize(path);
        let mut names: Vec<String> = Vec::new();
        for file in self.files.read().keys() {
            let Ok(rest) = file.strip_prefix(&normalized) else {
                continue;
            };
            if let Some(first) = rest.components().next() {
                let name = first.as_os_str().to_string_lossy().into_owned();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        if names.is_empty() {
            return Err(RuntimeError::FileNotFound(normalized));
        }
        Ok(names)
    }

    fn exists(&self, path: &Path) -> bool {
        let normalized = self.normalize(path);
        let is_file = self.files.read().contains_key(&normalized);
        is_file || self.is_dir(&normalized)
    }

    fn get_cwd(&self) -> RuntimeResult<PathBuf> {
        Ok(self.cwd.clone())
    }
}
