//! File I/O collaborator.
//!
//! Documents never touch `std::fs` directly; they go through a [`FileSystem`]
//! handed to them by the caller so tests can run against memory and hosts can
//! swap in remote or sandboxed storage.

use std::{
  collections::HashMap,
  io,
  path::{
    Path,
    PathBuf,
  },
};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{
  CoreError,
  ErrorCode,
  Result,
};

pub trait FileSystem: Send + Sync {
  /// Read the whole file as raw bytes. Content is opaque at this layer.
  fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

  /// Replace the file contents with `data`, creating it if needed.
  fn write_file(&self, path: &Path, data: &[u8]) -> Result<()>;

  fn exists(&self, path: &Path) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFileSystem;

impl FileSystem for NativeFileSystem {
  fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).map_err(|err| CoreError::from_io(path, err))?;
    debug!(path = %path.display(), bytes = bytes.len(), "read file");
    Ok(bytes)
  }

  fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).map_err(|err| CoreError::from_io(path, err))?;
    debug!(path = %path.display(), bytes = data.len(), "wrote file");
    Ok(())
  }

  fn exists(&self, path: &Path) -> bool {
    path.exists()
  }
}

/// In-memory file system. Individual paths can be made to fail with a given
/// error kind to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
  files:    Mutex<HashMap<PathBuf, Vec<u8>>>,
  failures: Mutex<HashMap<PathBuf, ErrorCode>>,
}

impl MemoryFileSystem {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_file(self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
    self.files.lock().insert(path.into(), contents.into());
    self
  }

  pub fn fail_with(&self, path: impl Into<PathBuf>, code: ErrorCode) {
    self.failures.lock().insert(path.into(), code);
  }

  pub fn clear_failure(&self, path: &Path) {
    self.failures.lock().remove(path);
  }

  pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
    self.files.lock().get(path).cloned()
  }

  fn injected_failure(&self, path: &Path) -> Option<CoreError> {
    let code = *self.failures.lock().get(path)?;
    let err = match code {
      ErrorCode::FileNotFound => CoreError::FileNotFound(path.to_path_buf()),
      ErrorCode::PermissionDenied => CoreError::PermissionDenied(path.to_path_buf()),
      ErrorCode::InvalidArgument => CoreError::InvalidArgument(path.display().to_string()),
      ErrorCode::NotImplemented => CoreError::NotImplemented("memory file system"),
      _ => CoreError::Io {
        path:   path.to_path_buf(),
        source: io::Error::other("injected failure"),
      },
    };
    Some(err)
  }
}

impl FileSystem for MemoryFileSystem {
  fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
    if let Some(err) = self.injected_failure(path) {
      return Err(err);
    }
    self
      .files
      .lock()
      .get(path)
      .cloned()
      .ok_or_else(|| CoreError::FileNotFound(path.to_path_buf()))
  }

  fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
    if let Some(err) = self.injected_failure(path) {
      return Err(err);
    }
    self.files.lock().insert(path.to_path_buf(), data.to_vec());
    Ok(())
  }

  fn exists(&self, path: &Path) -> bool {
    self.files.lock().contains_key(path)
  }
}
