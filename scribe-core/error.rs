use std::{
  io,
  path::PathBuf,
};

use serde::{
  Deserialize,
  Serialize,
};
use thiserror::Error;

/// Coarse classification shared by every layer of the editor core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
  FileNotFound,
  PermissionDenied,
  InvalidArgument,
  IoError,
  ParseError,
  OutOfRange,
  NotImplemented,
}

impl ErrorCode {
  pub fn from_io_kind(kind: io::ErrorKind) -> Self {
    match kind {
      io::ErrorKind::NotFound => Self::FileNotFound,
      io::ErrorKind::PermissionDenied => Self::PermissionDenied,
      io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => Self::InvalidArgument,
      _ => Self::IoError,
    }
  }

  /// Contract violations (bad offsets, bad arguments) are bugs in the caller;
  /// everything else may succeed when retried.
  pub fn is_recoverable(self) -> bool {
    !matches!(self, Self::OutOfRange | Self::InvalidArgument)
  }
}

impl std::fmt::Display for ErrorCode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::FileNotFound => "file not found",
      Self::PermissionDenied => "permission denied",
      Self::InvalidArgument => "invalid argument",
      Self::IoError => "i/o error",
      Self::ParseError => "parse error",
      Self::OutOfRange => "out of range",
      Self::NotImplemented => "not implemented",
    };
    f.write_str(name)
  }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
  #[error("file does not exist: {}", .0.display())]
  FileNotFound(PathBuf),
  #[error("permission denied: {}", .0.display())]
  PermissionDenied(PathBuf),
  #[error("invalid argument: {0}")]
  InvalidArgument(String),
  #[error("i/o error on {}: {source}", path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("not implemented: {0}")]
  NotImplemented(&'static str),
}

impl CoreError {
  /// Classify an I/O failure on `path` into the shared taxonomy.
  pub fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    let path = path.into();
    match ErrorCode::from_io_kind(source.kind()) {
      ErrorCode::FileNotFound => Self::FileNotFound(path),
      ErrorCode::PermissionDenied => Self::PermissionDenied(path),
      ErrorCode::InvalidArgument => Self::InvalidArgument(format!("{}: {source}", path.display())),
      _ => Self::Io { path, source },
    }
  }

  pub fn code(&self) -> ErrorCode {
    match self {
      Self::FileNotFound(_) => ErrorCode::FileNotFound,
      Self::PermissionDenied(_) => ErrorCode::PermissionDenied,
      Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
      Self::Io { .. } => ErrorCode::IoError,
      Self::NotImplemented(_) => ErrorCode::NotImplemented,
    }
  }
}
