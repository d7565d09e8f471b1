use std::{
  path::{
    Path,
    PathBuf,
  },
  sync::Arc,
};

use thiserror::Error;

/// Location of a document as the language server sees it.
///
/// Only local files are supported. Cloning is cheap: the path sits behind an
/// `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum Uri {
  File(Arc<Path>),
}

impl Uri {
  /// Build a file uri, resolving relative paths against the working dir.
  pub fn from_path(path: &Path) -> Result<Self, UrlConversionError> {
    let absolute = if path.is_absolute() {
      path.to_path_buf()
    } else {
      std::env::current_dir()
        .map_err(|_| UrlConversionError::PathToUrlFailed(path.into()))?
        .join(path)
    };
    Ok(Self::File(absolute.into()))
  }

  pub fn to_url(&self) -> Result<url::Url, UrlConversionError> {
    match self {
      Uri::File(path) => {
        url::Url::from_file_path(path)
          .map_err(|()| UrlConversionError::PathToUrlFailed(Arc::clone(path)))
      },
    }
  }

  pub fn as_path(&self) -> Option<&Path> {
    match self {
      Self::File(path) => Some(path),
    }
  }
}

impl From<PathBuf> for Uri {
  fn from(path: PathBuf) -> Self {
    Self::File(path.into())
  }
}

impl std::fmt::Display for Uri {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.to_url() {
      Ok(url) => write!(f, "{url}"),
      Err(_) => {
        match self {
          Self::File(path) => write!(f, "file://{}", path.display()),
        }
      },
    }
  }
}

#[derive(Debug, Error)]
pub enum UrlConversionError {
  #[error("unsupported scheme '{scheme}' in URL {url}")]
  UnsupportedScheme { scheme: String, url: url::Url },

  #[error("unable to convert URL to file path: {0}")]
  UnableToConvert(url::Url),

  #[error("unable to convert path to URL: {}", .0.display())]
  PathToUrlFailed(Arc<Path>),

  #[error("malformed URL '{0}'")]
  Malformed(String),
}

fn convert_url_to_uri(url: &url::Url) -> Result<Uri, UrlConversionError> {
  if url.scheme() == "file" {
    url
      .to_file_path()
      .map(|path| Uri::File(path.into()))
      .map_err(|_| UrlConversionError::UnableToConvert(url.clone()))
  } else {
    Err(UrlConversionError::UnsupportedScheme {
      scheme: url.scheme().to_string(),
      url:    url.clone(),
    })
  }
}

impl TryFrom<url::Url> for Uri {
  type Error = UrlConversionError;

  fn try_from(url: url::Url) -> Result<Self, Self::Error> {
    convert_url_to_uri(&url)
  }
}

impl TryFrom<&url::Url> for Uri {
  type Error = UrlConversionError;

  fn try_from(url: &url::Url) -> Result<Self, Self::Error> {
    convert_url_to_uri(url)
  }
}

impl TryFrom<&str> for Uri {
  type Error = UrlConversionError;

  fn try_from(value: &str) -> Result<Self, Self::Error> {
    let url = url::Url::parse(value).map_err(|_| UrlConversionError::Malformed(value.into()))?;
    convert_url_to_uri(&url)
  }
}
