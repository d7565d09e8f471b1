//! `config.toml` loading.
//!
//! A global file in the user config directory and a workspace-local
//! `.scribe/config.toml` are merged, local values winning. Tables merge key
//! by key; everything else is replaced.

use std::{
  borrow::Cow,
  io,
  path::{
    Path,
    PathBuf,
  },
  time::Duration,
};

use etcetera::base_strategy::{
  BaseStrategy,
  choose_base_strategy,
};
use scribe_core::ErrorCode;
use scribe_lib::history::DEFAULT_UNDO_LIMIT;
use serde::{
  Deserialize,
  Serialize,
};
use thiserror::Error;
use toml::Value;

const WORKSPACE_DIR: &str = ".scribe";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {}: {source}", .path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("invalid config{}: {source}", origin(.path))]
  Parse {
    path:   Option<PathBuf>,
    #[source]
    source: toml::de::Error,
  },
}

fn origin(path: &Option<PathBuf>) -> Cow<'static, str> {
  match path {
    Some(path) => Cow::Owned(format!(" in {}", path.display())),
    None => Cow::Borrowed(""),
  }
}

impl ConfigError {
  pub fn code(&self) -> ErrorCode {
    match self {
      Self::Io { source, .. } => ErrorCode::from_io_kind(source.kind()),
      Self::Parse { .. } => ErrorCode::InvalidArgument,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
  pub editor:          EditorConfig,
  pub syntax:          SyntaxConfig,
  pub language_server: Option<LanguageServerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct EditorConfig {
  pub undo_limit:        usize,
  pub parse_debounce_ms: u64,
}

impl Default for EditorConfig {
  fn default() -> Self {
    Self {
      undo_limit:        DEFAULT_UNDO_LIMIT,
      parse_debounce_ms: 50,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct SyntaxConfig {
  /// Directory holding `<language>/highlights.scm` overrides.
  pub queries_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct LanguageServerConfig {
  pub command:     String,
  #[serde(default)]
  pub args:        Vec<String>,
  /// Overrides the `languageId` sent on open. Defaults to the detected
  /// language name.
  #[serde(default)]
  pub language_id: Option<String>,
}

impl Config {
  pub fn parse_debounce(&self) -> Duration {
    Duration::from_millis(self.editor.parse_debounce_ms)
  }

  pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
    toml::from_str(text).map_err(|source| ConfigError::Parse { path: None, source })
  }

  /// Merge `global` and `local` sources, either of which may be absent.
  pub fn load(global: Option<&str>, local: Option<&str>) -> Result<Self, ConfigError> {
    let parse = |text: &str| {
      toml::from_str::<Value>(text).map_err(|source| ConfigError::Parse { path: None, source })
    };
    let merged = match (global.map(parse).transpose()?, local.map(parse).transpose()?) {
      (None, None) => return Ok(Self::default()),
      (Some(value), None) | (None, Some(value)) => value,
      (Some(global), Some(local)) => merge_toml_values(global, local, 3),
    };
    merged
      .try_into()
      .map_err(|source| ConfigError::Parse { path: None, source })
  }

  /// Load from explicit files. A missing file counts as empty.
  pub fn load_files(global: &Path, local: &Path) -> Result<Self, ConfigError> {
    let global_text = read_optional(global)?;
    let local_text = read_optional(local)?;
    Self::load(global_text.as_deref(), local_text.as_deref()).map_err(|err| {
      match err {
        ConfigError::Parse { source, .. } => {
          // Name the file that is most likely at fault.
          let path = if local_text.is_some() { local } else { global };
          ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
          }
        },
        other => other,
      }
    })
  }

  /// Load the user's global config and the workspace config for `cwd`.
  pub fn load_default(cwd: &Path) -> Result<Self, ConfigError> {
    let global = config_dir()
      .map(|dir| dir.join(CONFIG_FILE))
      .unwrap_or_default();
    Self::load_files(&global, &workspace_config_file(cwd))
  }
}

fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
  if path.as_os_str().is_empty() {
    return Ok(None);
  }
  match std::fs::read_to_string(path) {
    Ok(text) => Ok(Some(text)),
    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(source) => {
      Err(ConfigError::Io {
        path: path.to_path_buf(),
        source,
      })
    },
  }
}

pub fn config_dir() -> Option<PathBuf> {
  if let Some(dir) = std::env::var_os("SCRIBE_CONFIG_DIR") {
    return Some(PathBuf::from(dir));
  }
  let strategy = choose_base_strategy().ok()?;
  let mut path = strategy.config_dir();
  path.push("scribe");
  Some(path)
}

pub fn cache_dir() -> Option<PathBuf> {
  let strategy = choose_base_strategy().ok()?;
  let mut path = strategy.cache_dir();
  path.push("scribe");
  Some(path)
}

pub fn workspace_config_file(cwd: &Path) -> PathBuf {
  find_workspace_in(cwd).join(WORKSPACE_DIR).join(CONFIG_FILE)
}

/// Nearest ancestor of `dir` that looks like a project root, or `dir`
/// itself.
pub fn find_workspace_in(dir: &Path) -> PathBuf {
  for ancestor in dir.ancestors() {
    if ancestor.join(".git").exists()
      || ancestor.join(".jj").exists()
      || ancestor.join(WORKSPACE_DIR).exists()
    {
      return ancestor.to_owned();
    }
  }
  dir.to_owned()
}

/// Merge `right` onto `left`. Tables are merged recursively up to
/// `merge_depth` levels; below that, and for every other kind of value,
/// `right` replaces `left`.
pub fn merge_toml_values(left: Value, right: Value, merge_depth: usize) -> Value {
  match (left, right) {
    (Value::Table(mut left_map), Value::Table(right_map)) if merge_depth > 0 => {
      for (name, rvalue) in right_map {
        let merged = match left_map.remove(&name) {
          Some(lvalue) => merge_toml_values(lvalue, rvalue, merge_depth - 1),
          None => rvalue,
        };
        left_map.insert(name, merged);
      }
      Value::Table(left_map)
    },
    (_, value) => value,
  }
}
