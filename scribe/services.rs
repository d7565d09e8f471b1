use std::sync::Arc;

use scribe_core::fs::{
  FileSystem,
  NativeFileSystem,
};
use scribe_lib::syntax::{
  LanguageRegistry,
  StyleMap,
};

use crate::config::Config;

/// Everything a session needs from the outside world, passed in explicitly.
#[derive(Clone)]
pub struct Services {
  pub fs:        Arc<dyn FileSystem>,
  pub languages: Arc<LanguageRegistry>,
  pub styles:    Arc<StyleMap>,
  pub config:    Arc<Config>,
}

impl Services {
  pub fn new(config: Config) -> Self {
    Self::with_fs(config, Arc::new(NativeFileSystem))
  }

  pub fn with_fs(config: Config, fs: Arc<dyn FileSystem>) -> Self {
    let languages = match config.syntax.queries_dir.as_deref() {
      Some(dir) => LanguageRegistry::builtin_with_queries(fs.as_ref(), dir),
      None => LanguageRegistry::builtin(),
    };
    Self {
      fs,
      languages: Arc::new(languages),
      styles: Arc::new(StyleMap::default()),
      config: Arc::new(config),
    }
  }
}

impl std::fmt::Debug for Services {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Services")
      .field("languages", &self.languages)
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}
