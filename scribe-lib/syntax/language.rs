//! Grammars and highlight queries, keyed by language name.
//!
//! The registry is built once and shared read-only. Built-in languages ship
//! the highlight query bundled with their grammar crate; a queries directory
//! laid out as `<dir>/<language>/highlights.scm` can override it. A language
//! that `inherits` another gets the parent's query text prepended to its own.

use std::{
  collections::HashMap,
  fmt,
  path::{
    Path,
    PathBuf,
  },
  sync::Arc,
};

use scribe_core::fs::FileSystem;
use tracing::{
  debug,
  warn,
};
use tree_sitter::Query;

use super::{
  Result,
  SyntaxError,
};

pub struct LanguageData {
  name:       String,
  grammar:    tree_sitter::Language,
  query:      Query,
  source:     String,
  extensions: Vec<String>,
}

/// Cheap, cloneable handle to a registered language.
#[derive(Clone)]
pub struct Language(Arc<LanguageData>);

impl Language {
  pub fn name(&self) -> &str {
    &self.0.name
  }

  pub fn grammar(&self) -> &tree_sitter::Language {
    &self.0.grammar
  }

  pub fn highlight_query(&self) -> &Query {
    &self.0.query
  }

  /// Full query text, inherited parts included.
  pub fn query_source(&self) -> &str {
    &self.0.source
  }

  pub fn extensions(&self) -> &[String] {
    &self.0.extensions
  }

  pub fn capture_names(&self) -> &[&str] {
    self.0.query.capture_names()
  }

  pub fn capture_name(&self, category: u32) -> Option<&str> {
    self.capture_names().get(category as usize).copied()
  }
}

impl PartialEq for Language {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

impl fmt::Debug for Language {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Language")
      .field("name", &self.0.name)
      .field("captures", &self.0.query.capture_names().len())
      .finish()
  }
}

/// Everything needed to register a language.
pub struct LanguageDefinition {
  pub name:       String,
  pub grammar:    tree_sitter::Language,
  pub highlights: String,
  pub extensions: Vec<String>,
  pub inherits:   Option<String>,
}

impl LanguageDefinition {
  pub fn rust() -> Self {
    Self {
      name:       "rust".into(),
      grammar:    tree_sitter_rust::LANGUAGE.into(),
      highlights: tree_sitter_rust::HIGHLIGHTS_QUERY.into(),
      extensions: vec!["rs".into()],
      inherits:   None,
    }
  }

  pub fn json() -> Self {
    Self {
      name:       "json".into(),
      grammar:    tree_sitter_json::LANGUAGE.into(),
      highlights: tree_sitter_json::HIGHLIGHTS_QUERY.into(),
      extensions: vec!["json".into()],
      inherits:   None,
    }
  }
}

#[derive(Default)]
pub struct LanguageRegistry {
  languages:    HashMap<String, Language>,
  by_extension: HashMap<String, String>,
  queries_dir:  Option<PathBuf>,
}

impl fmt::Debug for LanguageRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LanguageRegistry")
      .field("languages", &self.languages.keys().collect::<Vec<_>>())
      .field("queries_dir", &self.queries_dir)
      .finish()
  }
}

impl LanguageRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry with the bundled grammars and their bundled queries.
  pub fn builtin() -> Self {
    let mut registry = Self::new();
    registry.register_builtins(None);
    registry
  }

  /// Registry with the bundled grammars, preferring query files found under
  /// `queries_dir`.
  pub fn builtin_with_queries(fs: &dyn FileSystem, queries_dir: impl Into<PathBuf>) -> Self {
    let mut registry = Self::new();
    registry.queries_dir = Some(queries_dir.into());
    registry.register_builtins(Some(fs));
    registry
  }

  fn register_builtins(&mut self, fs: Option<&dyn FileSystem>) {
    for definition in [LanguageDefinition::rust(), LanguageDefinition::json()] {
      let name = definition.name.clone();
      if let Err(err) = self.register_with(fs, definition) {
        warn!(language = %name, error = %err, "skipping language");
      }
    }
  }

  pub fn register(&mut self, definition: LanguageDefinition) -> Result<Language> {
    self.register_with(None, definition)
  }

  pub fn register_with(
    &mut self,
    fs: Option<&dyn FileSystem>,
    definition: LanguageDefinition,
  ) -> Result<Language> {
    let LanguageDefinition {
      name,
      grammar,
      highlights,
      extensions,
      inherits,
    } = definition;

    let own = fs
      .and_then(|fs| self.read_query_override(fs, &name))
      .unwrap_or(highlights);

    let mut source = String::new();
    if let Some(parent) = inherits.as_deref() {
      let parent = self
        .languages
        .get(parent)
        .ok_or_else(|| SyntaxError::UnknownLanguage(parent.to_string()))?;
      source.push_str(parent.query_source());
      source.push('\n');
    }
    source.push_str(&own);

    let query = Query::new(&grammar, &source).map_err(|source| {
      SyntaxError::Query {
        language: name.clone(),
        source,
      }
    })?;
    debug!(
      language = %name,
      captures = query.capture_names().len(),
      patterns = query.pattern_count(),
      "registered language"
    );

    let language = Language(Arc::new(LanguageData {
      name: name.clone(),
      grammar,
      query,
      source,
      extensions: extensions.clone(),
    }));
    for extension in extensions {
      self.by_extension.insert(extension, name.clone());
    }
    self.languages.insert(name, language.clone());
    Ok(language)
  }

  fn read_query_override(&self, fs: &dyn FileSystem, name: &str) -> Option<String> {
    let path = self.queries_dir.as_ref()?.join(name).join("highlights.scm");
    if !fs.exists(&path) {
      return None;
    }
    match fs.read_file(&path) {
      Ok(bytes) => {
        debug!(path = %path.display(), "using highlight query override");
        Some(String::from_utf8_lossy(&bytes).into_owned())
      },
      Err(err) => {
        warn!(path = %path.display(), error = %err, "failed to read highlight query");
        None
      },
    }
  }

  pub fn get(&self, name: &str) -> Option<Language> {
    self.languages.get(name).cloned()
  }

  pub fn language_for_path(&self, path: &Path) -> Option<Language> {
    let extension = path.extension()?.to_str()?;
    let name = self.by_extension.get(extension)?;
    self.get(name)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.languages.keys().map(String::as_str)
  }

  pub fn queries_dir(&self) -> Option<&Path> {
    self.queries_dir.as_deref()
  }
}
