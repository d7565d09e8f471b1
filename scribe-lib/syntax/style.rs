//! Mapping from capture categories to display styles.
//!
//! A [`StyleTable`] maps category names (`function`, `function.call`, ...)
//! to a [`Style`]. For a given language every capture of its highlight query
//! is resolved once into a [`CaptureStyles`] table: exact name first, then
//! each dotted ancestor (`function.method.call` -> `function.method` ->
//! `function`).
//!
//! [`StyleMap`] publishes the table together with its resolved per-language
//! tables through a single atomic pointer, so a reader sees either the old or
//! the new mapping and never a mix of both.

use std::{
  collections::{
    BTreeMap,
    HashMap,
  },
  sync::Arc,
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{
  Deserialize,
  Serialize,
};

use super::language::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
  pub r: u8,
  pub g: u8,
  pub b: u8,
}

impl Color {
  pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
    Self { r, g, b }
  }

  /// Parse `#rrggbb`.
  pub fn from_hex(hex: &str) -> Option<Self> {
    let hex = hex.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
      return None;
    }
    let channel = |idx: usize| u8::from_str_radix(&hex[idx..idx + 2], 16).ok();
    Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
  }
}

impl std::fmt::Display for Color {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Style {
  pub fg:     Option<Color>,
  pub bold:   bool,
  pub italic: bool,
}

impl Style {
  pub const fn fg(color: Color) -> Self {
    Self {
      fg:     Some(color),
      bold:   false,
      italic: false,
    }
  }

  pub const fn bold(mut self) -> Self {
    self.bold = true;
    self
  }

  pub const fn italic(mut self) -> Self {
    self.italic = true;
    self
  }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StyleTable {
  categories: BTreeMap<String, Style>,
}

impl StyleTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, category: impl Into<String>, style: Style) {
    self.categories.insert(category.into(), style);
  }

  pub fn get(&self, category: &str) -> Option<Style> {
    self.categories.get(category).copied()
  }

  pub fn len(&self) -> usize {
    self.categories.len()
  }

  pub fn is_empty(&self) -> bool {
    self.categories.is_empty()
  }

  /// Exact match, then the nearest registered dotted ancestor.
  pub fn resolve(&self, category: &str) -> Option<Style> {
    let mut name = category;
    loop {
      if let Some(style) = self.get(name) {
        return Some(style);
      }
      let (parent, _) = name.rsplit_once('.')?;
      name = parent;
    }
  }
}

impl<S: Into<String>> FromIterator<(S, Style)> for StyleTable {
  fn from_iter<I: IntoIterator<Item = (S, Style)>>(iter: I) -> Self {
    Self {
      categories: iter
        .into_iter()
        .map(|(name, style)| (name.into(), style))
        .collect(),
    }
  }
}

/// The built-in category table.
pub fn default_styles() -> StyleTable {
  let hex = |value: &str| Style {
    fg:     Color::from_hex(value),
    bold:   false,
    italic: false,
  };
  [
    ("variable", hex("#cdd6f4")),
    ("variable.member", hex("#cdd6f4")),
    ("variable.parameter", hex("#eba0ac")),
    ("variable.builtin", hex("#f5e0dc")),
    ("function", hex("#89b4fa")),
    ("function.method", hex("#89b4fa")),
    ("function.method.call", hex("#89dceb")),
    ("function.builtin", hex("#89dceb")),
    ("function.macro", hex("#89dceb")),
    ("constructor", hex("#89b4fa").bold()),
    ("type", hex("#f9e2af")),
    ("type.builtin", hex("#f9e2af")),
    ("type.definition", hex("#f9e2af").bold()),
    ("property", hex("#94e2d5")),
    ("label", hex("#94e2d5")),
    ("constant", hex("#fab387")),
    ("constant.builtin", hex("#fab387")),
    ("number", hex("#fab387")),
    ("boolean", hex("#fab387")),
    ("string", hex("#a6e3a1")),
    ("string.special", hex("#f9e2af")),
    ("string.escape", hex("#f5c2e7")),
    ("escape", hex("#f5c2e7")),
    ("string.regex", hex("#f5c2e7")),
    ("keyword", hex("#cba6f7").bold()),
    ("keyword.modifier", hex("#cba6f7")),
    ("keyword.type", hex("#cba6f7")),
    ("keyword.operator", hex("#89dceb")),
    ("module", hex("#f9e2af")),
    ("namespace", hex("#f9e2af")),
    ("attribute", hex("#f9e2af")),
    ("operator", hex("#89dceb")),
    ("punctuation.bracket", hex("#9399b2")),
    ("punctuation.delimiter", hex("#9399b2")),
    ("comment", hex("#6c7086").italic()),
    ("comment.documentation", hex("#6c7086").italic()),
  ]
  .into_iter()
  .collect()
}

/// Styles for every capture of one language's highlight query, indexed by
/// capture id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureStyles {
  language: String,
  styles:   Vec<Option<Style>>,
}

impl CaptureStyles {
  pub fn resolve(table: &StyleTable, language: &Language) -> Self {
    Self {
      language: language.name().to_string(),
      styles:   language
        .capture_names()
        .iter()
        .map(|name| table.resolve(name))
        .collect(),
    }
  }

  pub fn language(&self) -> &str {
    &self.language
  }

  pub fn style(&self, category: u32) -> Option<Style> {
    self.styles.get(category as usize).copied().flatten()
  }

  pub fn len(&self) -> usize {
    self.styles.len()
  }

  pub fn is_empty(&self) -> bool {
    self.styles.is_empty()
  }
}

#[derive(Debug)]
struct Published {
  table:    StyleTable,
  resolved: Mutex<HashMap<String, Arc<CaptureStyles>>>,
}

impl Published {
  fn new(table: StyleTable) -> Self {
    Self {
      table,
      resolved: Mutex::new(HashMap::new()),
    }
  }
}

#[derive(Debug)]
pub struct StyleMap {
  current: ArcSwap<Published>,
}

impl Default for StyleMap {
  fn default() -> Self {
    Self::new(default_styles())
  }
}

impl StyleMap {
  pub fn new(table: StyleTable) -> Self {
    Self {
      current: ArcSwap::from_pointee(Published::new(table)),
    }
  }

  /// Publish a new table. Resolved per-language tables are rebuilt lazily
  /// against it.
  pub fn set_styles(&self, table: StyleTable) {
    self.current.store(Arc::new(Published::new(table)));
  }

  pub fn table(&self) -> StyleTable {
    self.current.load().table.clone()
  }

  pub fn capture_styles(&self, language: &Language) -> Arc<CaptureStyles> {
    let published = self.current.load_full();
    let mut resolved = published.resolved.lock();
    resolved
      .entry(language.name().to_string())
      .or_insert_with(|| Arc::new(CaptureStyles::resolve(&published.table, language)))
      .clone()
  }
}
