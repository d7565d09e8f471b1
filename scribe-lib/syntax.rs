//! Incremental tree-sitter parsing and highlight capture extraction.
//!
//! [`ParseEngine`] owns one parse tree per document together with the exact
//! text the tree was built from. Buffer [`Change`]s are converted to byte
//! edits against a private mirror of that text and folded into a single
//! [`PendingEdit`]; nothing is parsed until [`ParseEngine::flush`] is called
//! (normally after a debounce window, see [`crate::syntax_async`]). A flush
//! applies the folded edit to the old tree and reparses incrementally, or
//! falls back to a full parse when the incremental path cannot be trusted.
//!
//! ```text
//!   Unparsed --set_language--> Synced --on_change--> Stale
//!                                 ^                    |
//!                                 +----- Parsing <-----+ flush
//! ```
//!
//! Every flush produces the full capture list for the document: one
//! `(byte range, category)` pair per query capture, in query order.

pub mod edit;
pub mod language;
pub mod style;

use std::{
  fmt,
  ops::Range,
  sync::Arc,
  time::{
    Duration,
    Instant,
  },
};

use scribe_core::{
  ErrorCode,
  Position,
};
use thiserror::Error;
use tracing::{
  debug,
  trace,
  warn,
};
use tree_sitter::{
  Node,
  Parser,
  QueryCursor,
  StreamingIterator,
  Tree,
};

pub use self::{
  edit::PendingEdit,
  language::{
    Language,
    LanguageDefinition,
    LanguageRegistry,
  },
  style::{
    CaptureStyles,
    Color,
    Style,
    StyleMap,
    StyleTable,
    default_styles,
  },
};
use crate::{
  history::Change,
  text_buffer::TextBuffer,
};

pub type Result<T> = std::result::Result<T, SyntaxError>;

#[derive(Debug, Error)]
pub enum SyntaxError {
  #[error("unknown language '{0}'")]
  UnknownLanguage(String),
  #[error("failed to compile highlight query for '{language}'")]
  Query {
    language: String,
    #[source]
    source:   tree_sitter::QueryError,
  },
  #[error("grammar for '{language}' is incompatible with the parser")]
  Grammar {
    language: String,
    #[source]
    source:   tree_sitter::LanguageError,
  },
  #[error("no language is set")]
  NoLanguage,
  #[error("parser produced no tree")]
  ParseFailed,
}

impl SyntaxError {
  pub fn code(&self) -> ErrorCode {
    match self {
      Self::UnknownLanguage(_) | Self::NoLanguage => ErrorCode::InvalidArgument,
      Self::Grammar { .. } => ErrorCode::NotImplemented,
      Self::Query { .. } | Self::ParseFailed => ErrorCode::ParseError,
    }
  }
}

/// Difference in length between the mirrored text and the live buffer that
/// is still treated as "the same document" (a trailing newline).
pub const LENGTH_TOLERANCE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
  /// No tree yet: no language, or the first parse has not happened.
  Unparsed,
  Parsing,
  /// The tree matches the last flushed text.
  Synced,
  /// Edits arrived since the last parse.
  Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseKind {
  Full,
  Incremental,
  /// Nothing to do: no language, or the tree is already current.
  Skipped,
}

/// Index of a capture name in the language's highlight query.
pub type CategoryId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
  pub byte_range: Range<usize>,
  pub category:   CategoryId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
  pub kind:     ParseKind,
  pub captures: Arc<[Capture]>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParseStats {
  pub parse_count:             u64,
  pub full_parse_count:        u64,
  pub incremental_parse_count: u64,
  /// Incremental attempts that ended in a full parse.
  pub fallback_count:          u64,
  pub total_parse_time:        Duration,
  pub last_capture_count:      usize,
}

enum FullParseReason {
  Initial,
  Forced,
  NoTree,
  LengthDiverged { mirror: usize, live: usize },
  ContentDiverged,
  UnmappableChange,
  IncrementalFailed,
}

impl fmt::Display for FullParseReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Initial => f.write_str("initial parse"),
      Self::Forced => f.write_str("forced"),
      Self::NoTree => f.write_str("no tree"),
      Self::LengthDiverged { mirror, live } => {
        write!(f, "snapshot length {mirror} diverged from buffer length {live}")
      },
      Self::ContentDiverged => f.write_str("snapshot content diverged from buffer"),
      Self::UnmappableChange => f.write_str("change could not be mapped onto snapshot"),
      Self::IncrementalFailed => f.write_str("incremental parse failed"),
    }
  }
}

impl FullParseReason {
  fn is_fallback(&self) -> bool {
    !matches!(self, Self::Initial | Self::Forced | Self::NoTree)
  }
}

pub struct ParseEngine {
  parser:     Parser,
  language:   Option<Language>,
  tree:       Option<Tree>,
  /// Text the current tree was built from.
  synced:     TextBuffer,
  /// `synced` with every queued change applied.
  mirror:     TextBuffer,
  pending:    Option<PendingEdit>,
  unmappable: bool,
  status:     ParseStatus,
  captures:   Arc<[Capture]>,
  stats:      ParseStats,
}

impl Default for ParseEngine {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for ParseEngine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ParseEngine")
      .field("language", &self.language.as_ref().map(Language::name))
      .field("status", &self.status)
      .field("pending", &self.pending)
      .field("captures", &self.captures.len())
      .finish_non_exhaustive()
  }
}

impl ParseEngine {
  pub fn new() -> Self {
    Self {
      parser:     Parser::new(),
      language:   None,
      tree:       None,
      synced:     TextBuffer::default(),
      mirror:     TextBuffer::default(),
      pending:    None,
      unmappable: false,
      status:     ParseStatus::Unparsed,
      captures:   Arc::from(Vec::new()),
      stats:      ParseStats::default(),
    }
  }

  pub fn status(&self) -> ParseStatus {
    self.status
  }

  pub fn language(&self) -> Option<&Language> {
    self.language.as_ref()
  }

  pub fn tree(&self) -> Option<&Tree> {
    self.tree.as_ref()
  }

  pub fn stats(&self) -> ParseStats {
    self.stats
  }

  pub fn pending_edit(&self) -> Option<PendingEdit> {
    self.pending
  }

  /// Text the current tree corresponds to.
  pub fn synced_text(&self) -> &str {
    self.synced.text()
  }

  pub fn captures(&self) -> Arc<[Capture]> {
    Arc::clone(&self.captures)
  }

  /// Switch to `language` and parse `text` from scratch.
  pub fn set_language(&mut self, language: Language, text: &str) -> Result<ParseOutcome> {
    self
      .parser
      .set_language(language.grammar())
      .map_err(|source| {
        SyntaxError::Grammar {
          language: language.name().to_string(),
          source,
        }
      })?;
    self.reset_tree();
    debug!(language = language.name(), "language set");
    self.language = Some(language);
    self.full_parse(text, FullParseReason::Initial)
  }

  pub fn clear_language(&mut self) {
    self.language = None;
    self.reset_tree();
    self.stats.last_capture_count = 0;
  }

  fn reset_tree(&mut self) {
    self.tree = None;
    self.synced = TextBuffer::default();
    self.mirror = TextBuffer::default();
    self.pending = None;
    self.unmappable = false;
    self.status = ParseStatus::Unparsed;
    self.captures = Arc::from(Vec::new());
  }

  /// Queue a buffer change. The change is mapped to bytes against the
  /// snapshot mirror, never against the live buffer.
  pub fn on_change(&mut self, change: &Change) {
    if self.language.is_none() {
      return;
    }
    if self.tree.is_some() {
      self.status = ParseStatus::Stale;
    }
    if self.unmappable {
      return;
    }
    match edit::apply_change(&mut self.mirror, change) {
      Ok(edit) => {
        trace!(
          start = edit.start,
          old_end = edit.old_end,
          new_end = edit.new_end,
          "queued edit"
        );
        self.pending = Some(match self.pending {
          Some(pending) => pending.merge(edit),
          None => edit,
        });
      },
      Err(err) => {
        warn!(error = %err, "change does not fit the parse snapshot, will reparse fully");
        self.unmappable = true;
      },
    }
  }

  /// Bring the tree up to date with `live`, the current buffer text.
  pub fn flush(&mut self, live: &str) -> Result<ParseOutcome> {
    if self.language.is_none() {
      return Ok(self.outcome(ParseKind::Skipped));
    }
    let Some(mut tree) = self.tree.take() else {
      return self.full_parse(live, FullParseReason::NoTree);
    };

    if self.unmappable {
      return self.full_parse(live, FullParseReason::UnmappableChange);
    }
    let mirror_len = self.mirror.len();
    if mirror_len.abs_diff(live.len()) > LENGTH_TOLERANCE {
      return self.full_parse(live, FullParseReason::LengthDiverged {
        mirror: mirror_len,
        live:   live.len(),
      });
    }
    if self.mirror.text() != live {
      return self.full_parse(live, FullParseReason::ContentDiverged);
    }
    let Some(pending) = self.pending.take() else {
      self.tree = Some(tree);
      self.status = ParseStatus::Synced;
      return Ok(self.outcome(ParseKind::Skipped));
    };

    self.status = ParseStatus::Parsing;
    let started = Instant::now();
    let input_edit = pending.to_input_edit(&self.synced, &self.mirror);
    tree.edit(&input_edit);
    let Some(new_tree) = self.parser.parse(live, Some(&tree)) else {
      return self.full_parse(live, FullParseReason::IncrementalFailed);
    };

    self.stats.parse_count += 1;
    self.stats.incremental_parse_count += 1;
    self.stats.total_parse_time += started.elapsed();
    debug!(
      start = pending.start,
      old_end = pending.old_end,
      new_end = pending.new_end,
      elapsed = ?started.elapsed(),
      "incremental parse"
    );
    self.install(new_tree, live);
    Ok(self.outcome(ParseKind::Incremental))
  }

  /// Throw the tree away and parse `live` from scratch.
  pub fn force_reparse(&mut self, live: &str) -> Result<ParseOutcome> {
    if self.language.is_none() {
      return Err(SyntaxError::NoLanguage);
    }
    self.full_parse(live, FullParseReason::Forced)
  }

  fn full_parse(&mut self, live: &str, reason: FullParseReason) -> Result<ParseOutcome> {
    if reason.is_fallback() {
      warn!(%reason, "falling back to full parse");
      self.stats.fallback_count += 1;
    } else {
      debug!(%reason, "full parse");
    }
    self.status = ParseStatus::Parsing;
    self.tree = None;
    self.parser.reset();
    let started = Instant::now();
    let Some(tree) = self.parser.parse(live, None) else {
      // Keep the previous captures around: stale highlighting beats none.
      self.status = ParseStatus::Stale;
      self.unmappable = true;
      return Err(SyntaxError::ParseFailed);
    };
    self.stats.parse_count += 1;
    self.stats.full_parse_count += 1;
    self.stats.total_parse_time += started.elapsed();
    self.install(tree, live);
    Ok(self.outcome(ParseKind::Full))
  }

  fn install(&mut self, tree: Tree, live: &str) {
    self.synced = TextBuffer::new(live);
    self.mirror = self.synced.clone();
    self.pending = None;
    self.unmappable = false;
    self.captures = self.collect_captures(&tree).into();
    self.stats.last_capture_count = self.captures.len();
    self.tree = Some(tree);
    self.status = ParseStatus::Synced;
  }

  fn collect_captures(&self, tree: &Tree) -> Vec<Capture> {
    let Some(language) = self.language.as_ref() else {
      return Vec::new();
    };
    let mut cursor = QueryCursor::new();
    let mut captures = cursor.captures(
      language.highlight_query(),
      tree.root_node(),
      self.synced.text().as_bytes(),
    );
    let mut out = Vec::new();
    while let Some((query_match, idx)) = captures.next() {
      let capture = query_match.captures[*idx];
      out.push(Capture {
        byte_range: capture.node.byte_range(),
        category:   capture.index,
      });
    }
    out
  }

  fn outcome(&self, kind: ParseKind) -> ParseOutcome {
    ParseOutcome {
      kind,
      captures: self.captures(),
    }
  }

  /// Current captures with their resolved styles. Captures without a style
  /// are left out.
  pub fn highlights(&self, styles: &StyleMap) -> Vec<(Range<usize>, Style)> {
    let Some(language) = self.language.as_ref() else {
      return Vec::new();
    };
    let resolved = styles.capture_styles(language);
    self
      .captures
      .iter()
      .filter_map(|capture| {
        resolved
          .style(capture.category)
          .map(|style| (capture.byte_range.clone(), style))
      })
      .collect()
  }

  /// Name of a category of the current language.
  pub fn category_name(&self, category: CategoryId) -> Option<&str> {
    self.language.as_ref()?.capture_name(category)
  }

  /// Byte offset in the synced text to a position in that same text.
  pub fn position_for_byte(&self, byte: usize) -> Position {
    self.synced.position_from_offset(byte)
  }

  pub fn byte_for_position(&self, pos: Position) -> usize {
    self.synced.offset_from_position(pos)
  }

  pub fn dump_tree(&self) -> Option<String> {
    let tree = self.tree.as_ref()?;
    let mut out = String::new();
    pretty_print_tree(&mut out, tree.root_node()).ok()?;
    Some(out)
  }
}

pub fn pretty_print_tree<W: fmt::Write>(fmt: &mut W, node: Node) -> fmt::Result {
  if node.child_count() == 0 {
    if node_is_visible(&node) {
      write!(fmt, "({})", node.kind())
    } else {
      write!(fmt, "\"{}\"", format_anonymous_node_kind(node.kind()))
    }
  } else {
    pretty_print_tree_impl(fmt, &mut node.walk(), 0)
  }
}

fn node_is_visible(node: &Node) -> bool {
  node.is_missing() || node.is_named()
}

fn format_anonymous_node_kind(kind: &str) -> std::borrow::Cow<'_, str> {
  if kind.contains('"') {
    std::borrow::Cow::Owned(kind.replace('"', "\\\""))
  } else {
    std::borrow::Cow::Borrowed(kind)
  }
}

fn pretty_print_tree_impl<W: fmt::Write>(
  fmt: &mut W,
  cursor: &mut tree_sitter::TreeCursor,
  depth: usize,
) -> fmt::Result {
  let node = cursor.node();
  let visible = node_is_visible(&node);

  if visible {
    let indentation_columns = depth * 2;
    write!(fmt, "{:indentation_columns$}", "")?;

    if let Some(field_name) = cursor.field_name() {
      write!(fmt, "{}: ", field_name)?;
    }

    write!(fmt, "({}", node.kind())?;
  } else {
    write!(fmt, " \"{}\"", format_anonymous_node_kind(node.kind()))?;
  }

  if cursor.goto_first_child() {
    loop {
      if node_is_visible(&cursor.node()) {
        fmt.write_char('\n')?;
      }

      pretty_print_tree_impl(fmt, cursor, depth + 1)?;

      if !cursor.goto_next_sibling() {
        break;
      }
    }

    let moved = cursor.goto_parent();
    debug_assert!(moved);
  }

  if visible {
    fmt.write_char(')')?;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use scribe_core::TextRange;

  use super::*;
  use crate::document::Document;

  fn rust() -> Language {
    LanguageRegistry::builtin().get("rust").unwrap()
  }

  fn engine_for(text: &str) -> ParseEngine {
    let mut engine = ParseEngine::new();
    let outcome = engine.set_language(rust(), text).unwrap();
    assert_eq!(outcome.kind, ParseKind::Full);
    engine
  }

  fn full_captures(text: &str) -> Arc<[Capture]> {
    engine_for(text).captures()
  }

  fn insert(at: Position, text: &str) -> Change {
    Change {
      old_range: TextRange::point(at),
      old_text:  String::new(),
      new_range: TextRange::new(at, at.traverse(text)),
      new_text:  text.to_string(),
    }
  }

  const SOURCE: &str = "fn main() {\n    let x = 1;\n    println!(\"{}\", x);\n}\n";

  #[test]
  fn state_machine() {
    let mut engine = ParseEngine::new();
    assert_eq!(engine.status(), ParseStatus::Unparsed);
    assert_eq!(engine.flush("").unwrap().kind, ParseKind::Skipped);

    engine.set_language(rust(), SOURCE).unwrap();
    assert_eq!(engine.status(), ParseStatus::Synced);
    assert!(!engine.captures().is_empty());

    engine.on_change(&insert(Position::new(0, 0), "pub "));
    assert_eq!(engine.status(), ParseStatus::Stale);

    let live = format!("pub {SOURCE}");
    let outcome = engine.flush(&live).unwrap();
    assert_eq!(outcome.kind, ParseKind::Incremental);
    assert_eq!(engine.status(), ParseStatus::Synced);
    assert_eq!(engine.synced_text(), live);

    assert_eq!(engine.flush(&live).unwrap().kind, ParseKind::Skipped);

    engine.clear_language();
    assert_eq!(engine.status(), ParseStatus::Unparsed);
    assert!(engine.captures().is_empty());
  }

  #[test]
  fn single_char_insert_matches_full_parse() {
    let mut engine = engine_for(SOURCE);
    let mut doc = TextBuffer::new(SOURCE);
    let at = Position::new(1, 9);
    doc.insert_at_position(at, "y").unwrap();
    engine.on_change(&insert(at, "y"));

    let outcome = engine.flush(doc.text()).unwrap();
    assert_eq!(outcome.kind, ParseKind::Incremental);
    assert_eq!(outcome.captures, full_captures(doc.text()));
  }

  #[test]
  fn burst_of_edits_is_coalesced() {
    let mut engine = engine_for(SOURCE);
    let mut live = TextBuffer::new(SOURCE);
    let edits = [
      insert(Position::new(1, 13), "0"),
      insert(Position::new(1, 14), "0"),
      insert(Position::new(0, 3), "real_"),
      Change {
        old_range: TextRange::new(Position::new(2, 4), Position::new(2, 12)),
        old_text:  "println!".into(),
        new_range: TextRange::new(Position::new(2, 4), Position::new(2, 13)),
        new_text:  "eprintln!".into(),
      },
    ];
    for change in &edits {
      live.remove_text(change.old_range).unwrap();
      live.insert_at_position(change.old_range.start, &change.new_text).unwrap();
      engine.on_change(change);
    }
    let pending = engine.pending_edit().unwrap();
    assert_eq!(pending.start, 3);

    let outcome = engine.flush(live.text()).unwrap();
    assert_eq!(outcome.kind, ParseKind::Incremental);
    assert_eq!(outcome.captures, full_captures(live.text()));
    assert_eq!(engine.stats().incremental_parse_count, 1);
  }

  #[test]
  fn diverged_snapshot_falls_back_to_full_parse() {
    let mut engine = engine_for(SOURCE);
    engine.on_change(&insert(Position::new(0, 0), "x"));
    let live = format!("// unrelated\n{SOURCE}");
    let outcome = engine.flush(&live).unwrap();
    assert_eq!(outcome.kind, ParseKind::Full);
    assert_eq!(outcome.captures, full_captures(&live));
    assert_eq!(engine.stats().fallback_count, 1);
  }

  #[test]
  fn same_length_divergence_is_caught() {
    let mut engine = engine_for("fn a() {}\n");
    engine.on_change(&insert(Position::new(0, 3), "b"));
    let outcome = engine.flush("fn xa() {}\n").unwrap();
    assert_eq!(outcome.kind, ParseKind::Full);
  }

  #[test]
  fn unmappable_change_forces_full_parse() {
    let mut engine = engine_for("fn a() {}\n");
    engine.on_change(&insert(Position::new(7, 0), "oops"));
    let outcome = engine.flush("fn a() {}\n").unwrap();
    assert_eq!(outcome.kind, ParseKind::Full);
  }

  #[test]
  fn document_changes_drive_the_engine() {
    use std::num::NonZeroUsize;

    use parking_lot::Mutex;
    use scribe_core::DocumentId;

    let queued = Arc::new(Mutex::new(Vec::new()));
    let mut doc = Document::with_text(DocumentId::new(NonZeroUsize::MIN), SOURCE);
    let sink = queued.clone();
    doc.set_change_callback(move |change| sink.lock().push(change.clone()));
    let mut engine = engine_for(doc.text());

    doc.insert_text(Position::new(3, 1), "\nfn other() {}").unwrap();
    doc.insert_text(Position::new(4, 3), "_fn").unwrap();
    doc.undo().unwrap();
    for change in queued.lock().drain(..) {
      engine.on_change(&change);
    }
    let outcome = engine.flush(doc.text()).unwrap();
    assert_eq!(outcome.kind, ParseKind::Incremental);
    assert_eq!(outcome.captures, full_captures(doc.text()));
  }

  #[test]
  fn highlights_resolve_styles() {
    let engine = engine_for("fn main() {}\n");
    let highlights = engine.highlights(&StyleMap::default());
    let (range, style) = highlights
      .iter()
      .find(|(range, _)| *range == (0..2))
      .unwrap();
    assert_eq!(range.clone(), 0..2);
    assert!(style.bold);
    let names: Vec<_> = engine
      .captures()
      .iter()
      .filter_map(|capture| engine.category_name(capture.category))
      .collect();
    assert!(names.contains(&"keyword"));
  }

  #[test]
  fn dump_tree_and_positions() {
    let engine = engine_for("fn main() {}\n");
    let dump = engine.dump_tree().unwrap();
    assert!(dump.starts_with("(source_file"));
    assert!(dump.contains("name: (identifier)"));
    assert_eq!(engine.position_for_byte(3), Position::new(0, 3));
    assert_eq!(engine.byte_for_position(Position::new(1, 0)), 13);
  }

  #[test]
  fn force_reparse_requires_language() {
    let mut engine = ParseEngine::new();
    assert!(matches!(
      engine.force_reparse(""),
      Err(SyntaxError::NoLanguage)
    ));
    let mut engine = engine_for("fn a() {}");
    let outcome = engine.force_reparse("fn b() {}").unwrap();
    assert_eq!(outcome.kind, ParseKind::Full);
    assert_eq!(engine.stats().full_parse_count, 2);
    assert_eq!(engine.stats().fallback_count, 0);
  }
}
