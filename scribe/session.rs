//! The editing session: open documents, their parse engines, the debounced
//! reparse scheduler and the optional language server.
//!
//! Everything here runs on the thread that owns the session. Documents report
//! changes into a per-document queue, [`EditorSession::poll`] drains those
//! queues, the scheduler and the server, and observers hear about results
//! through [`SessionEvent`]s on an [`EventBus`].

use std::{
  collections::HashMap,
  ops::Range,
  path::{
    Path,
    PathBuf,
  },
  sync::Arc,
};

use parking_lot::Mutex;
use scribe_core::{
  DocumentId,
  DocumentIdAllocator,
  ErrorCode,
  Position,
  TextRange,
  uri::Uri,
};
use scribe_event::{
  EventBus,
  Subscription,
};
use scribe_lib::{
  diagnostics::{
    Diagnostic,
    DiagnosticsStore,
    DocumentDiagnostics,
  },
  document::{
    Document,
    DocumentError,
  },
  history::Change,
  syntax::{
    Language,
    ParseEngine,
    ParseKind,
    ParseOutcome,
    ParseStatus,
    Style,
    SyntaxError,
  },
  syntax_async::ParseScheduler,
};
use scribe_lsp::{
  ClientError,
  ClientEvent,
  LspClient,
  Transport,
  diagnostics::PublishedDiagnostics,
  text_sync,
};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{
  debug,
  info,
  trace,
  warn,
};

use crate::services::Services;

const PLAINTEXT_LANGUAGE_ID: &str = "plaintext";

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
  #[error("no open document {0}")]
  UnknownDocument(DocumentId),
  #[error("no language server configured")]
  NoLanguageServer,
  #[error(transparent)]
  Document(#[from] DocumentError),
  #[error(transparent)]
  Syntax(#[from] SyntaxError),
  #[error(transparent)]
  Client(#[from] ClientError),
}

impl SessionError {
  pub fn code(&self) -> ErrorCode {
    match self {
      Self::UnknownDocument(_) | Self::NoLanguageServer => ErrorCode::InvalidArgument,
      Self::Document(err) => err.code(),
      Self::Syntax(err) => err.code(),
      Self::Client(err) => err.code(),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
  /// A parse finished and the document's highlights changed.
  Highlights {
    document:   DocumentId,
    highlights: Vec<(Range<usize>, Style)>,
  },
  Diagnostics {
    document:    DocumentId,
    diagnostics: Vec<Diagnostic>,
  },
  ParseFailed {
    document: DocumentId,
    message:  String,
  },
  ServerReady,
  ServerExited,
}

struct OpenDocument {
  document:         Document,
  engine:           ParseEngine,
  changes:          Arc<Mutex<Vec<Change>>>,
  uri:              Option<String>,
  opened_on_server: bool,
}

impl OpenDocument {
  fn language_id<'a>(&'a self, configured: Option<&'a str>) -> &'a str {
    configured
      .or_else(|| self.engine.language().map(Language::name))
      .unwrap_or(PLAINTEXT_LANGUAGE_ID)
  }
}

pub struct EditorSession {
  services:    Services,
  ids:         DocumentIdAllocator,
  documents:   HashMap<DocumentId, OpenDocument>,
  scheduler:   ParseScheduler,
  diagnostics: DiagnosticsStore,
  client:      LspClient,
  inbound:     Arc<Mutex<Vec<PublishedDiagnostics>>>,
  events:      EventBus<SessionEvent>,
}

impl EditorSession {
  pub fn new(services: Services, runtime: Handle) -> Self {
    let events = EventBus::new();
    let mut diagnostics = DiagnosticsStore::default();
    let bus = events.clone();
    diagnostics.set_callback(move |document, diagnostics| {
      bus.post(SessionEvent::Diagnostics {
        document,
        diagnostics: diagnostics.to_vec(),
      });
    });
    let scheduler = ParseScheduler::with_delay(runtime, services.config.parse_debounce());
    Self {
      services,
      ids: DocumentIdAllocator::default(),
      documents: HashMap::new(),
      scheduler,
      diagnostics,
      client: LspClient::new(),
      inbound: Arc::new(Mutex::new(Vec::new())),
      events,
    }
  }

  pub fn services(&self) -> &Services {
    &self.services
  }

  pub fn client(&self) -> &LspClient {
    &self.client
  }

  /// Register an observer. Handlers run inside [`EditorSession::poll`].
  pub fn subscribe(&self, handler: impl FnMut(&SessionEvent) + Send + 'static) -> Subscription {
    self.events.subscribe(handler)
  }

  pub fn document(&self, id: DocumentId) -> Option<&Document> {
    self.documents.get(&id).map(|open| &open.document)
  }

  pub fn document_ids(&self) -> Vec<DocumentId> {
    let mut ids: Vec<_> = self.documents.keys().copied().collect();
    ids.sort();
    ids
  }

  /// Load `path` and detect its language from the extension.
  pub fn open_file(&mut self, path: impl Into<PathBuf>) -> Result<DocumentId> {
    let path = path.into();
    let id = self.ids.next();
    let mut document =
      Document::with_path(id, &path).with_undo_limit(self.services.config.editor.undo_limit);
    document.load_from_file(self.services.fs.as_ref())?;
    let language = self.services.languages.language_for_path(&path);
    Ok(self.install(document, language))
  }

  /// Open an untitled document. `language` names a registered language.
  pub fn open_text(&mut self, text: &str, language: Option<&str>) -> Result<DocumentId> {
    let language = language
      .map(|name| {
        self
          .services
          .languages
          .get(name)
          .ok_or_else(|| SyntaxError::UnknownLanguage(name.to_string()))
      })
      .transpose()?;
    let id = self.ids.next();
    let document =
      Document::with_text(id, text).with_undo_limit(self.services.config.editor.undo_limit);
    Ok(self.install(document, language))
  }

  fn install(&mut self, mut document: Document, language: Option<Language>) -> DocumentId {
    let id = document.id();
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    document.set_change_callback(move |change| sink.lock().push(change.clone()));

    let mut engine = ParseEngine::new();
    if let Some(language) = language {
      let name = language.name().to_string();
      match engine.set_language(language, document.text()) {
        Ok(_) => {
          self.events.post(SessionEvent::Highlights {
            document:   id,
            highlights: engine.highlights(&self.services.styles),
          });
        },
        Err(err) => {
          warn!(document = %id, language = %name, error = %err, "initial parse failed");
          self.events.post(SessionEvent::ParseFailed {
            document: id,
            message:  err.to_string(),
          });
        },
      }
    }

    let configured = self.configured_language_id().map(str::to_string);
    let uri = document.path().and_then(document_uri);
    info!(document = %id, uri = uri.as_deref().unwrap_or("<untitled>"), "opened document");
    let mut open = OpenDocument {
      document,
      engine,
      changes,
      uri,
      opened_on_server: false,
    };
    if self.client.is_ready() {
      open_on_server(&mut self.client, &mut open, configured.as_deref());
    }
    self.documents.insert(id, open);
    id
  }

  pub fn insert_text(&mut self, id: DocumentId, pos: Position, text: &str) -> Result<TextRange> {
    self.edit(id, |document| document.insert_text(pos, text))
  }

  pub fn remove_text(&mut self, id: DocumentId, range: TextRange) -> Result<String> {
    self.edit(id, |document| document.remove_text(range))
  }

  pub fn replace_text(&mut self, id: DocumentId, text: &str) -> Result<()> {
    self.edit(id, |document| document.replace_text(text))
  }

  pub fn undo(&mut self, id: DocumentId) -> Result<bool> {
    self.edit(id, Document::undo)
  }

  pub fn redo(&mut self, id: DocumentId) -> Result<bool> {
    self.edit(id, Document::redo)
  }

  /// Run a mutation and forward whatever changes it produced, even when it
  /// failed part way.
  pub fn edit<T>(
    &mut self,
    id: DocumentId,
    mutate: impl FnOnce(&mut Document) -> std::result::Result<T, DocumentError>,
  ) -> Result<T> {
    let open = self
      .documents
      .get_mut(&id)
      .ok_or(SessionError::UnknownDocument(id))?;
    let result = mutate(&mut open.document);
    self.sync_changes(id);
    Ok(result?)
  }

  fn sync_changes(&mut self, id: DocumentId) {
    let Some(open) = self.documents.get_mut(&id) else {
      return;
    };
    let changes = std::mem::take(&mut *open.changes.lock());
    if changes.is_empty() {
      return;
    }
    for change in &changes {
      open.engine.on_change(change);
    }
    if open.engine.language().is_some() {
      self.scheduler.schedule(id);
    }

    if open.opened_on_server
      && self.client.is_ready()
      && let Some(uri) = open.uri.as_deref()
    {
      let version = lsp_version(open.document.version());
      if let Err(err) = self.client.did_change(uri, version, open.document.text()) {
        warn!(document = %id, error = %err, "failed to send didChange");
      }
    }
    trace!(document = %id, changes = changes.len(), "synced changes");
  }

  pub fn save(&mut self, id: DocumentId) -> Result<()> {
    let open = self
      .documents
      .get_mut(&id)
      .ok_or(SessionError::UnknownDocument(id))?;
    open.document.save_to_file(self.services.fs.as_ref())?;
    if open.opened_on_server
      && self.client.is_ready()
      && let Some(uri) = open.uri.as_deref()
    {
      self.client.did_save(uri, Some(open.document.text()))?;
    }
    Ok(())
  }

  /// Reparse now instead of waiting for the debounce. Returns `None` for
  /// documents without a language.
  pub fn parse_now(&mut self, id: DocumentId) -> Result<Option<ParseOutcome>> {
    if !self.documents.contains_key(&id) {
      return Err(SessionError::UnknownDocument(id));
    }
    self.scheduler.cancel(id);
    Ok(self.reparse(id))
  }

  fn reparse(&mut self, id: DocumentId) -> Option<ParseOutcome> {
    let open = self.documents.get_mut(&id)?;
    open.engine.language()?;
    match open.engine.flush(open.document.text()) {
      Ok(outcome) => {
        if outcome.kind != ParseKind::Skipped {
          self.events.post(SessionEvent::Highlights {
            document:   id,
            highlights: open.engine.highlights(&self.services.styles),
          });
        }
        Some(outcome)
      },
      Err(err) => {
        warn!(document = %id, error = %err, "reparse failed");
        self.events.post(SessionEvent::ParseFailed {
          document: id,
          message:  err.to_string(),
        });
        None
      },
    }
  }

  pub fn parse_status(&self, id: DocumentId) -> Option<ParseStatus> {
    self.documents.get(&id).map(|open| open.engine.status())
  }

  pub fn engine(&self, id: DocumentId) -> Option<&ParseEngine> {
    self.documents.get(&id).map(|open| &open.engine)
  }

  pub fn highlights(&self, id: DocumentId) -> Vec<(Range<usize>, Style)> {
    self
      .documents
      .get(&id)
      .map(|open| open.engine.highlights(&self.services.styles))
      .unwrap_or_default()
  }

  pub fn dump_tree(&self, id: DocumentId) -> Option<String> {
    self.documents.get(&id)?.engine.dump_tree()
  }

  pub fn diagnostics(&self, id: DocumentId) -> &[Diagnostic] {
    self.diagnostics.diagnostics(id)
  }

  /// Spawn the configured language server for `root` and start the
  /// handshake. Open documents are announced once the server is ready.
  pub fn start_language_server(&mut self, root: &Path) -> Result<()> {
    let server = self
      .services
      .config
      .language_server
      .clone()
      .ok_or(SessionError::NoLanguageServer)?;
    self.start_language_server_with(&server.command, &server.args, root)
  }

  pub fn start_language_server_with(
    &mut self,
    command: &str,
    args: &[String],
    root: &Path,
  ) -> Result<()> {
    self.install_diagnostics_sink();
    self.client.start(command, args, Some(root))?;
    self.client.initialize(root)?;
    Ok(())
  }

  /// Drive a server over an already established transport.
  pub fn attach_language_server(&mut self, transport: Box<dyn Transport>, root: &Path) -> Result<()> {
    self.install_diagnostics_sink();
    self.client.attach(transport);
    self.client.initialize(root)?;
    Ok(())
  }

  fn install_diagnostics_sink(&mut self) {
    let inbound = Arc::clone(&self.inbound);
    self.client.set_diagnostics_callback(move |uri, version, diagnostics| {
      inbound.lock().push(PublishedDiagnostics {
        uri: uri.to_string(),
        version,
        diagnostics,
      });
    });
  }

  /// Run due reparses, route server traffic and deliver queued events.
  /// Returns how many units of work were done.
  pub fn poll(&mut self) -> usize {
    let mut work = 0;
    for id in self.scheduler.drain() {
      self.reparse(id);
      work += 1;
    }
    work += self.poll_server();
    work += self.apply_inbound_diagnostics();
    work + self.events.poll()
  }

  fn poll_server(&mut self) -> usize {
    let events = self.client.poll();
    let count = events.len();
    for event in events {
      match event {
        ClientEvent::Initialized { .. } => {
          let configured = self.configured_language_id().map(str::to_string);
          for open in self.documents.values_mut() {
            open_on_server(&mut self.client, open, configured.as_deref());
          }
          self.events.post(SessionEvent::ServerReady);
        },
        ClientEvent::InitializeFailed { message } => {
          warn!(%message, "language server failed to initialize");
          self.forget_server();
        },
        ClientEvent::ServerExited => {
          info!("language server exited");
          self.forget_server();
        },
        ClientEvent::ServerStderr { .. } => {},
        ClientEvent::Response { id, method, .. } => {
          trace!(id, method = method.as_deref().unwrap_or("?"), "unhandled response");
        },
        ClientEvent::Notification(message) => {
          trace!(method = %message.method, "unhandled notification");
        },
      }
    }
    count
  }

  fn forget_server(&mut self) {
    for open in self.documents.values_mut() {
      open.opened_on_server = false;
    }
    self.events.post(SessionEvent::ServerExited);
  }

  fn apply_inbound_diagnostics(&mut self) -> usize {
    let inbound = std::mem::take(&mut *self.inbound.lock());
    let count = inbound.len();
    for published in inbound {
      let Some((&id, open)) = self
        .documents
        .iter()
        .find(|(_, open)| open.uri.as_deref() == Some(published.uri.as_str()))
      else {
        debug!(uri = %published.uri, "diagnostics for a document that is not open");
        continue;
      };
      let buffer = open.document.buffer();
      let diagnostics = published
        .diagnostics
        .into_iter()
        .map(|mut diagnostic| {
          diagnostic.range = text_sync::range_from_lsp(buffer, diagnostic.range);
          diagnostic
        })
        .collect();
      let set = DocumentDiagnostics {
        document: id,
        version: published.version.and_then(|version| u64::try_from(version).ok()),
        diagnostics,
      };
      if !self.diagnostics.apply_if_current(set, open.document.version()) {
        debug!(document = %id, version = ?published.version, "dropped stale diagnostics");
      }
    }
    count
  }

  pub fn close_document(&mut self, id: DocumentId) -> Result<()> {
    self.scheduler.cancel(id);
    let mut open = self
      .documents
      .remove(&id)
      .ok_or(SessionError::UnknownDocument(id))?;
    open.document.clear_change_callback();
    if open.opened_on_server
      && self.client.is_ready()
      && let Some(uri) = open.uri.as_deref()
      && let Err(err) = self.client.did_close(uri)
    {
      warn!(document = %id, error = %err, "failed to send didClose");
    }
    self.diagnostics.remove_document(id);
    info!(document = %id, "closed document");
    Ok(())
  }

  /// Cancel pending parses and stop the language server.
  pub fn shutdown(&mut self) -> Result<Option<i32>> {
    for id in self.document_ids() {
      self.scheduler.cancel(id);
    }
    Ok(self.client.stop()?)
  }

  fn configured_language_id(&self) -> Option<&str> {
    self
      .services
      .config
      .language_server
      .as_ref()
      .and_then(|server| server.language_id.as_deref())
  }
}

fn document_uri(path: &Path) -> Option<String> {
  let uri = Uri::from_path(path).ok()?;
  Some(uri.to_url().ok()?.to_string())
}

fn lsp_version(version: u64) -> i32 {
  i32::try_from(version).unwrap_or(i32::MAX)
}

fn open_on_server(client: &mut LspClient, open: &mut OpenDocument, configured: Option<&str>) {
  if open.opened_on_server {
    return;
  }
  let Some(uri) = open.uri.clone() else {
    return;
  };
  let language_id = open.language_id(configured).to_string();
  let version = lsp_version(open.document.version());
  match client.did_open(&uri, &language_id, version, open.document.text()) {
    Ok(()) => open.opened_on_server = true,
    Err(err) => warn!(%uri, error = %err, "failed to send didOpen"),
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use scribe_core::fs::MemoryFileSystem;
  use scribe_lib::diagnostics::DiagnosticSeverity;

  use super::*;
  use crate::config::Config;

  fn session_with(fs: MemoryFileSystem) -> EditorSession {
    let services = Services::with_fs(Config::default(), Arc::new(fs));
    EditorSession::new(services, Handle::current())
  }

  fn recorder(session: &EditorSession) -> (Arc<Mutex<Vec<SessionEvent>>>, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = session.subscribe(move |event| sink.lock().push(event.clone()));
    (seen, subscription)
  }

  #[tokio::test(start_paused = true)]
  async fn opening_a_file_parses_and_highlights() {
    let fs = MemoryFileSystem::new().with_file("/work/main.rs", "fn main() {}\n");
    let mut session = session_with(fs);
    let (seen, _subscription) = recorder(&session);

    let id = session.open_file("/work/main.rs").unwrap();
    assert_eq!(session.parse_status(id), Some(ParseStatus::Synced));
    assert!(!session.highlights(id).is_empty());
    assert!(session.dump_tree(id).unwrap().starts_with("(source_file"));

    session.poll();
    let seen = seen.lock();
    assert!(matches!(&seen[0], SessionEvent::Highlights { document, .. } if *document == id));
  }

  #[tokio::test(start_paused = true)]
  async fn edits_reparse_after_the_debounce() {
    let mut session = session_with(MemoryFileSystem::new());
    let (seen, _subscription) = recorder(&session);
    let id = session.open_text("fn main() {}\n", Some("rust")).unwrap();
    session.poll();
    seen.lock().clear();

    session
      .insert_text(id, Position::new(0, 11), " let x = 1; ")
      .unwrap();
    assert_eq!(session.parse_status(id), Some(ParseStatus::Stale));
    session.poll();
    assert!(seen.lock().is_empty());

    tokio::time::sleep(Duration::from_millis(60)).await;
    for _ in 0..4 {
      tokio::task::yield_now().await;
    }
    session.poll();
    assert_eq!(session.parse_status(id), Some(ParseStatus::Synced));
    let stats = session.engine(id).unwrap().stats();
    assert_eq!(stats.incremental_parse_count, 1);
    assert!(matches!(seen.lock().as_slice(), [SessionEvent::Highlights { .. }]));
  }

  #[tokio::test(start_paused = true)]
  async fn parse_now_and_undo() {
    let mut session = session_with(MemoryFileSystem::new());
    let id = session.open_text("fn a() {}\n", Some("rust")).unwrap();
    session.insert_text(id, Position::new(1, 0), "fn b() {}\n").unwrap();
    let outcome = session.parse_now(id).unwrap().unwrap();
    assert_eq!(outcome.kind, ParseKind::Incremental);

    assert!(session.undo(id).unwrap());
    assert_eq!(session.document(id).unwrap().text(), "fn a() {}\n");
    session.parse_now(id).unwrap();
    assert_eq!(
      session.engine(id).unwrap().synced_text(),
      "fn a() {}\n"
    );
    assert!(session.redo(id).unwrap());
    session.parse_now(id).unwrap();
    assert_eq!(
      session.engine(id).unwrap().synced_text(),
      "fn a() {}\nfn b() {}\n"
    );
  }

  #[tokio::test(start_paused = true)]
  async fn plain_documents_are_never_parsed() {
    let fs = MemoryFileSystem::new().with_file("/work/notes.txt", "hello\n");
    let mut session = session_with(fs);
    let id = session.open_file("/work/notes.txt").unwrap();
    session.insert_text(id, Position::new(0, 5), " world").unwrap();
    assert_eq!(session.parse_now(id).unwrap(), None);
    assert_eq!(session.parse_status(id), Some(ParseStatus::Unparsed));
    assert!(session.highlights(id).is_empty());

    assert!(matches!(
      session.open_text("", Some("cobol")),
      Err(SessionError::Syntax(SyntaxError::UnknownLanguage(_)))
    ));
  }

  #[tokio::test(start_paused = true)]
  async fn inbound_diagnostics_respect_versions() {
    let fs = MemoryFileSystem::new().with_file("/work/lib.rs", "fn f() {}\n");
    let mut session = session_with(fs);
    let (seen, _subscription) = recorder(&session);
    let id = session.open_file("/work/lib.rs").unwrap();
    let uri = document_uri(Path::new("/work/lib.rs")).unwrap();
    let version = session.document(id).unwrap().version();

    let diagnostic = Diagnostic {
      range:    TextRange::new(Position::new(0, 3), Position::new(0, 4)),
      severity: DiagnosticSeverity::Error,
      message:  "bad name".into(),
      source:   "test".into(),
    };
    session.inbound.lock().push(PublishedDiagnostics {
      uri:         uri.clone(),
      version:     Some(lsp_version(version)),
      diagnostics: vec![diagnostic.clone()],
    });
    session.poll();
    assert_eq!(session.diagnostics(id), [diagnostic.clone()]);
    assert!(seen.lock().iter().any(|event| {
      matches!(event, SessionEvent::Diagnostics { document, diagnostics } if *document == id && diagnostics.len() == 1)
    }));

    session.insert_text(id, Position::new(0, 0), "// x\n").unwrap();
    session.inbound.lock().push(PublishedDiagnostics {
      uri,
      version: Some(lsp_version(version)),
      diagnostics: Vec::new(),
    });
    session.poll();
    assert_eq!(session.diagnostics(id).len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn closing_cancels_pending_work() {
    let mut session = session_with(MemoryFileSystem::new());
    let id = session.open_text("fn a() {}\n", Some("rust")).unwrap();
    session.poll();
    session.insert_text(id, Position::new(0, 0), "// hi\n").unwrap();
    session.close_document(id).unwrap();
    assert!(session.document(id).is_none());

    tokio::time::sleep(Duration::from_millis(60)).await;
    tokio::task::yield_now().await;
    assert_eq!(session.poll(), 0);
    assert!(matches!(
      session.close_document(id),
      Err(SessionError::UnknownDocument(_))
    ));
    assert!(matches!(
      session.insert_text(id, Position::new(0, 0), "x"),
      Err(SessionError::UnknownDocument(_))
    ));
  }

  #[tokio::test(start_paused = true)]
  async fn save_writes_through_the_file_system() {
    let fs = Arc::new(MemoryFileSystem::new().with_file("/work/a.json", "{}"));
    let services = Services::with_fs(Config::default(), fs.clone());
    let mut session = EditorSession::new(services, Handle::current());
    let id = session.open_file("/work/a.json").unwrap();
    session.insert_text(id, Position::new(0, 1), "\"k\": 1").unwrap();
    assert!(session.document(id).unwrap().is_modified());
    session.save(id).unwrap();
    assert_eq!(
      fs.contents(Path::new("/work/a.json")).unwrap(),
      b"{\"k\": 1}".to_vec()
    );
    assert!(!session.document(id).unwrap().is_modified());
  }

  #[tokio::test(start_paused = true)]
  async fn language_server_requires_configuration() {
    let mut session = session_with(MemoryFileSystem::new());
    assert!(matches!(
      session.start_language_server(Path::new("/work")),
      Err(SessionError::NoLanguageServer)
    ));
    assert_eq!(session.shutdown().unwrap(), None);
  }
}
