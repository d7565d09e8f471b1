//! Language server client: handshake, request ids and message routing.
//!
//! The client is polled from the thread that owns the documents. Transport
//! threads only ever hand it [`TransportEvent`]s through a channel, so every
//! callback fires on the polling thread.
//!
//! ```text
//!   Stopped --start--> Starting --initialize--> Initializing --id 1 reply--> Ready
//!      ^                                                                      |
//!      +------------------------- stop / server exit -------------------------+
//! ```
//!
//! Until the initialize response arrives nothing else may be sent, and any
//! inbound traffic other than that response is dropped.

use std::{
  collections::HashMap,
  ffi::OsStr,
  path::Path,
};

use scribe_core::{
  ErrorCode,
  uri::{
    Uri,
    UrlConversionError,
  },
};
use scribe_lib::diagnostics::Diagnostic;
use serde_json::{
  Value,
  json,
};
use thiserror::Error;
use tracing::{
  debug,
  info,
  warn,
};

use crate::{
  diagnostics::{
    PUBLISH_DIAGNOSTICS,
    parse_publish_diagnostics,
  },
  event::ClientEvent,
  jsonrpc::{
    Id,
    LspMessage,
    METHOD_NOT_FOUND,
    Message,
  },
  text_sync,
  transport::{
    StdioTransport,
    Transport,
    TransportError,
    TransportEvent,
  },
};

pub type DiagnosticsCallback = Box<dyn FnMut(&str, Option<i32>, Vec<Diagnostic>) + Send>;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
  #[error(transparent)]
  Transport(#[from] TransportError),
  #[error("language server is not running")]
  NotRunning,
  #[error("cannot send '{method}' before the initialize handshake completes")]
  NotReady { method: String },
  #[error("language server is already initialized")]
  AlreadyInitialized,
  #[error(transparent)]
  Uri(#[from] UrlConversionError),
}

impl ClientError {
  pub fn code(&self) -> ErrorCode {
    match self {
      Self::Transport(err) => err.code(),
      Self::NotRunning | Self::NotReady { .. } | Self::AlreadyInitialized | Self::Uri(_) => {
        ErrorCode::InvalidArgument
      },
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
  Stopped,
  Starting,
  Initializing,
  Ready,
}

pub struct LspClient {
  transport:      Option<Box<dyn Transport>>,
  state:          ClientState,
  next_id:        u64,
  pending:        HashMap<u64, String>,
  initialize_id:  Option<u64>,
  capabilities:   Option<Value>,
  on_diagnostics: Option<DiagnosticsCallback>,
}

impl Default for LspClient {
  fn default() -> Self {
    Self::new()
  }
}

impl LspClient {
  pub fn new() -> Self {
    Self {
      transport:      None,
      state:          ClientState::Stopped,
      next_id:        1,
      pending:        HashMap::new(),
      initialize_id:  None,
      capabilities:   None,
      on_diagnostics: None,
    }
  }

  pub fn state(&self) -> ClientState {
    self.state
  }

  pub fn is_ready(&self) -> bool {
    self.state == ClientState::Ready
  }

  pub fn capabilities(&self) -> Option<&Value> {
    self.capabilities.as_ref()
  }

  pub fn pending_requests(&self) -> usize {
    self.pending.len()
  }

  pub fn set_diagnostics_callback(
    &mut self,
    callback: impl FnMut(&str, Option<i32>, Vec<Diagnostic>) + Send + 'static,
  ) {
    self.on_diagnostics = Some(Box::new(callback));
  }

  /// Spawn the server. A client that is already running is left alone.
  pub fn start(
    &mut self,
    executable: impl AsRef<OsStr>,
    args: &[String],
    workspace_root: Option<&Path>,
  ) -> Result<()> {
    if self.state != ClientState::Stopped {
      return Ok(());
    }
    let transport = StdioTransport::spawn(executable, args, workspace_root)?;
    self.attach(Box::new(transport));
    Ok(())
  }

  /// Drive an already established transport.
  pub fn attach(&mut self, transport: Box<dyn Transport>) {
    self.transport = Some(transport);
    self.state = ClientState::Starting;
    self.next_id = 1;
    self.pending.clear();
    self.initialize_id = None;
    self.capabilities = None;
  }

  pub fn initialize(&mut self, root: &Path) -> Result<u64> {
    match self.state {
      ClientState::Starting => {},
      ClientState::Stopped => return Err(ClientError::NotRunning),
      ClientState::Initializing | ClientState::Ready => {
        return Err(ClientError::AlreadyInitialized);
      },
    }
    let root_uri = Uri::from_path(root)?.to_url()?;
    let params = json!({
      "processId": std::process::id(),
      "rootUri": root_uri.as_str(),
      "capabilities": {},
    });
    let id = self.dispatch_request("initialize", Some(params))?;
    self.initialize_id = Some(id);
    self.state = ClientState::Initializing;
    info!(root = %root_uri, "initializing language server");
    Ok(id)
  }

  pub fn send_request(&mut self, method: &str, params: Option<Value>) -> Result<u64> {
    self.ensure_ready(method)?;
    self.dispatch_request(method, params)
  }

  pub fn send_notification(&mut self, method: &str, params: Option<Value>) -> Result<()> {
    self.ensure_ready(method)?;
    self.transport()?.send(Message::notification(method, params))?;
    Ok(())
  }

  fn ensure_ready(&self, method: &str) -> Result<()> {
    match self.state {
      ClientState::Ready => Ok(()),
      ClientState::Stopped => Err(ClientError::NotRunning),
      ClientState::Starting | ClientState::Initializing => {
        Err(ClientError::NotReady {
          method: method.to_string(),
        })
      },
    }
  }

  fn transport(&self) -> Result<&dyn Transport> {
    self.transport.as_deref().ok_or(ClientError::NotRunning)
  }

  fn dispatch_request(&mut self, method: &str, params: Option<Value>) -> Result<u64> {
    let id = self.next_id;
    self
      .transport()?
      .send(Message::request(id, method, params))?;
    self.next_id += 1;
    self.pending.insert(id, method.to_string());
    debug!(id, method, "request sent");
    Ok(id)
  }

  pub fn did_open(&mut self, uri: &str, language_id: &str, version: i32, text: &str) -> Result<()> {
    self.send_notification(
      "textDocument/didOpen",
      Some(text_sync::did_open_params(uri, language_id, version, text)),
    )
  }

  pub fn did_change(&mut self, uri: &str, version: i32, text: &str) -> Result<()> {
    self.send_notification(
      "textDocument/didChange",
      Some(text_sync::did_change_params(uri, version, text)),
    )
  }

  pub fn did_save(&mut self, uri: &str, text: Option<&str>) -> Result<()> {
    self.send_notification(
      "textDocument/didSave",
      Some(text_sync::did_save_params(uri, text)),
    )
  }

  pub fn did_close(&mut self, uri: &str) -> Result<()> {
    self.send_notification(
      "textDocument/didClose",
      Some(text_sync::did_close_params(uri)),
    )
  }

  /// Handle everything the transport delivered since the last call.
  pub fn poll(&mut self) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    loop {
      let Some(event) = self
        .transport
        .as_deref()
        .and_then(|transport| transport.try_recv_event())
      else {
        break;
      };
      match event {
        TransportEvent::Message(message) => self.handle_message(message, &mut events),
        TransportEvent::Stderr(line) => {
          debug!(target: "scribe_lsp::server", "{line}");
          events.push(ClientEvent::ServerStderr { line });
        },
        TransportEvent::ReadError(err) => warn!(error = %err, "language server read failed"),
        TransportEvent::WriteError(err) => warn!(error = %err, "language server write failed"),
        TransportEvent::Closed => {
          warn!("language server exited");
          if let Err(err) = self.stop() {
            warn!(error = %err, "failed to reap language server");
          }
          events.push(ClientEvent::ServerExited);
          break;
        },
      }
    }
    events
  }

  fn handle_message(&mut self, message: LspMessage, events: &mut Vec<ClientEvent>) {
    match message.id {
      Some(id) if message.method.is_empty() => self.handle_response(id, message, events),
      Some(id) => self.handle_server_request(id, message),
      None => self.handle_notification(message, events),
    }
  }

  fn handle_response(&mut self, id: i64, message: LspMessage, events: &mut Vec<ClientEvent>) {
    let method = u64::try_from(id)
      .ok()
      .and_then(|id| self.pending.remove(&id));

    let is_handshake = self.state == ClientState::Initializing
      && self.initialize_id.is_some_and(|init| i64::try_from(init) == Ok(id));
    if is_handshake {
      self.finish_handshake(message, events);
      return;
    }
    if self.state != ClientState::Ready {
      debug!(id, "dropping response received before the handshake");
      return;
    }

    let result = match message.error {
      Some(error) => Err(error),
      None => Ok(message.result.unwrap_or(Value::Null)),
    };
    events.push(ClientEvent::Response { id, method, result });
  }

  fn finish_handshake(&mut self, message: LspMessage, events: &mut Vec<ClientEvent>) {
    if let Some(error) = message.error {
      warn!(code = error.code, message = %error.message, "initialize failed");
      events.push(ClientEvent::InitializeFailed {
        message: error.message,
      });
      if let Err(err) = self.stop() {
        warn!(error = %err, "failed to stop language server");
      }
      return;
    }

    let capabilities = message
      .result
      .as_ref()
      .and_then(|result| result.get("capabilities"))
      .cloned()
      .unwrap_or(Value::Null);
    let sent = self
      .transport()
      .and_then(|transport| {
        transport
          .send(Message::notification("initialized", Some(json!({}))))
          .map_err(ClientError::from)
      });
    if let Err(err) = sent {
      warn!(error = %err, "failed to send initialized");
      return;
    }
    self.capabilities = Some(capabilities.clone());
    self.state = ClientState::Ready;
    info!("language server ready");
    events.push(ClientEvent::Initialized { capabilities });
  }

  fn handle_server_request(&mut self, id: i64, message: LspMessage) {
    if self.state != ClientState::Ready {
      debug!(id, method = %message.method, "dropping server request received before the handshake");
      return;
    }
    let Ok(id) = u64::try_from(id) else {
      return;
    };
    debug!(id, method = %message.method, "rejecting unsupported server request");
    let reply = Message::response_err(
      Id::Number(id),
      METHOD_NOT_FOUND,
      format!("unsupported method '{}'", message.method),
    );
    if let Ok(transport) = self.transport()
      && let Err(err) = transport.send(reply)
    {
      warn!(error = %err, "failed to answer server request");
    }
  }

  fn handle_notification(&mut self, message: LspMessage, events: &mut Vec<ClientEvent>) {
    if self.state != ClientState::Ready {
      debug!(method = %message.method, "dropping notification received before the handshake");
      return;
    }
    if message.method != PUBLISH_DIAGNOSTICS {
      events.push(ClientEvent::Notification(message));
      return;
    }
    match parse_publish_diagnostics(Some(&message.params)) {
      Ok(published) => {
        debug!(
          uri = %published.uri,
          version = ?published.version,
          count = published.diagnostics.len(),
          "diagnostics published"
        );
        if let Some(callback) = self.on_diagnostics.as_mut() {
          callback(&published.uri, published.version, published.diagnostics);
        }
      },
      Err(err) => warn!(error = %err, "skipping malformed diagnostics"),
    }
  }

  /// Shut the server down. Stopping a stopped client does nothing.
  pub fn stop(&mut self) -> Result<Option<i32>> {
    let Some(mut transport) = self.transport.take() else {
      self.state = ClientState::Stopped;
      return Ok(None);
    };
    if self.state == ClientState::Ready
      && let Err(err) = transport.send(Message::notification("exit", None))
    {
      debug!(error = %err, "could not send exit");
    }
    self.state = ClientState::Stopped;
    self.pending.clear();
    let code = transport.stop()?;
    Ok(code)
  }
}

impl Drop for LspClient {
  fn drop(&mut self) {
    if let Err(err) = self.stop() {
      warn!(error = %err, "failed to stop language server");
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    collections::VecDeque,
    sync::Arc,
  };

  use parking_lot::Mutex;
  use scribe_lib::diagnostics::DiagnosticSeverity;

  use super::*;

  #[derive(Clone, Default)]
  struct Loopback {
    sent:    Arc<Mutex<Vec<Message>>>,
    inbox:   Arc<Mutex<VecDeque<TransportEvent>>>,
    stopped: Arc<Mutex<bool>>,
  }

  impl Loopback {
    fn push(&self, value: Value) {
      let message = LspMessage::from_value(value).unwrap();
      self.inbox.lock().push_back(TransportEvent::Message(message));
    }

    fn sent_methods(&self) -> Vec<Option<String>> {
      self
        .sent
        .lock()
        .iter()
        .map(|message| message.method().map(str::to_string))
        .collect()
    }
  }

  impl Transport for Loopback {
    fn send(&self, message: Message) -> std::result::Result<(), TransportError> {
      if *self.stopped.lock() {
        return Err(TransportError::OutboundChannelClosed);
      }
      self.sent.lock().push(message);
      Ok(())
    }

    fn try_recv_event(&self) -> Option<TransportEvent> {
      self.inbox.lock().pop_front()
    }

    fn stop(&mut self) -> std::result::Result<Option<i32>, TransportError> {
      *self.stopped.lock() = true;
      Ok(Some(0))
    }

    fn is_running(&self) -> bool {
      !*self.stopped.lock()
    }
  }

  fn diagnostics_payload(version: i32) -> Value {
    json!({
      "jsonrpc": "2.0",
      "method": "textDocument/publishDiagnostics",
      "params": {
        "uri": "file:///tmp/a.rs",
        "version": version,
        "diagnostics": [{
          "range": {
            "start": { "line": 0, "character": 0 },
            "end": { "line": 0, "character": 2 }
          },
          "severity": 1,
          "message": "boom"
        }]
      }
    })
  }

  type Received = Arc<Mutex<Vec<(String, Option<i32>, Vec<Diagnostic>)>>>;

  fn ready_client() -> (LspClient, Loopback, Received) {
    let loopback = Loopback::default();
    let mut client = LspClient::new();
    let received: Received = Arc::default();
    let sink = received.clone();
    client.set_diagnostics_callback(move |uri, version, diagnostics| {
      sink.lock().push((uri.to_string(), version, diagnostics));
    });
    client.attach(Box::new(loopback.clone()));
    client.initialize(&std::env::temp_dir()).unwrap();
    loopback.push(json!({ "jsonrpc": "2.0", "id": 1, "result": { "capabilities": {} } }));
    client.poll();
    assert!(client.is_ready());
    (client, loopback, received)
  }

  #[test]
  fn handshake_sends_initialized_after_first_response() {
    let loopback = Loopback::default();
    let mut client = LspClient::new();
    assert!(matches!(
      client.initialize(Path::new("/")),
      Err(ClientError::NotRunning)
    ));
    client.attach(Box::new(loopback.clone()));
    assert_eq!(client.state(), ClientState::Starting);
    assert!(matches!(
      client.send_notification("textDocument/didOpen", None),
      Err(ClientError::NotReady { .. })
    ));

    let root = std::env::temp_dir();
    assert_eq!(client.initialize(&root).unwrap(), 1);
    assert_eq!(client.state(), ClientState::Initializing);
    assert!(matches!(
      client.initialize(&root),
      Err(ClientError::AlreadyInitialized)
    ));
    {
      let sent = loopback.sent.lock();
      let Message::Request(request) = &sent[0] else {
        panic!("expected a request, got {:?}", sent[0]);
      };
      assert_eq!(request.id, Id::Number(1));
      let params = request.params.as_ref().unwrap();
      assert_eq!(params["processId"], std::process::id());
      assert!(params["rootUri"].as_str().unwrap().starts_with("file://"));
      assert_eq!(params["capabilities"], json!({}));
    }

    // Traffic before the handshake is dropped.
    loopback.push(json!({ "jsonrpc": "2.0", "method": "window/logMessage", "params": {} }));
    assert!(client.poll().is_empty());

    loopback.push(json!({
      "jsonrpc": "2.0",
      "id": 1,
      "result": { "capabilities": { "textDocumentSync": 1 } }
    }));
    let events = client.poll();
    assert_eq!(events, vec![ClientEvent::Initialized {
      capabilities: json!({ "textDocumentSync": 1 }),
    }]);
    assert_eq!(client.state(), ClientState::Ready);
    assert_eq!(loopback.sent_methods(), [
      Some("initialize".to_string()),
      Some("initialized".to_string())
    ]);
    assert_eq!(client.send_request("textDocument/hover", None).unwrap(), 2);
  }

  #[test]
  fn diagnostics_are_routed_to_the_callback() {
    let (mut client, loopback, received) = ready_client();
    loopback.push(diagnostics_payload(4));
    loopback.push(json!({ "jsonrpc": "2.0", "method": "$/progress", "params": {} }));
    let events = client.poll();
    assert!(matches!(&events[..], [ClientEvent::Notification(message)] if message.method == "$/progress"));

    let received = received.lock();
    assert_eq!(received.len(), 1);
    let (uri, version, diagnostics) = &received[0];
    assert_eq!(uri, "file:///tmp/a.rs");
    assert_eq!(*version, Some(4));
    assert_eq!(diagnostics[0].severity, DiagnosticSeverity::Error);
    assert_eq!(diagnostics[0].message, "boom");
  }

  #[test]
  fn responses_are_correlated_and_server_requests_rejected() {
    let (mut client, loopback, _) = ready_client();
    let id = client.send_request("textDocument/definition", None).unwrap();
    loopback.push(json!({ "jsonrpc": "2.0", "id": id, "result": [] }));
    loopback.push(json!({ "jsonrpc": "2.0", "id": 77, "method": "workspace/configuration" }));
    let events = client.poll();
    assert_eq!(events, vec![ClientEvent::Response {
      id:     id as i64,
      method: Some("textDocument/definition".into()),
      result: Ok(json!([])),
    }]);
    assert_eq!(client.pending_requests(), 0);

    let sent = loopback.sent.lock();
    let Some(Message::Response(reply)) = sent.last() else {
      panic!("expected a reply to the server request");
    };
    assert_eq!(reply.id, Id::Number(77));
    assert_eq!(reply.error.as_ref().unwrap().code, METHOD_NOT_FOUND);
  }

  #[test]
  fn server_exit_stops_the_client() {
    let (mut client, loopback, _) = ready_client();
    loopback.inbox.lock().push_back(TransportEvent::Closed);
    assert_eq!(client.poll(), vec![ClientEvent::ServerExited]);
    assert_eq!(client.state(), ClientState::Stopped);
    assert!(*loopback.stopped.lock());
    assert_eq!(client.stop().unwrap(), None);
    assert!(matches!(
      client.did_change("file:///tmp/a.rs", 2, ""),
      Err(ClientError::NotRunning)
    ));
  }

  #[test]
  fn failed_initialize_stops() {
    let loopback = Loopback::default();
    let mut client = LspClient::new();
    client.attach(Box::new(loopback.clone()));
    client.initialize(&std::env::temp_dir()).unwrap();
    loopback.push(json!({
      "jsonrpc": "2.0",
      "id": 1,
      "error": { "code": -32603, "message": "no workspace" }
    }));
    assert_eq!(client.poll(), vec![ClientEvent::InitializeFailed {
      message: "no workspace".into(),
    }]);
    assert_eq!(client.state(), ClientState::Stopped);
  }

  #[cfg(unix)]
  #[test]
  fn talks_to_a_real_process() {
    use std::time::{
      Duration,
      Instant,
    };

    const SERVER: &str = r#"
IFS= read -r header
body='{"jsonrpc":"2.0","id":1,"result":{"capabilities":{"textDocumentSync":1}}}'
printf 'Content-Length: %d\r\n\r\n%s' "${#body}" "$body"
IFS= read -r next
case "$next" in *Content-Length*) echo "second-message" >&2;; esac
printf 'Content-Length: 3\r\n\r\n{x}'
diag='{"jsonrpc":"2.0","method":"textDocument/publishDiagnostics","params":{"uri":"file:///tmp/a.rs","version":1,"diagnostics":[{"range":{"start":{"line":0,"character":0},"end":{"line":0,"character":2}},"message":"boom"}]}}'
printf 'Content-Length: %d\r\n\r\n%s' "${#diag}" "$diag"
cat > /dev/null
"#;

    let received: Received = Arc::default();
    let sink = received.clone();
    let mut client = LspClient::new();
    client.set_diagnostics_callback(move |uri, version, diagnostics| {
      sink.lock().push((uri.to_string(), version, diagnostics));
    });
    client
      .start("sh", &["-c".to_string(), SERVER.to_string()], None)
      .unwrap();
    client.initialize(&std::env::temp_dir()).unwrap();

    let mut events = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    let saw_stderr = |events: &[ClientEvent]| {
      events.iter().any(|event| {
        matches!(event, ClientEvent::ServerStderr { line } if line == "second-message")
      })
    };
    while Instant::now() < deadline && (received.lock().is_empty() || !saw_stderr(&events)) {
      events.extend(client.poll());
      std::thread::sleep(Duration::from_millis(10));
    }

    assert!(events.contains(&ClientEvent::Initialized {
      capabilities: json!({ "textDocumentSync": 1 }),
    }));
    assert!(saw_stderr(&events));
    {
      let received = received.lock();
      assert_eq!(received.len(), 1);
      assert_eq!(received[0].1, Some(1));
      assert_eq!(received[0].2[0].severity, DiagnosticSeverity::Warning);
      assert_eq!(received[0].2[0].source, "lsp");
    }

    client.did_open("file:///tmp/a.rs", "rust", 2, "fn main() {}").unwrap();
    assert_eq!(client.stop().unwrap(), Some(0));
    assert_eq!(client.state(), ClientState::Stopped);
    assert_eq!(client.stop().unwrap(), None);
  }
}
