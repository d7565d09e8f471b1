use serde_json::Value;

use crate::jsonrpc::{
  LspMessage,
  ResponseError,
};

/// What [`LspClient::poll`](crate::LspClient::poll) observed, other than
/// diagnostics, which go to the diagnostics callback.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
  /// The initialize handshake completed and `initialized` was sent.
  Initialized {
    capabilities: Value,
  },
  InitializeFailed {
    message: String,
  },
  Response {
    id:     i64,
    method: Option<String>,
    result: Result<Value, ResponseError>,
  },
  Notification(LspMessage),
  ServerStderr {
    line: String,
  },
  /// The server went away. The client is stopped and will not respawn it.
  ServerExited,
}
