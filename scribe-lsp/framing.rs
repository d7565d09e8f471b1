//! `Content-Length` framing.
//!
//! Bytes are appended as they arrive; a message is only extracted once its
//! header block and the full declared body are buffered. Anything after that
//! stays buffered for the next call.

use thiserror::Error;
use tracing::warn;

use crate::jsonrpc::{
  DecodeError,
  LspMessage,
  Message,
};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Header blocks longer than this without a terminator are discarded.
pub const MAX_HEADER_LEN: usize = 8 * 1024;

/// Largest body a frame may declare. Bigger frames are dropped unread.
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FramingError {
  #[error("header block is not valid ascii")]
  InvalidHeader,
  #[error("missing content-length header")]
  MissingContentLength,
  #[error("invalid content-length header value: {0}")]
  InvalidContentLength(String),
  #[error("header block exceeds {MAX_HEADER_LEN} bytes")]
  HeaderTooLong,
  #[error(transparent)]
  Decode(#[from] DecodeError),
}

impl FramingError {
  pub fn code(&self) -> scribe_core::ErrorCode {
    scribe_core::ErrorCode::ParseError
  }
}

#[derive(Debug, Default)]
pub struct MessageParser {
  buffer: Vec<u8>,
}

impl MessageParser {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn append(&mut self, bytes: &[u8]) {
    self.buffer.extend_from_slice(bytes);
  }

  pub fn buffered(&self) -> usize {
    self.buffer.len()
  }

  /// Body of the next complete frame.
  ///
  /// A frame with a broken header is dropped together with its header block
  /// and reported as an error; the parser stays usable.
  pub fn next_frame(&mut self) -> Option<Result<Vec<u8>, FramingError>> {
    let Some(header_end) = find(&self.buffer, HEADER_TERMINATOR) else {
      if self.buffer.len() > MAX_HEADER_LEN {
        self.buffer.clear();
        return Some(Err(FramingError::HeaderTooLong));
      }
      return None;
    };
    let body_start = header_end + HEADER_TERMINATOR.len();
    let content_length = match parse_content_length(&self.buffer[..header_end]) {
      Ok(len) => len,
      Err(err) => {
        self.buffer.drain(..body_start);
        return Some(Err(err));
      },
    };
    let Some(body_end) = body_start
      .checked_add(content_length)
      .filter(|_| content_length <= MAX_CONTENT_LENGTH)
    else {
      self.buffer.drain(..body_start);
      return Some(Err(FramingError::InvalidContentLength(
        content_length.to_string(),
      )));
    };
    if self.buffer.len() < body_end {
      return None;
    }
    let body = self.buffer[body_start..body_end].to_vec();
    self.buffer.drain(..body_end);
    Some(Ok(body))
  }

  pub fn next_message(&mut self) -> Option<Result<LspMessage, FramingError>> {
    let frame = self.next_frame()?;
    Some(frame.and_then(|body| LspMessage::from_slice(&body).map_err(FramingError::from)))
  }

  /// Every complete message currently buffered. Malformed ones are logged
  /// and skipped.
  pub fn drain_messages(&mut self) -> Vec<LspMessage> {
    let mut messages = Vec::new();
    while let Some(next) = self.next_message() {
      match next {
        Ok(message) => messages.push(message),
        Err(err) => warn!(error = %err, "skipping malformed lsp message"),
      }
    }
    messages
  }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
  haystack
    .windows(needle.len())
    .position(|window| window == needle)
}

fn parse_content_length(header: &[u8]) -> Result<usize, FramingError> {
  let header = std::str::from_utf8(header).map_err(|_| FramingError::InvalidHeader)?;
  let mut content_length = None;
  for line in header.split("\r\n") {
    let Some((name, value)) = line.split_once(':') else {
      continue;
    };
    if name.trim().eq_ignore_ascii_case("content-length") {
      let value = value.trim();
      content_length = Some(
        value
          .parse::<usize>()
          .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?,
      );
    }
  }
  content_length.ok_or(FramingError::MissingContentLength)
}

pub fn encode_body(body: &[u8]) -> Vec<u8> {
  let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
  out.extend_from_slice(body);
  out
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>, serde_json::Error> {
  let body = serde_json::to_vec(message)?;
  Ok(encode_body(&body))
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn byte_by_byte_reassembly() {
    let message = Message::request(7, "textDocument/hover", Some(json!({ "line": 3 })));
    let bytes = encode_message(&message).unwrap();

    let mut parser = MessageParser::new();
    let (last, head) = bytes.split_last().unwrap();
    for byte in head {
      parser.append(std::slice::from_ref(byte));
      assert!(parser.next_message().is_none());
    }
    parser.append(std::slice::from_ref(last));
    let decoded = parser.next_message().unwrap().unwrap();
    assert_eq!(decoded.method, "textDocument/hover");
    assert_eq!(decoded.id, Some(7));
    assert_eq!(decoded.params, json!({ "line": 3 }));
    assert_eq!(parser.buffered(), 0);
  }

  #[test]
  fn multiple_frames_in_one_chunk() {
    let mut bytes = encode_message(&Message::notification("a", None)).unwrap();
    bytes.extend(encode_message(&Message::notification("b", None)).unwrap());
    bytes.extend_from_slice(b"Content-Length: 40\r\n\r\n{\"jsonrpc\"");

    let mut parser = MessageParser::new();
    parser.append(&bytes);
    let methods: Vec<_> = parser
      .drain_messages()
      .into_iter()
      .map(|message| message.method)
      .collect();
    assert_eq!(methods, ["a", "b"]);
    assert!(parser.buffered() > 0);
  }

  #[test]
  fn unknown_headers_and_case_are_tolerated() {
    let body = br#"{"jsonrpc":"2.0","method":"x"}"#;
    let mut parser = MessageParser::new();
    parser.append(
      format!(
        "content-length: {}\r\nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\n",
        body.len()
      )
      .as_bytes(),
    );
    parser.append(body);
    assert_eq!(parser.next_message().unwrap().unwrap().method, "x");
  }

  #[test]
  fn malformed_messages_are_skipped() {
    let mut parser = MessageParser::new();
    parser.append(b"Content-Type: text/plain\r\n\r\n");
    parser.append(&encode_body(b"{not json"));
    parser.append(b"Content-Length: nine\r\n\r\n");
    parser.append(&encode_message(&Message::notification("ok", None)).unwrap());

    assert!(matches!(
      parser.next_message(),
      Some(Err(FramingError::MissingContentLength))
    ));
    assert!(matches!(
      parser.next_message(),
      Some(Err(FramingError::Decode(DecodeError::Json(_))))
    ));
    assert!(matches!(
      parser.next_message(),
      Some(Err(FramingError::InvalidContentLength(value))) if value == "nine"
    ));
    assert_eq!(parser.next_message().unwrap().unwrap().method, "ok");
    assert!(parser.next_message().is_none());
  }

  #[test]
  fn oversized_content_length_is_rejected() {
    let mut parser = MessageParser::new();
    parser.append(format!("Content-Length: {}\r\n\r\n", usize::MAX).as_bytes());
    parser.append(format!("Content-Length: {}\r\n\r\n", MAX_CONTENT_LENGTH + 1).as_bytes());
    parser.append(&encode_message(&Message::notification("ok", None)).unwrap());

    assert!(matches!(
      parser.next_message(),
      Some(Err(FramingError::InvalidContentLength(value))) if value == usize::MAX.to_string()
    ));
    assert!(matches!(
      parser.next_message(),
      Some(Err(FramingError::InvalidContentLength(_)))
    ));
    assert_eq!(parser.next_message().unwrap().unwrap().method, "ok");
    assert_eq!(parser.buffered(), 0);
  }

  #[test]
  fn runaway_header_is_discarded() {
    let mut parser = MessageParser::new();
    parser.append(&vec![b'x'; MAX_HEADER_LEN + 1]);
    assert!(matches!(
      parser.next_message(),
      Some(Err(FramingError::HeaderTooLong))
    ));
    assert_eq!(parser.buffered(), 0);
  }
}
