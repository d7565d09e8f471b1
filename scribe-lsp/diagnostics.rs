use scribe_core::{
  Position,
  TextRange,
};
use scribe_lib::diagnostics::{
  Diagnostic,
  DiagnosticSeverity,
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";

#[derive(Debug, Error)]
pub enum PublishDiagnosticsError {
  #[error("publishDiagnostics missing params")]
  MissingParams,
  #[error("publishDiagnostics params decode failed: {0}")]
  Decode(#[from] serde_json::Error),
}

/// One `publishDiagnostics` payload. Positions are still in the server's
/// coordinates (UTF-16 columns).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedDiagnostics {
  pub uri:         String,
  pub version:     Option<i32>,
  pub diagnostics: Vec<Diagnostic>,
}

pub fn parse_publish_diagnostics(
  params: Option<&Value>,
) -> Result<PublishedDiagnostics, PublishDiagnosticsError> {
  let Some(params) = params.filter(|params| !params.is_null()) else {
    return Err(PublishDiagnosticsError::MissingParams);
  };
  let payload: PublishDiagnosticsPayload = serde_json::from_value(params.clone())?;
  Ok(payload.into_published())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishDiagnosticsPayload {
  #[serde(default)]
  uri:         String,
  version:     Option<i32>,
  #[serde(default)]
  diagnostics: Vec<DiagnosticPayload>,
}

impl PublishDiagnosticsPayload {
  fn into_published(self) -> PublishedDiagnostics {
    PublishedDiagnostics {
      uri:         self.uri,
      version:     self.version,
      diagnostics: self
        .diagnostics
        .into_iter()
        .map(DiagnosticPayload::into_diagnostic)
        .collect(),
    }
  }
}

#[derive(Debug, Deserialize)]
struct DiagnosticPayload {
  #[serde(default)]
  range:    RangePayload,
  severity: Option<u8>,
  source:   Option<String>,
  #[serde(default)]
  message:  String,
}

impl DiagnosticPayload {
  fn into_diagnostic(self) -> Diagnostic {
    Diagnostic {
      range:    self.range.into_range(),
      severity: self
        .severity
        .and_then(DiagnosticSeverity::from_lsp_code)
        .unwrap_or(DiagnosticSeverity::Warning),
      source:   self.source.unwrap_or_else(|| "lsp".to_string()),
      message:  self.message,
    }
  }
}

#[derive(Debug, Default, Deserialize)]
struct RangePayload {
  #[serde(default)]
  start: PositionPayload,
  #[serde(default)]
  end:   PositionPayload,
}

impl RangePayload {
  fn into_range(self) -> TextRange {
    TextRange::new(self.start.into_position(), self.end.into_position())
  }
}

#[derive(Debug, Default, Deserialize)]
struct PositionPayload {
  #[serde(default)]
  line:      u32,
  #[serde(default)]
  character: u32,
}

impl PositionPayload {
  fn into_position(self) -> Position {
    Position::new(self.line, self.character)
  }
}
