//! JSON-RPC 2.0 message shapes.
//!
//! Outbound traffic is built from [`Message`]. Inbound traffic is decoded
//! into the flatter [`LspMessage`], which only distinguishes "has an id"
//! (a response to one of our requests) from "has no id" (a notification).

use serde::{
  Deserialize,
  Serialize,
};
use serde_json::{
  Map,
  Value,
};
use thiserror::Error;

pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Version {
  #[default]
  #[serde(rename = "2.0")]
  V2,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
  Null,
  Number(u64),
  String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
  #[serde(default)]
  pub jsonrpc: Version,
  pub id:      Id,
  pub method:  String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub params:  Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  #[serde(default)]
  pub jsonrpc: Version,
  pub method:  String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub params:  Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
  pub code:    i64,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data:    Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
  #[serde(default)]
  pub jsonrpc: Version,
  pub id:      Id,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result:  Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error:   Option<ResponseError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
  Request(Request),
  Notification(Notification),
  Response(Response),
}

impl Message {
  pub fn request(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
    Self::Request(Request {
      jsonrpc: Version::V2,
      id: Id::Number(id),
      method: method.into(),
      params,
    })
  }

  pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
    Self::Notification(Notification {
      jsonrpc: Version::V2,
      method: method.into(),
      params,
    })
  }

  pub fn response_err(id: Id, code: i64, message: impl Into<String>) -> Self {
    Self::Response(Response {
      jsonrpc: Version::V2,
      id,
      result: None,
      error: Some(ResponseError {
        code,
        message: message.into(),
        data: None,
      }),
    })
  }

  pub fn method(&self) -> Option<&str> {
    match self {
      Self::Request(request) => Some(&request.method),
      Self::Notification(notification) => Some(&notification.method),
      Self::Response(_) => None,
    }
  }

  pub fn id(&self) -> Option<&Id> {
    match self {
      Self::Request(request) => Some(&request.id),
      Self::Response(response) => Some(&response.id),
      Self::Notification(_) => None,
    }
  }
}

#[derive(Debug, Error)]
pub enum DecodeError {
  #[error("message body is not valid json: {0}")]
  Json(#[from] serde_json::Error),
  #[error("message body is not a json object")]
  NotAnObject,
  #[error("message id {0} is not an integer")]
  InvalidId(Value),
  #[error("message has neither a method nor an id")]
  Empty,
}

/// An inbound message, flattened.
///
/// `method` is empty for responses. `params` is `Value::Null` when the
/// message carries none.
#[derive(Debug, Clone, PartialEq)]
pub struct LspMessage {
  pub method: String,
  pub params: Value,
  pub id:     Option<i64>,
  pub result: Option<Value>,
  pub error:  Option<ResponseError>,
}

impl LspMessage {
  pub fn from_slice(body: &[u8]) -> Result<Self, DecodeError> {
    let value: Value = serde_json::from_slice(body)?;
    Self::from_value(value)
  }

  pub fn from_value(value: Value) -> Result<Self, DecodeError> {
    let Value::Object(mut object) = value else {
      return Err(DecodeError::NotAnObject);
    };
    let id = match object.remove("id") {
      None | Some(Value::Null) => None,
      Some(id) => Some(id.as_i64().ok_or(DecodeError::InvalidId(id))?),
    };
    let method = match object.remove("method") {
      Some(Value::String(method)) => method,
      _ => String::new(),
    };
    if id.is_none() && method.is_empty() {
      return Err(DecodeError::Empty);
    }
    let error = object
      .remove("error")
      .map(serde_json::from_value::<ResponseError>)
      .transpose()?;
    Ok(Self {
      params: take_or_null(&mut object, "params"),
      result: object.remove("result"),
      method,
      id,
      error,
    })
  }

  pub fn is_notification(&self) -> bool {
    self.id.is_none()
  }

  pub fn is_response(&self) -> bool {
    self.id.is_some() && self.method.is_empty()
  }
}

fn take_or_null(object: &mut Map<String, Value>, key: &str) -> Value {
  object.remove(key).unwrap_or(Value::Null)
}
