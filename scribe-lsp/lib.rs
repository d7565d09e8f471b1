pub mod client;
pub mod diagnostics;
pub mod event;
pub mod framing;
pub mod jsonrpc;
pub mod text_sync;
pub mod transport;

pub use client::{
  ClientError,
  ClientState,
  LspClient,
};
pub use event::ClientEvent;
pub use framing::{
  FramingError,
  MessageParser,
};
pub use jsonrpc::LspMessage;
pub use transport::{
  StdioTransport,
  Transport,
  TransportError,
  TransportEvent,
};
