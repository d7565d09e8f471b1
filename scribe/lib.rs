//! The scribe editor core wired together: configuration, logging and the
//! editing session that owns documents, parsing and the language server.

pub mod config;
pub mod logging;
pub mod services;
pub mod session;

pub use config::Config;
pub use services::Services;
pub use session::{
  EditorSession,
  SessionError,
  SessionEvent,
};
