use smartstring::{
  LazyCompact,
  SmartString,
};

pub mod diagnostics;
pub mod document;
pub mod history;
pub mod syntax;
pub mod syntax_async;
pub mod text_buffer;

pub type Tendril = SmartString<LazyCompact>;
