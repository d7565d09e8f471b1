//! Tracing subscriber setup for the binary.

use std::{
  fs::File,
  path::Path,
  sync::Arc,
};

use anyhow::{
  Context,
  Result,
  anyhow,
};
use tracing_subscriber::EnvFilter;

/// Filter used when neither `-v` nor `RUST_LOG` says otherwise.
const DEFAULT_DIRECTIVE: &str = "warn";

pub fn directive_for_verbosity(verbosity: u8) -> &'static str {
  match verbosity {
    0 => DEFAULT_DIRECTIVE,
    1 => "info",
    2 => "debug",
    _ => "trace",
  }
}

/// `-v` flags win over `RUST_LOG`, which wins over the default.
pub fn env_filter(verbosity: u8) -> EnvFilter {
  if verbosity == 0
    && let Ok(filter) = EnvFilter::try_from_default_env()
  {
    return filter;
  }
  EnvFilter::new(directive_for_verbosity(verbosity))
}

pub fn init(verbosity: u8, log_file: Option<&Path>) -> Result<()> {
  let builder = tracing_subscriber::fmt().with_env_filter(env_filter(verbosity));
  let installed = match log_file {
    Some(path) => {
      if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
      {
        std::fs::create_dir_all(parent)
          .with_context(|| format!("failed to create {}", parent.display()))?;
      }
      let file =
        File::create(path).with_context(|| format!("failed to open log file {}", path.display()))?;
      builder
        .with_ansi(false)
        .with_writer(Arc::new(file))
        .try_init()
    },
    None => builder.with_writer(std::io::stderr).try_init(),
  };
  installed.map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn verbosity_levels() {
    assert_eq!(directive_for_verbosity(0), "warn");
    assert_eq!(directive_for_verbosity(2), "debug");
    assert_eq!(directive_for_verbosity(9), "trace");
    assert_eq!(env_filter(1).to_string(), "info");
  }
}
