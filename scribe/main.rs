//! Command line front end: open one file, parse it, print what the
//! highlighter sees and whatever a language server reports about it.

use std::{
  path::{
    Path,
    PathBuf,
  },
  time::{
    Duration,
    Instant,
  },
};

use anyhow::{
  Context,
  Result,
};
use clap::{
  ArgAction,
  Parser,
};
use scribe::{
  Config,
  EditorSession,
  Services,
  config::find_workspace_in,
  logging,
};
use scribe_core::DocumentId;
use scribe_lib::diagnostics::{
  Diagnostic,
  DiagnosticSeverity,
};
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Parser)]
#[command(name = "scribe")]
#[command(about = "Parse a file and print its highlights and diagnostics")]
struct Cli {
  /// Raise log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, action = ArgAction::Count)]
  verbose: u8,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log: Option<PathBuf>,

  /// Use this config file instead of the global and workspace ones
  #[arg(long)]
  config: Option<PathBuf>,

  /// Language server executable, overriding the configured one
  #[arg(long)]
  server: Option<String>,

  /// Extra argument for the language server (repeatable)
  #[arg(long = "server-arg", allow_hyphen_values = true)]
  server_args: Vec<String>,

  /// Print the syntax tree as an s-expression
  #[arg(long)]
  dump_tree: bool,

  /// How long to wait for diagnostics from the language server
  #[arg(long, default_value_t = 3000)]
  wait_ms: u64,

  /// File to open
  file: PathBuf,
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  logging::init(cli.verbose, cli.log.as_deref())?;

  let cwd = std::env::current_dir().context("failed to read the working directory")?;
  let config = match &cli.config {
    Some(path) => Config::load_files(Path::new(""), path)?,
    None => Config::load_default(&cwd)?,
  };
  let server = match cli.server.clone() {
    Some(command) => Some((command, cli.server_args.clone())),
    None => {
      config
        .language_server
        .as_ref()
        .map(|server| (server.command.clone(), server.args.clone()))
    },
  };

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .worker_threads(1)
    .enable_time()
    .build()
    .context("failed to start the async runtime")?;
  let mut session = EditorSession::new(Services::new(config), runtime.handle().clone());

  let id = session
    .open_file(&cli.file)
    .with_context(|| format!("failed to open {}", cli.file.display()))?;
  print_highlights(&session, id);
  if cli.dump_tree
    && let Some(tree) = session.dump_tree(id)
  {
    println!("{tree}");
  }

  if let Some((command, args)) = server {
    let root = cli
      .file
      .parent()
      .filter(|parent| !parent.as_os_str().is_empty())
      .map(|parent| find_workspace_in(&cwd.join(parent)))
      .unwrap_or_else(|| find_workspace_in(&cwd));
    session
      .start_language_server_with(&command, &args, &root)
      .with_context(|| format!("failed to start language server {command}"))?;
    wait_for_diagnostics(&mut session, id, Duration::from_millis(cli.wait_ms));
    for diagnostic in session.diagnostics(id) {
      print_diagnostic(&cli.file, diagnostic);
    }
  }

  if let Some(code) = session.shutdown()? {
    info!(code, "language server exited");
  }
  Ok(())
}

fn print_highlights(session: &EditorSession, id: DocumentId) {
  let Some(engine) = session.engine(id) else {
    return;
  };
  for capture in engine.captures().iter() {
    let start = engine.position_for_byte(capture.byte_range.start);
    let end = engine.position_for_byte(capture.byte_range.end);
    println!(
      "{}:{}-{}:{} {}",
      start.line + 1,
      start.character + 1,
      end.line + 1,
      end.character + 1,
      engine.category_name(capture.category).unwrap_or("?"),
    );
  }
}

fn wait_for_diagnostics(session: &mut EditorSession, id: DocumentId, timeout: Duration) {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    session.poll();
    if !session.diagnostics(id).is_empty() {
      return;
    }
    std::thread::sleep(POLL_INTERVAL);
  }
}

fn print_diagnostic(path: &Path, diagnostic: &Diagnostic) {
  let start = diagnostic.range.start;
  println!(
    "{}:{}:{}: {}: {} [{}]",
    path.display(),
    start.line + 1,
    start.character + 1,
    severity_label(diagnostic.severity),
    diagnostic.message,
    diagnostic.source,
  );
}

fn severity_label(severity: DiagnosticSeverity) -> &'static str {
  match severity {
    DiagnosticSeverity::Error => "error",
    DiagnosticSeverity::Warning => "warning",
    DiagnosticSeverity::Information => "info",
    DiagnosticSeverity::Hint => "hint",
  }
}
