use std::{
  io::{
    BufRead,
    BufReader,
    BufWriter,
    ErrorKind,
    Read,
    Write,
  },
  path::Path,
  process::{
    Child,
    ChildStderr,
    ChildStdin,
    ChildStdout,
    Command,
    Stdio,
  },
  sync::mpsc::{
    Receiver,
    RecvTimeoutError,
    Sender,
    TryRecvError,
    channel,
  },
  thread::{
    self,
    JoinHandle,
  },
  time::{
    Duration,
    Instant,
  },
};

use scribe_core::ErrorCode;
use thiserror::Error;
use tracing::{
  debug,
  warn,
};

use crate::{
  framing::{
    self,
    MessageParser,
  },
  jsonrpc::{
    LspMessage,
    Message,
  },
};

/// Sleep between reads when the pipe reports no data.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 4096;
/// How long `stop` waits for the server to exit on its own before killing it.
pub const STOP_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
  Message(LspMessage),
  Stderr(String),
  ReadError(String),
  WriteError(String),
  Closed,
}

/// A bidirectional message pipe to a language server.
pub trait Transport: Send {
  fn send(&self, message: Message) -> Result<(), TransportError>;
  fn try_recv_event(&self) -> Option<TransportEvent>;
  /// Stop the transport. Calling it again is a no-op returning the same exit
  /// code.
  fn stop(&mut self) -> Result<Option<i32>, TransportError>;
  fn is_running(&self) -> bool;
}

enum TransportOutbound {
  Message(Message),
  Shutdown,
}

pub struct StdioTransport {
  child:         Child,
  outbound_tx:   Option<Sender<TransportOutbound>>,
  event_rx:      Receiver<TransportEvent>,
  reader_thread: Option<JoinHandle<()>>,
  writer_thread: Option<JoinHandle<()>>,
  stderr_thread: Option<JoinHandle<()>>,
  exit_code:     Option<Option<i32>>,
}

impl StdioTransport {
  pub fn spawn(
    command: impl AsRef<std::ffi::OsStr>,
    args: &[String],
    workspace_root: Option<&Path>,
  ) -> Result<Self, TransportError> {
    let command = command.as_ref();
    let mut process = Command::new(command);
    process
      .args(args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    if let Some(root) = workspace_root {
      process.current_dir(root);
    }

    let mut child = process.spawn().map_err(TransportError::Spawn)?;
    let stdin = child
      .stdin
      .take()
      .ok_or(TransportError::MissingPipe("stdin"))?;
    let stdout = child
      .stdout
      .take()
      .ok_or(TransportError::MissingPipe("stdout"))?;
    let stderr = child
      .stderr
      .take()
      .ok_or(TransportError::MissingPipe("stderr"))?;

    let (outbound_tx, outbound_rx) = channel();
    let (event_tx, event_rx) = channel();

    let writer_thread = spawn_writer_thread(stdin, outbound_rx, event_tx.clone());
    let reader_thread = spawn_reader_thread(stdout, event_tx.clone());
    let stderr_thread = spawn_stderr_thread(stderr, event_tx);
    let (writer_thread, reader_thread, stderr_thread) =
      match (writer_thread, reader_thread, stderr_thread) {
        (Ok(writer), Ok(reader), Ok(stderr)) => (writer, reader, stderr),
        (writer, reader, stderr) => {
          let _ = child.kill();
          let _ = child.wait();
          let err = [writer.err(), reader.err(), stderr.err()]
            .into_iter()
            .flatten()
            .next();
          return Err(TransportError::Thread(err.unwrap_or_else(|| {
            std::io::Error::other("failed to spawn transport thread")
          })));
        },
      };

    debug!(
      command = %command.to_string_lossy(),
      pid = child.id(),
      "language server started"
    );
    Ok(Self {
      child,
      outbound_tx: Some(outbound_tx),
      event_rx,
      reader_thread: Some(reader_thread),
      writer_thread: Some(writer_thread),
      stderr_thread: Some(stderr_thread),
      exit_code: None,
    })
  }

  pub fn recv_event_timeout(&self, timeout: Duration) -> Option<TransportEvent> {
    match self.event_rx.recv_timeout(timeout) {
      Ok(event) => Some(event),
      Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
    }
  }

  pub fn poll_exit_code(&mut self) -> Result<Option<i32>, TransportError> {
    if let Some(code) = self.exit_code {
      return Ok(code);
    }
    let status = self.child.try_wait().map_err(TransportError::Wait)?;
    Ok(status.and_then(|status| status.code()))
  }

  fn wait_for_exit(&mut self, grace: Duration) -> Result<Option<i32>, TransportError> {
    let deadline = Instant::now() + grace;
    loop {
      if let Some(status) = self.child.try_wait().map_err(TransportError::Wait)? {
        return Ok(status.code());
      }
      if Instant::now() >= deadline {
        break;
      }
      thread::sleep(READ_POLL_INTERVAL);
    }
    warn!(pid = self.child.id(), "language server did not exit, killing it");
    if let Err(err) = self.child.kill()
      && err.kind() != ErrorKind::InvalidInput
    {
      return Err(TransportError::Kill(err));
    }
    Ok(self.child.wait().map_err(TransportError::Wait)?.code())
  }
}

impl Transport for StdioTransport {
  fn send(&self, message: Message) -> Result<(), TransportError> {
    let tx = self
      .outbound_tx
      .as_ref()
      .ok_or(TransportError::OutboundChannelClosed)?;
    tx.send(TransportOutbound::Message(message))
      .map_err(|_| TransportError::OutboundChannelClosed)
  }

  fn try_recv_event(&self) -> Option<TransportEvent> {
    match self.event_rx.try_recv() {
      Ok(event) => Some(event),
      Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
    }
  }

  fn stop(&mut self) -> Result<Option<i32>, TransportError> {
    if let Some(code) = self.exit_code {
      return Ok(code);
    }

    // Closing the write side is the server's cue to exit.
    if let Some(tx) = self.outbound_tx.take() {
      let _ = tx.send(TransportOutbound::Shutdown);
    }
    join_thread(&mut self.writer_thread)?;

    let exit_code = self.wait_for_exit(STOP_GRACE)?;
    self.exit_code = Some(exit_code);

    join_thread(&mut self.reader_thread)?;
    join_thread(&mut self.stderr_thread)?;
    debug!(?exit_code, "language server stopped");
    Ok(exit_code)
  }

  fn is_running(&self) -> bool {
    self.exit_code.is_none()
  }
}

impl Drop for StdioTransport {
  fn drop(&mut self) {
    if let Err(err) = self.stop() {
      warn!(error = %err, "failed to stop language server");
    }
  }
}

fn spawn_reader_thread(
  mut stdout: ChildStdout,
  event_tx: Sender<TransportEvent>,
) -> std::io::Result<JoinHandle<()>> {
  thread::Builder::new()
    .name("scribe-lsp-stdout".into())
    .spawn(move || {
      let mut parser = MessageParser::new();
      let mut chunk = [0u8; READ_CHUNK];
      loop {
        match stdout.read(&mut chunk) {
          Ok(0) => {
            let _ = event_tx.send(TransportEvent::Closed);
            break;
          },
          Ok(read) => {
            parser.append(&chunk[..read]);
            for message in parser.drain_messages() {
              if event_tx.send(TransportEvent::Message(message)).is_err() {
                return;
              }
            }
          },
          Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
            thread::sleep(READ_POLL_INTERVAL);
          },
          Err(err) => {
            let _ = event_tx.send(TransportEvent::ReadError(err.to_string()));
            let _ = event_tx.send(TransportEvent::Closed);
            break;
          },
        }
      }
    })
}

fn spawn_writer_thread(
  stdin: ChildStdin,
  outbound_rx: Receiver<TransportOutbound>,
  event_tx: Sender<TransportEvent>,
) -> std::io::Result<JoinHandle<()>> {
  thread::Builder::new()
    .name("scribe-lsp-stdin".into())
    .spawn(move || {
      let mut writer = BufWriter::new(stdin);
      while let Ok(outbound) = outbound_rx.recv() {
        match outbound {
          TransportOutbound::Message(message) => {
            if let Err(err) = write_frame(&mut writer, &message) {
              let _ = event_tx.send(TransportEvent::WriteError(err.to_string()));
              break;
            }
          },
          TransportOutbound::Shutdown => break,
        }
      }
    })
}

fn spawn_stderr_thread(
  stderr: ChildStderr,
  event_tx: Sender<TransportEvent>,
) -> std::io::Result<JoinHandle<()>> {
  thread::Builder::new()
    .name("scribe-lsp-stderr".into())
    .spawn(move || {
      let mut reader = BufReader::new(stderr);
      let mut line = String::new();
      loop {
        line.clear();
        match reader.read_line(&mut line) {
          Ok(0) => break,
          Ok(_) => {
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            if !line.is_empty() {
              let _ = event_tx.send(TransportEvent::Stderr(line));
            }
          },
          Err(err) => {
            debug!(error = %err, "lsp stderr stream closed with error");
            break;
          },
        }
      }
    })
}

fn write_frame<W: Write>(writer: &mut W, message: &Message) -> Result<(), TransportError> {
  let frame = framing::encode_message(message).map_err(TransportError::SerializeJson)?;
  writer.write_all(&frame).map_err(TransportError::Write)?;
  writer.flush().map_err(TransportError::Write)?;
  Ok(())
}

fn join_thread(handle: &mut Option<JoinHandle<()>>) -> Result<(), TransportError> {
  if let Some(handle) = handle.take() {
    handle.join().map_err(|_| TransportError::ThreadPanicked)?;
  }
  Ok(())
}

#[derive(Debug, Error)]
pub enum TransportError {
  #[error("failed to spawn lsp process: {0}")]
  Spawn(std::io::Error),
  #[error("failed to spawn transport thread: {0}")]
  Thread(std::io::Error),
  #[error("missing child {0} pipe")]
  MissingPipe(&'static str),
  #[error("transport outbound channel is closed")]
  OutboundChannelClosed,
  #[error("failed to serialize json-rpc message: {0}")]
  SerializeJson(serde_json::Error),
  #[error("failed to write frame: {0}")]
  Write(std::io::Error),
  #[error("failed to kill lsp process: {0}")]
  Kill(std::io::Error),
  #[error("failed to wait for lsp process: {0}")]
  Wait(std::io::Error),
  #[error("transport thread panicked")]
  ThreadPanicked,
}

impl TransportError {
  pub fn code(&self) -> ErrorCode {
    match self {
      Self::Spawn(err) => ErrorCode::from_io_kind(err.kind()),
      Self::SerializeJson(_) => ErrorCode::ParseError,
      _ => ErrorCode::IoError,
    }
  }
}
