//! `ProcessMessenger` abstraction (spec §9 decision): a `send`/`recv`/`exit`
//! seam so the supervisor never touches `tokio::process` directly in its
//! own logic, and tests never spawn a real child.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::EmbedderError;
use crate::protocol::{ChildMessage, ParentMessage, decode_line, encode_line};

#[async_trait]
pub trait ProcessMessenger: Send + Sync {
  async fn send(&self, msg: ParentMessage) -> Result<(), EmbedderError>;
  async fn recv(&self) -> Option<ChildMessage>;
  async fn exit(&self);
}

/// Real child-process messenger: a `tokio::process::Child`'s stdin/stdout
/// framed as JSON lines.
pub struct ChildMessenger {
  child: tokio::sync::Mutex<Child>,
  stdin: tokio::sync::Mutex<tokio::process::ChildStdin>,
  incoming: tokio::sync::Mutex<mpsc::Receiver<ChildMessage>>,
}

impl ChildMessenger {
  pub fn spawn(program: &str, args: &[String]) -> Result<Self, EmbedderError> {
    let mut child = Command::new(program)
      .args(args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .spawn()
      .map_err(|e| EmbedderError::Process(e.to_string()))?;

    let stdin = child.stdin.take().ok_or_else(|| EmbedderError::Process("no stdin".to_string()))?;
    let stdout = child.stdout.take().ok_or_else(|| EmbedderError::Process("no stdout".to_string()))?;

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
      let mut lines = BufReader::new(stdout).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => match decode_line::<ChildMessage>(&line) {
            Ok(Some(msg)) => {
              if tx.send(msg).await.is_err() {
                break;
              }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "malformed line from embedder child"),
          },
          Ok(None) => break,
          Err(e) => {
            warn!(error = %e, "error reading embedder child stdout");
            break;
          }
        }
      }
    });

    Ok(Self {
      child: tokio::sync::Mutex::new(child),
      stdin: tokio::sync::Mutex::new(stdin),
      incoming: tokio::sync::Mutex::new(rx),
    })
  }
}

#[async_trait]
impl ProcessMessenger for ChildMessenger {
  async fn send(&self, msg: ParentMessage) -> Result<(), EmbedderError> {
    let line = encode_line(&msg)?;
    let mut stdin = self.stdin.lock().await;
    stdin.write_all(line.as_bytes()).await.map_err(|e| EmbedderError::Process(e.to_string()))?;
    Ok(())
  }

  async fn recv(&self) -> Option<ChildMessage> {
    self.incoming.lock().await.recv().await
  }

  async fn exit(&self) {
    let _ = self.send(ParentMessage::Shutdown).await;
    let mut child = self.child.lock().await;
    let _ = child.kill().await;
  }
}

/// In-memory messenger pair for tests. `ChannelMessenger` is the
/// supervisor-facing half; `ChannelChildHandle` lets a test script act as
/// the child: observe sent `ParentMessage`s and inject `ChildMessage`s.
pub struct ChannelMessenger {
  to_child: mpsc::Sender<ParentMessage>,
  from_child: tokio::sync::Mutex<mpsc::Receiver<ChildMessage>>,
}

pub struct ChannelChildHandle {
  pub from_parent: mpsc::Receiver<ParentMessage>,
  pub to_parent: mpsc::Sender<ChildMessage>,
}

impl ChannelMessenger {
  pub fn pair() -> (Self, ChannelChildHandle) {
    let (to_child, from_parent) = mpsc::channel(64);
    let (to_parent, from_child) = mpsc::channel(64);
    (
      Self {
        to_child,
        from_child: tokio::sync::Mutex::new(from_child),
      },
      ChannelChildHandle { from_parent, to_parent },
    )
  }
}

#[async_trait]
impl ProcessMessenger for ChannelMessenger {
  async fn send(&self, msg: ParentMessage) -> Result<(), EmbedderError> {
    self.to_child.send(msg).await.map_err(|_| EmbedderError::Process("child disconnected".to_string()))
  }

  async fn recv(&self) -> Option<ChildMessage> {
    self.from_child.lock().await.recv().await
  }

  async fn exit(&self) {
    let _ = self.send(ParentMessage::Shutdown).await;
  }
}
