//! JSON-line wire protocol between the parent supervisor and the isolated
//! embedder process (spec §6). Tagged unions, heavy use of
//! `skip_serializing_if`, matching the teacher's `ipc::protocol` style.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ParentMessage {
  #[serde(rename = "init")]
  Init {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
  },
  #[serde(rename = "embed")]
  Embed {
    id: u64,
    texts: Vec<String>,
    #[serde(rename = "isQuery", default)]
    is_query: bool,
  },
  #[serde(rename = "check-model")]
  CheckModel,
  #[serde(rename = "shutdown")]
  Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChildMessage {
  #[serde(rename = "ipc-ready")]
  IpcReady,
  #[serde(rename = "ready")]
  Ready,
  #[serde(rename = "init:err")]
  InitErr { error: String },
  #[serde(rename = "embed:ok")]
  EmbedOk { id: u64, vectors: Option<Vec<Vec<f32>>> },
  #[serde(rename = "embed:err")]
  EmbedErr { id: u64, error: String },
  #[serde(rename = "model:status")]
  ModelStatus {
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
}

/// Serializes `msg` as a single JSON line (newline included).
pub fn encode_line<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
  let mut line = serde_json::to_string(msg)?;
  line.push('\n');
  Ok(line)
}

/// Parses one line of the wire protocol. A blank line decodes to `None`.
pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<Option<T>, serde_json::Error> {
  let trimmed = line.trim();
  if trimmed.is_empty() {
    return Ok(None);
  }
  serde_json::from_str(trimmed).map(Some)
}
