//! Sentence-aware, overlap-preserving text chunker (deterministic, pure).

mod sentence;

use indexcore::TextChunk;
use sentence::Unit;

pub const DEFAULT_TARGET_TOKENS: u32 = 500;
pub const DEFAULT_OVERLAP_TOKENS: u32 = 60;

/// Splits `text` into overlapping chunks. Empty input yields an empty
/// sequence. Sentences are never split across chunks unless a single
/// sentence exceeds `1.5 * target_tokens`.
pub fn chunk_text(text: &str, target_tokens: u32, overlap_tokens: u32) -> Vec<TextChunk> {
  if text.is_empty() {
    return Vec::new();
  }

  let units = sentence::sentence_units(text, target_tokens);
  assemble(&units, target_tokens, overlap_tokens)
}

fn assemble(units: &[Unit], target_tokens: u32, overlap_tokens: u32) -> Vec<TextChunk> {
  let mut chunks = Vec::new();
  let mut overlap_prefix: Option<String> = None;
  let mut i = 0;

  let ceiling = target_tokens + target_tokens / 2;

  while i < units.len() {
    let mut end = i;
    let mut acc_tokens = 0u32;
    while end < units.len() {
      let next_tokens = units[end].tokens;
      if end > i && acc_tokens + next_tokens > ceiling {
        break;
      }
      acc_tokens += next_tokens;
      end += 1;
      if acc_tokens >= target_tokens {
        break;
      }
    }

    let unique_text = units[i..end]
      .iter()
      .map(|u| u.text.as_str())
      .collect::<Vec<_>>()
      .join(" ");
    let offset = units[i].offset;

    let text = match overlap_prefix.take() {
      Some(prefix) if !prefix.is_empty() => format!("{prefix} {unique_text}"),
      _ => unique_text,
    };

    chunks.push(TextChunk {
      text,
      offset: offset as u32,
    });

    if overlap_tokens > 0 && end < units.len() {
      overlap_prefix = Some(trailing_overlap(&units[i..end], overlap_tokens));
    }

    i = end;
  }

  chunks
}

/// Selects complete trailing units from `chunk_units` whose cumulative
/// token count first reaches `overlap_tokens`.
fn trailing_overlap(chunk_units: &[Unit], overlap_tokens: u32) -> String {
  let mut acc = 0u32;
  let mut start = chunk_units.len();

  for (idx, unit) in chunk_units.iter().enumerate().rev() {
    acc += unit.tokens;
    start = idx;
    if acc >= overlap_tokens {
      break;
    }
  }

  chunk_units[start..]
    .iter()
    .map(|u| u.text.as_str())
    .collect::<Vec<_>>()
    .join(" ")
}
