//! Sentence segmentation and oversized-sentence hard-splitting.

use indexcore::estimate_tokens;
use unicode_segmentation::UnicodeSegmentation;

/// A unit of text the chunk assembler can place whole into a chunk: either
/// a full sentence, or a whitespace-delimited piece of a sentence that was
/// too large to keep intact.
#[derive(Debug, Clone)]
pub struct Unit {
  pub text: String,
  pub offset: usize,
  pub tokens: u32,
}

/// Splits `text` into trimmed sentences with their char offset into `text`,
/// using Unicode sentence boundaries (UAX #29), which already honour the
/// terminators called out in the spec (`. ? ! 。 ？ ！ ．` followed by
/// whitespace or end-of-text).
fn split_sentences(text: &str) -> Vec<(usize, String)> {
  let byte_to_char = byte_to_char_map(text);
  let mut sentences = Vec::new();

  for (byte_start, segment) in text.split_sentence_bound_indices() {
    let leading_ws = segment.len() - segment.trim_start().len();
    let trimmed = segment.trim();
    if trimmed.is_empty() {
      continue;
    }
    let effective_byte = byte_start + leading_ws;
    let char_offset = byte_to_char[effective_byte];
    sentences.push((char_offset, trimmed.to_string()));
  }

  sentences
}

fn byte_to_char_map(text: &str) -> Vec<usize> {
  let mut map = vec![0usize; text.len() + 1];
  let mut char_idx = 0;
  for (byte_idx, _) in text.char_indices() {
    map[byte_idx] = char_idx;
    char_idx += 1;
  }
  map[text.len()] = char_idx;
  map
}

/// Whitespace-delimited words within `s`, each tagged with its char offset
/// relative to the start of `s`.
fn words_with_offsets(s: &str) -> Vec<(usize, &str)> {
  let mut words = Vec::new();
  let mut word_start: Option<(usize, usize)> = None; // (char_idx, byte_idx)

  for (char_idx, (byte_idx, ch)) in s.char_indices().enumerate() {
    if ch.is_whitespace() {
      if let Some((start_char, start_byte)) = word_start.take() {
        words.push((start_char, &s[start_byte..byte_idx]));
      }
    } else if word_start.is_none() {
      word_start = Some((char_idx, byte_idx));
    }
  }
  if let Some((start_char, start_byte)) = word_start {
    words.push((start_char, &s[start_byte..]));
  }

  words
}

/// Splits an oversized sentence (> `1.5 * target_tokens`) into whitespace
/// pieces of roughly `target_tokens` each. Words are never split.
fn hard_split(offset: usize, sentence: &str, target_tokens: u32) -> Vec<Unit> {
  let words = words_with_offsets(sentence);
  if words.is_empty() {
    return Vec::new();
  }

  let mut units = Vec::new();
  let mut piece_words: Vec<&str> = Vec::new();
  let mut piece_start_char: usize = words[0].0;
  let mut piece_tokens: u32 = 0;

  for (word_char_idx, word) in words {
    let candidate_text = if piece_words.is_empty() {
      word.to_string()
    } else {
      format!("{} {}", piece_words.join(" "), word)
    };
    let candidate_tokens = estimate_tokens(&candidate_text);

    if !piece_words.is_empty() && candidate_tokens > target_tokens {
      units.push(Unit {
        text: piece_words.join(" "),
        offset: offset + piece_start_char,
        tokens: piece_tokens,
      });
      piece_words = vec![word];
      piece_start_char = word_char_idx;
      piece_tokens = estimate_tokens(word);
    } else {
      if piece_words.is_empty() {
        piece_start_char = word_char_idx;
      }
      piece_words.push(word);
      piece_tokens = candidate_tokens;
    }
  }

  if !piece_words.is_empty() {
    units.push(Unit {
      text: piece_words.join(" "),
      offset: offset + piece_start_char,
      tokens: piece_tokens,
    });
  }

  units
}

/// Produces the ordered sequence of units the chunk assembler will pack
/// into chunks, expanding any sentence exceeding `1.5 * target_tokens`.
pub fn sentence_units(text: &str, target_tokens: u32) -> Vec<Unit> {
  let oversized_threshold = target_tokens.saturating_mul(3) / 2;
  let mut units = Vec::new();

  for (offset, sentence) in split_sentences(text) {
    let tokens = estimate_tokens(&sentence);
    if tokens > oversized_threshold {
      units.extend(hard_split(offset, &sentence, target_tokens));
    } else {
      units.push(Unit {
        text: sentence,
        offset,
        tokens,
      });
    }
  }

  units
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn splits_simple_sentences() {
    let sentences = split_sentences("First one. Second one! Third?");
    assert_eq!(sentences.len(), 3);
    assert_eq!(sentences[0].0, 0);
    assert!(sentences[1].0 > sentences[0].0);
    assert!(sentences[2].0 > sentences[1].0);
  }

  #[test]
  fn hard_splits_oversized_sentence() {
    let long_sentence = "word ".repeat(2000);
    let units = hard_split(0, long_sentence.trim(), 50);
    assert!(units.len() > 1);
    for unit in &units {
      assert!(unit.tokens <= 50);
    }
  }
}
