// Copyright 2025 Longbench Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Tokenizer and boundary detection (C1).
//!
//! Pinned to `cl100k_base` so question generation and evaluation always
//! agree on token positions.

use tiktoken_rs::{cl100k_base, CoreBPE};

/// Identifier recorded in question set metadata so readers can detect a
/// mismatched encoding.
pub const TOKENIZER_ID: &str = "cl100k_base";

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？'];
const BOUNDARY_SCAN_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

pub struct Tokenizer {
    bpe: CoreBPE,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            bpe: cl100k_base().expect("cl100k_base vocabulary is bundled with tiktoken-rs"),
        }
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe
            .encode_ordinary(text)
            .into_iter()
            .map(|t| t as u32)
            .collect()
    }

    /// Decode a token slice back to text. Falls back to a per-token, lossy
    /// reconstruction if the slice doesn't start on a UTF-8 boundary — this
    /// only matters for the heuristic boundary scan below; context
    /// assembly always decodes whole, validly-cut evidence/filler windows.
    pub fn decode(&self, tokens: &[u32]) -> String {
        let ids: Vec<usize> = tokens.iter().map(|&t| t as usize).collect();
        match self.bpe.decode(ids) {
            Ok(s) => s,
            Err(_) => tokens
                .iter()
                .map(|&t| {
                    self.bpe
                        .decode(vec![t as usize])
                        .unwrap_or_else(|_| "\u{FFFD}".to_string())
                })
                .collect(),
        }
    }

    pub fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }

    /// Scan outward from `target_index` for the nearest sentence or
    /// paragraph boundary, within 100 tokens. Returns `target_index`
    /// unchanged (the hard cutoff) if none is found.
    pub fn find_boundary(&self, tokens: &[u32], target_index: usize, direction: Direction) -> usize {
        let n = tokens.len();
        let target_index = target_index.min(n);

        let candidates: Vec<usize> = match direction {
            Direction::Forward => {
                let hi = n.min(target_index + BOUNDARY_SCAN_LIMIT);
                (target_index..hi).collect()
            }
            Direction::Backward => {
                let lo = target_index.saturating_sub(BOUNDARY_SCAN_LIMIT);
                (lo..=target_index).rev().collect()
            }
        };

        for idx in candidates {
            if idx == 0 || idx >= n {
                continue;
            }
            let lo = idx.saturating_sub(1);
            let hi = (idx + 1).min(n);
            let snippet = self.decode(&tokens[lo..hi]);
            if Self::is_boundary(&snippet) {
                return idx;
            }
        }
        target_index
    }

    fn is_boundary(snippet: &str) -> bool {
        if snippet.contains("\n\n") {
            return true;
        }
        let trimmed = snippet.trim_end_matches(char::is_whitespace);
        match trimmed.chars().last() {
            Some(c) if SENTENCE_TERMINATORS.contains(&c) => trimmed.len() < snippet.len(),
            _ => false,
        }
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_ascii() {
        let tok = Tokenizer::new();
        let text = "The quick brown fox jumps over the lazy dog. It did this twice.";
        let tokens = tok.encode(text);
        assert_eq!(tok.decode(&tokens), text);
    }

    #[test]
    fn round_trip_unicode() {
        let tok = Tokenizer::new();
        let text = "龙在天空中飞翔。这是一个测试句子！你觉得怎么样？";
        let tokens = tok.encode(text);
        assert_eq!(tok.decode(&tokens), text);
    }

    #[test]
    fn count_matches_encode_len() {
        let tok = Tokenizer::new();
        let text = "A short paragraph with a handful of tokens in it.";
        assert_eq!(tok.count(text), tok.encode(text).len());
    }

    #[test]
    fn find_boundary_hits_period() {
        let tok = Tokenizer::new();
        let text = "First sentence here. Second sentence follows. Third one trails off";
        let tokens = tok.encode(text);
        // pick a target deep inside "Second sentence" and scan forward
        let target = tokens.len() / 2;
        let boundary = tok.find_boundary(&tokens, target, Direction::Forward);
        assert!(boundary >= target);
        assert!(boundary <= tokens.len());
    }

    #[test]
    fn find_boundary_falls_back_to_hard_cutoff() {
        let tok = Tokenizer::new();
        // No terminators anywhere in range -> hard cutoff at target_index.
        let text = "aaaa ".repeat(500);
        let tokens = tok.encode(&text);
        let target = tokens.len() / 2;
        let boundary = tok.find_boundary(&tokens[..target + 1], target, Direction::Forward);
        assert_eq!(boundary, target);
    }
}
