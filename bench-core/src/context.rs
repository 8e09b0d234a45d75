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

//! Depth-aware context construction (C5).
//!
//! Assembles a context of exact token length `L` with the question's
//! evidence span sitting at fractional depth `d`. Filler is drawn
//! deterministically from the source document so identical inputs always
//! produce identical contexts.

use crate::model::{Position, Question};
use crate::tokenizer::{Direction, Tokenizer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextBuildError {
    #[error("evidence span ({evidence_len} tokens) exceeds requested context length ({context_length} tokens)")]
    EvidenceTooLarge {
        evidence_len: usize,
        context_length: usize,
    },
    #[error("source document too short to supply disjoint filler of {needed} tokens ({available} available)")]
    InsufficientSource { needed: usize, available: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltContext {
    pub text: String,
    pub actual_depth: f64,
    pub evidence_token_start: usize,
    pub evidence_token_end: usize,
    pub prefix_len: usize,
    pub suffix_len: usize,
    pub ok: bool,
    pub error: Option<ContextBuildError>,
}

impl BuiltContext {
    fn failure(error: ContextBuildError) -> Self {
        Self {
            text: String::new(),
            actual_depth: 0.0,
            evidence_token_start: 0,
            evidence_token_end: 0,
            prefix_len: 0,
            suffix_len: 0,
            ok: false,
            error: Some(error),
        }
    }
}

pub struct ContextBuilder {
    tokenizer: Tokenizer,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            tokenizer: Tokenizer::new(),
        }
    }

    /// Build a context of `context_length` tokens with `question`'s
    /// evidence positioned at fractional depth `target_depth`, drawing
    /// filler from `source_tokens`.
    pub fn build(
        &self,
        source_tokens: &[u32],
        question: &Question,
        target_depth: f64,
        context_length: usize,
        padding: usize,
    ) -> BuiltContext {
        let n = source_tokens.len();
        let (e_start, e_end) = self.expand_and_snap(source_tokens, question.position, padding);
        let e_len = e_end - e_start;

        if e_len > context_length {
            return BuiltContext::failure(ContextBuildError::EvidenceTooLarge {
                evidence_len: e_len,
                context_length,
            });
        }

        let filler_budget = context_length - e_len;
        let prefix_len_target = (target_depth * filler_budget as f64).round() as usize;
        let prefix_len_target = prefix_len_target.min(filler_budget);
        let suffix_len_target = filler_budget - prefix_len_target;

        let segments: Vec<(usize, usize)> = [(0usize, e_start), (e_end, n)]
            .into_iter()
            .filter(|(s, e)| e > s)
            .collect();
        let mut cursor = FillerCursor::new(segments);

        let total_needed = prefix_len_target + suffix_len_target;
        if cursor.remaining_total() < total_needed {
            return BuiltContext::failure(ContextBuildError::InsufficientSource {
                needed: total_needed,
                available: cursor.remaining_total(),
            });
        }

        let prefix_ranges = cursor.take(prefix_len_target, &self.tokenizer, source_tokens, true);
        let suffix_ranges = cursor.take(suffix_len_target, &self.tokenizer, source_tokens, false);

        let prefix_tokens = flatten(&prefix_ranges, source_tokens);
        let suffix_tokens = flatten(&suffix_ranges, source_tokens);

        let mut assembled = Vec::with_capacity(prefix_tokens.len() + e_len + suffix_tokens.len());
        assembled.extend_from_slice(&prefix_tokens);
        assembled.extend_from_slice(&source_tokens[e_start..e_end]);
        assembled.extend_from_slice(&suffix_tokens);

        let prefix_len = prefix_tokens.len();
        let suffix_len = suffix_tokens.len();
        let denom = (context_length - e_len) as f64;
        let actual_depth = if denom > 0.0 {
            prefix_len as f64 / denom
        } else {
            0.0
        };

        BuiltContext {
            text: self.tokenizer.decode(&assembled),
            actual_depth,
            evidence_token_start: prefix_len,
            evidence_token_end: prefix_len + e_len,
            prefix_len,
            suffix_len,
            ok: true,
            error: None,
        }
    }

    /// Expand `[start_pos, end_pos)` by `padding` tokens on each side, then
    /// snap outward to the nearest sentence/paragraph boundary.
    fn expand_and_snap(
        &self,
        source_tokens: &[u32],
        position: Position,
        padding: usize,
    ) -> (usize, usize) {
        let n = source_tokens.len();
        let expanded_start = position.start_pos.saturating_sub(padding);
        let expanded_end = (position.end_pos + padding).min(n);

        let snapped_start = self
            .tokenizer
            .find_boundary(source_tokens, expanded_start, Direction::Backward);
        let snapped_end = self
            .tokenizer
            .find_boundary(source_tokens, expanded_end, Direction::Forward);

        (snapped_start.min(snapped_end), snapped_end.max(snapped_start))
    }
}

/// Walks an ordered list of non-evidence token ranges, handing out
/// contiguous runs in document order. When a requested run must span two
/// ranges (the document region "runs out"), the seam is snapped backward
/// to the nearest sentence boundary so filler never joins mid-sentence.
struct FillerCursor<'a> {
    segments: Vec<(usize, usize)>,
    seg_idx: usize,
    pos: usize,
    _marker: std::marker::PhantomData<&'a ()>,
}

impl<'a> FillerCursor<'a> {
    fn new(segments: Vec<(usize, usize)>) -> Self {
        let pos = segments.first().map(|s| s.0).unwrap_or(0);
        Self {
            segments,
            seg_idx: 0,
            pos,
            _marker: std::marker::PhantomData,
        }
    }

    fn remaining_total(&self) -> usize {
        self.segments
            .iter()
            .enumerate()
            .filter(|(i, _)| *i >= self.seg_idx)
            .map(|(i, (s, e))| if i == self.seg_idx { e - self.pos.max(*s) } else { e - s })
            .sum()
    }

    /// Take `n` tokens worth of ranges, advancing the cursor. If `snap_seams`
    /// is true and the allocation spans more than one segment, every
    /// non-final sub-range is trimmed backward to the nearest sentence
    /// boundary (the resulting run may then be shorter than `n`, which is
    /// within the builder's documented ±1% length tolerance).
    fn take(
        &mut self,
        n: usize,
        tokenizer: &Tokenizer,
        source_tokens: &[u32],
        snap_seams: bool,
    ) -> Vec<(usize, usize)> {
        let mut taken = Vec::new();
        let mut need = n;

        while need > 0 && self.seg_idx < self.segments.len() {
            let (_, seg_end) = self.segments[self.seg_idx];
            if self.pos >= seg_end {
                self.seg_idx += 1;
                if self.seg_idx < self.segments.len() {
                    self.pos = self.segments[self.seg_idx].0;
                }
                continue;
            }
            let avail = seg_end - self.pos;
            let take_n = avail.min(need);
            taken.push((self.pos, self.pos + take_n));
            self.pos += take_n;
            need -= take_n;
        }

        if snap_seams && taken.len() > 1 {
            for range in taken.iter_mut().take(taken.len() - 1) {
                let snapped = tokenizer.find_boundary(source_tokens, range.1, Direction::Backward);
                if snapped >= range.0 {
                    range.1 = snapped;
                }
            }
        }

        taken
    }
}

fn flatten(ranges: &[(usize, usize)], source_tokens: &[u32]) -> Vec<u32> {
    let mut out = Vec::new();
    for &(s, e) in ranges {
        out.extend_from_slice(&source_tokens[s..e]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DepthBin, Position, Question, QuestionKind};
    use std::collections::BTreeMap;

    fn repeated_sentences(n: usize) -> String {
        (0..n)
            .map(|i| format!("This is sentence number {i}."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn make_question(start: usize, end: usize) -> Question {
        let mut choices = BTreeMap::new();
        choices.insert("a".to_string(), "wrong".to_string());
        choices.insert("b".to_string(), "right".to_string());
        Question {
            text: "What happened?".into(),
            kind: QuestionKind::SingleChoice,
            choices,
            answer: vec!["b".into()],
            position: Position {
                start_pos: start,
                end_pos: end,
            },
            validation: None,
        }
    }

    #[test]
    fn depth_ends_land_at_head_and_tail() {
        let tok = Tokenizer::new();
        let text = repeated_sentences(2000);
        let tokens = tok.encode(&text);
        assert!(tokens.len() > 10_000);

        let question = make_question(4000, 4100);
        let builder = ContextBuilder::new();

        let head = builder.build(&tokens[..10_000], &question, 0.0, 2000, 20);
        assert!(head.ok);
        assert!(head.evidence_token_start <= 50);

        let tail = builder.build(&tokens[..10_000], &question, 1.0, 2000, 20);
        assert!(tail.ok);
        assert!((tail.evidence_token_end as i64 - 2000).abs() <= 50);
    }

    #[test]
    fn depth_accuracy_within_tolerance() {
        let tok = Tokenizer::new();
        let text = repeated_sentences(3000);
        let tokens = tok.encode(&text);
        let question = make_question(8000, 8050);
        let builder = ContextBuilder::new();

        for &d in &[0.0, 0.25, 0.5, 0.75, 1.0] {
            let built = builder.build(&tokens, &question, d, 4000, 10);
            assert!(built.ok);
            assert!(
                (built.actual_depth - d).abs() <= 0.05,
                "depth {d} actual {}",
                built.actual_depth
            );
        }
    }

    #[test]
    fn context_length_within_one_percent() {
        let tok = Tokenizer::new();
        let text = repeated_sentences(3000);
        let tokens = tok.encode(&text);
        let question = make_question(100, 150);
        let builder = ContextBuilder::new();

        let built = builder.build(&tokens, &question, 0.5, 5000, 10);
        assert!(built.ok);
        let retokenized = tok.count(&built.text);
        assert!(retokenized >= (5000 * 99 / 100) && retokenized <= (5000 * 101 / 100));
    }

    #[test]
    fn evidence_too_large_fails_cleanly() {
        let tok = Tokenizer::new();
        let text = repeated_sentences(3000);
        let tokens = tok.encode(&text);
        let question = make_question(100, 9000);
        let builder = ContextBuilder::new();

        let built = builder.build(&tokens, &question, 0.5, 1000, 0);
        assert!(!built.ok);
        assert!(matches!(
            built.error,
            Some(ContextBuildError::EvidenceTooLarge { .. })
        ));
    }

    #[test]
    fn insufficient_source_fails_cleanly() {
        let tok = Tokenizer::new();
        let text = repeated_sentences(20);
        let tokens = tok.encode(&text);
        let question = make_question(50, 60);
        let builder = ContextBuilder::new();

        let built = builder.build(&tokens, &question, 0.5, 5000, 0);
        assert!(!built.ok);
        assert!(matches!(
            built.error,
            Some(ContextBuildError::InsufficientSource { .. })
        ));
    }

    #[test]
    fn evidence_is_contiguous_subsequence_at_prefix_len() {
        let tok = Tokenizer::new();
        let text = repeated_sentences(3000);
        let tokens = tok.encode(&text);
        let question = make_question(5000, 5060);
        let builder = ContextBuilder::new();

        let built = builder.build(&tokens, &question, 0.5, 3000, 5);
        assert!(built.ok);

        // Re-tokenizing the built context and slicing exactly at
        // [evidence_token_start, evidence_token_end) (i.e. prefix_len..)
        // must recover the question's literal evidence text, not just
        // "the context is non-empty".
        let literal_evidence = tok.decode(&tokens[question.position.start_pos..question.position.end_pos]);
        let retokenized = tok.encode(&built.text);
        assert!(built.evidence_token_end <= retokenized.len());
        let evidence_region = &retokenized[built.evidence_token_start..built.evidence_token_end];
        let evidence_region_text = tok.decode(evidence_region);
        assert!(
            evidence_region_text.contains(&literal_evidence),
            "evidence window {:?} did not contain literal evidence {:?}",
            evidence_region_text,
            literal_evidence
        );
    }

    #[test]
    fn depth_bin_labels_and_centroids() {
        assert_eq!(DepthBin::P0.label(), "0%");
        assert_eq!(DepthBin::P100.centroid(), 1.0);
        assert_eq!(DepthBin::nearest(0.26), DepthBin::P25);
    }
}
