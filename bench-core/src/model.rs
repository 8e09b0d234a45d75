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

//! Wire types for question sets and results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A single-letter choice key, e.g. `"a"`, `"b"`.
pub type ChoiceKey = String;

/// Non-empty list of choice keys.
pub type Answer = Vec<ChoiceKey>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice,
    MultipleChoice,
    NegativeQuestion,
}

/// Half-open token range in the source document that grounds a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub start_pos: usize,
    pub end_pos: usize,
}

impl Position {
    pub fn len(&self) -> usize {
        self.end_pos.saturating_sub(self.start_pos)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub is_valid: bool,
    #[serde(default)]
    pub failure_reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub kind: QuestionKind,
    pub choices: BTreeMap<ChoiceKey, String>,
    pub answer: Answer,
    pub position: Position,
    #[serde(default)]
    pub validation: Option<Validation>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuestionError {
    #[error("position range is empty or inverted: {0:?}")]
    EmptyPosition(Position),
    #[error("position end_pos {end_pos} exceeds source length {source_len}")]
    PositionOutOfBounds { end_pos: usize, source_len: usize },
    #[error("fewer than two choices")]
    TooFewChoices,
    #[error("empty answer list")]
    EmptyAnswer,
    #[error("answer key {0:?} not present in choices")]
    UnknownAnswerKey(ChoiceKey),
    #[error("multiple_choice question needs at least two distractors (|choices| - |answer| >= 2)")]
    TooFewDistractors,
}

impl Question {
    /// Validate the question's field invariants. `source_len` is the token
    /// count of the source document the question was generated against.
    pub fn validate(&self, source_len: usize) -> Result<(), QuestionError> {
        if self.position.start_pos >= self.position.end_pos {
            return Err(QuestionError::EmptyPosition(self.position));
        }
        if self.position.end_pos > source_len {
            return Err(QuestionError::PositionOutOfBounds {
                end_pos: self.position.end_pos,
                source_len,
            });
        }
        if self.choices.len() < 2 {
            return Err(QuestionError::TooFewChoices);
        }
        if self.answer.is_empty() {
            return Err(QuestionError::EmptyAnswer);
        }
        for key in &self.answer {
            if !self.choices.contains_key(key) {
                return Err(QuestionError::UnknownAnswerKey(key.clone()));
            }
        }
        if self.kind == QuestionKind::MultipleChoice
            && self.choices.len().saturating_sub(self.answer.len()) < 2
        {
            return Err(QuestionError::TooFewDistractors);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionSetMetadata {
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub generation_config: Option<serde_json::Value>,
    #[serde(default)]
    pub novel_summary: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct QuestionSet {
    pub metadata: QuestionSetMetadata,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthMode {
    Legacy,
    Fixed,
    Uniform,
}

/// Centroid of a depth interval, one of five fixed bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DepthBin {
    P0,
    P25,
    P50,
    P75,
    P100,
}

impl DepthBin {
    pub const ALL: [DepthBin; 5] = [
        DepthBin::P0,
        DepthBin::P25,
        DepthBin::P50,
        DepthBin::P75,
        DepthBin::P100,
    ];

    /// Fractional centroid in `[0, 1]`.
    pub fn centroid(&self) -> f64 {
        match self {
            DepthBin::P0 => 0.0,
            DepthBin::P25 => 0.25,
            DepthBin::P50 => 0.5,
            DepthBin::P75 => 0.75,
            DepthBin::P100 => 1.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DepthBin::P0 => "0%",
            DepthBin::P25 => "25%",
            DepthBin::P50 => "50%",
            DepthBin::P75 => "75%",
            DepthBin::P100 => "100%",
        }
    }

    /// Nearest bin to an arbitrary target depth.
    pub fn nearest(d: f64) -> DepthBin {
        Self::ALL
            .into_iter()
            .min_by(|a, b| {
                (a.centroid() - d)
                    .abs()
                    .partial_cmp(&(b.centroid() - d).abs())
                    .unwrap()
            })
            .unwrap()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsingStatus {
    Success,
    RegexExtracted,
    ParsingError,
    Timeout,
    Error,
    Refused,
    ContextBuildError,
}

impl ParsingStatus {
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            ParsingStatus::ParsingError
                | ParsingStatus::Timeout
                | ParsingStatus::Error
                | ParsingStatus::Refused
                | ParsingStatus::ContextBuildError
        )
    }

    /// Whether a prior result with this status counts as complete under
    /// recovery: only successes are kept, everything else reruns.
    pub fn is_recoverable_success(&self) -> bool {
        matches!(self, ParsingStatus::Success | ParsingStatus::RegexExtracted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    WithReference,
    NoReference,
}
