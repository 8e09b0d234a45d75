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

//! Scorer (C3): exact match for single-choice, F1 for multi-choice.

use bench_core::model::{ParsingStatus, QuestionKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ScoreMetrics {
    const ZERO: ScoreMetrics = ScoreMetrics {
        precision: 0.0,
        recall: 0.0,
        f1: 0.0,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scored {
    pub score: f64,
    pub metrics: Option<ScoreMetrics>,
}

/// Score a parsed model answer against the correct answer. Terminal
/// parsing failures always score zero regardless of `kind`.
pub fn score(
    kind: QuestionKind,
    model_answer: &[String],
    correct_answer: &[String],
    parsing_status: ParsingStatus,
) -> Scored {
    if parsing_status.is_terminal_failure() {
        return Scored {
            score: 0.0,
            metrics: if kind == QuestionKind::SingleChoice {
                None
            } else {
                Some(ScoreMetrics::ZERO)
            },
        };
    }

    match kind {
        QuestionKind::SingleChoice => {
            let model: BTreeSet<&String> = model_answer.iter().collect();
            let correct: BTreeSet<&String> = correct_answer.iter().collect();
            Scored {
                score: if model == correct { 1.0 } else { 0.0 },
                metrics: None,
            }
        }
        QuestionKind::MultipleChoice | QuestionKind::NegativeQuestion => {
            let metrics = multi_choice_metrics(model_answer, correct_answer);
            Scored {
                score: metrics.f1,
                metrics: Some(metrics),
            }
        }
    }
}

fn multi_choice_metrics(model_answer: &[String], correct_answer: &[String]) -> ScoreMetrics {
    let model: BTreeSet<&String> = model_answer.iter().collect();
    let correct: BTreeSet<&String> = correct_answer.iter().collect();
    let overlap = model.intersection(&correct).count() as f64;

    let precision = overlap / (model.len().max(1) as f64);
    let recall = overlap / (correct.len().max(1) as f64);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    ScoreMetrics {
        precision,
        recall,
        f1,
    }
}
