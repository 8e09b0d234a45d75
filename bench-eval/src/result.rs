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

//! Wire types for persisted run output: per-question results plus the
//! run-level metadata record that lets a later `--recovery` pass and the
//! final report agree on what was actually tested.

use crate::scorer::ScoreMetrics;
use bench_core::model::{DepthBin, DepthMode, ParsingStatus, QuestionKind, TestMode};
use serde::{Deserialize, Serialize};

/// One scored question outcome, as written to the JSONL results file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    pub question_text: String,
    pub question_kind: QuestionKind,
    pub correct_answer: Vec<String>,
    pub model_answer: Vec<String>,
    pub parsing_status: ParsingStatus,
    pub score: f64,
    pub metrics: Option<ScoreMetrics>,
    pub depth: Option<f64>,
    pub depth_bin: Option<DepthBin>,
    pub test_context_length: usize,
    pub test_mode: TestMode,
}

/// Run-level metadata, written as the first line of the results file and
/// read back by the recovery merger and the final report to confirm a
/// resumed run targets the same configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub tested_at: String,
    pub model_name: String,
    pub novel_path: String,
    pub question_set_path: String,
    pub context_lengths: Vec<usize>,
    pub depth_mode: DepthMode,
    pub depth_bins: Option<Vec<DepthBin>>,
    pub padding_size: usize,
    pub test_mode: TestMode,
}

/// Counts of non-fatal problems accumulated over a run, surfaced in the
/// final report rather than aborting the run outright.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunWarnings {
    pub skipped_invalid_lines: usize,
    pub dropped_invalid_questions: usize,
    pub context_build_failures: usize,
    pub invoker_errors: usize,
}

impl RunWarnings {
    pub fn is_empty(&self) -> bool {
        self.skipped_invalid_lines == 0
            && self.dropped_invalid_questions == 0
            && self.context_build_failures == 0
            && self.invoker_errors == 0
    }
}
