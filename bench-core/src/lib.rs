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

//! Core data model and pure algorithms for the long-context recall
//! benchmark: tokenization, depth-aware context construction, assignment
//! scheduling, and heatmap aggregation.
//!
//! Everything in this crate is synchronous and side-effect free given its
//! inputs; the only I/O-adjacent piece (loading the source document off
//! disk) lives in `bench-eval` alongside the rest of the pipeline.

pub mod aggregator;
pub mod context;
pub mod model;
pub mod scheduler;
pub mod tokenizer;

pub use aggregator::{calculate_depth_cells, calculate_position_bins, DepthCell, PositionBin};
pub use context::{BuiltContext, ContextBuildError, ContextBuilder};
pub use model::{
    Answer, ChoiceKey, DepthBin, DepthMode, ParsingStatus, Position, Question, QuestionKind,
    QuestionSet, QuestionSetMetadata, TestMode, Validation,
};
pub use scheduler::{Assignment, DepthScheduler, SchedulerError};
pub use tokenizer::{Direction, Tokenizer, TOKENIZER_ID};
