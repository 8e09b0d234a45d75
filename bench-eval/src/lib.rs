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

//! Evaluation engine: question set loading, model invocation, parsing,
//! scoring, recovery, and the concurrent execution pipeline that ties
//! them together.

pub mod invoker;
pub mod loader;
pub mod parser;
pub mod pipeline;
pub mod recovery;
pub mod result;
pub mod scorer;

pub use invoker::{AnthropicInvoker, InvokerError, ModelInvoker, OpenAiInvoker, RetryPolicy};
pub use loader::{load_question_set, pre_check, LoaderError, LoaderWarnings, PreCheckError, PreCheckReport};
pub use parser::parse_answer;
pub use pipeline::{run_pipeline, PipelineConfig, Progress};
pub use recovery::{is_already_covered, merge_recovered, question_hash};
pub use result::{EvalResult, RunMetadata, RunWarnings};
pub use scorer::{score, ScoreMetrics, Scored};
