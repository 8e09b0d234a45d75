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

//! Execution pipeline (C8): bounded-concurrency worker pool that drives
//! every scheduled assignment through context build, model invocation,
//! parsing, and scoring.

use crate::invoker::{invoke_with_retry, ModelInvoker, RetryPolicy};
use crate::parser::{filter_known_keys, parse_answer};
use crate::recovery::is_already_covered;
use crate::result::{EvalResult, RunWarnings};
use crate::scorer::score;
use bench_core::context::ContextBuilder;
use bench_core::model::{Question, TestMode};
use bench_core::scheduler::Assignment;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub concurrency: usize,
    pub padding_size: usize,
    pub test_mode: TestMode,
    /// The question set's `novel_summary`, used verbatim as `{context}` in
    /// no-reference mode instead of a built, depth-positioned context.
    pub novel_summary: Option<String>,
}

/// Snapshot of progress counters, read by the CLI for a status line.
#[derive(Debug, Default)]
pub struct Progress {
    pub completed: AtomicU64,
    pub total: AtomicU64,
}

fn build_prompt(context_text: &str, question: &Question) -> (String, String) {
    let system = "You are taking a reading comprehension test over a long document. \
Answer using only the document's content. Respond with JSON of the form \
{\"answer\": [\"<choice letter>\", ...]} and nothing else."
        .to_string();

    let mut choices = String::new();
    for (key, text) in &question.choices {
        choices.push_str(&format!("({key}) {text}\n"));
    }

    let user = format!(
        "Document:\n{context_text}\n\nQuestion: {}\n\nChoices:\n{choices}\nAnswer:",
        question.text
    );
    (system, user)
}

/// Run every assignment not already covered by a recovered prior result.
/// `questions` is indexed by `Assignment::question_index`.
pub async fn run_pipeline(
    assignments: Vec<Assignment>,
    questions: Arc<Vec<Question>>,
    source_tokens: Arc<Vec<u32>>,
    invoker: Arc<dyn ModelInvoker>,
    config: PipelineConfig,
    retry_policy: RetryPolicy,
    covered_keys: Arc<HashSet<u64>>,
    progress: Arc<Progress>,
) -> (Vec<EvalResult>, RunWarnings) {
    progress.total.store(assignments.len() as u64, Ordering::SeqCst);

    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let results = Arc::new(Mutex::new(Vec::with_capacity(assignments.len())));
    let warnings = Arc::new(Mutex::new(RunWarnings::default()));
    let builder = Arc::new(ContextBuilder::new());

    let mut handles = Vec::with_capacity(assignments.len());

    for assignment in assignments {
        let question = questions[assignment.question_index].clone();

        if is_already_covered(
            &covered_keys,
            &question.text,
            assignment.context_length,
            Some(assignment.depth_bin),
            config.test_mode,
        ) {
            progress.completed.fetch_add(1, Ordering::SeqCst);
            continue;
        }

        let semaphore = semaphore.clone();
        let invoker = invoker.clone();
        let builder = builder.clone();
        let source_tokens = source_tokens.clone();
        let results = results.clone();
        let warnings = warnings.clone();
        let progress = progress.clone();
        let retry_policy = retry_policy.clone();
        let config = config.clone();

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");

            // No-reference mode never calls the context builder: `{context}`
            // is the question set's novel summary, taken verbatim, and
            // there is no depth to report.
            let built = if config.test_mode == TestMode::NoReference {
                bench_core::context::BuiltContext {
                    text: config.novel_summary.clone().unwrap_or_default(),
                    actual_depth: 0.0,
                    evidence_token_start: 0,
                    evidence_token_end: 0,
                    prefix_len: 0,
                    suffix_len: 0,
                    ok: true,
                    error: None,
                }
            } else {
                builder.build(
                    &source_tokens,
                    &question,
                    assignment.target_depth,
                    assignment.context_length,
                    config.padding_size,
                )
            };

            let is_no_reference = config.test_mode == TestMode::NoReference;

            let result = if !built.ok {
                warnings.lock().context_build_failures += 1;
                EvalResult {
                    question_text: question.text.clone(),
                    question_kind: question.kind,
                    correct_answer: question.answer.clone(),
                    model_answer: Vec::new(),
                    parsing_status: bench_core::model::ParsingStatus::ContextBuildError,
                    score: 0.0,
                    metrics: None,
                    depth: (!is_no_reference).then_some(assignment.target_depth),
                    depth_bin: (!is_no_reference).then_some(assignment.depth_bin),
                    test_context_length: assignment.context_length,
                    test_mode: config.test_mode,
                }
            } else {
                let (system_prompt, user_prompt) = build_prompt(&built.text, &question);
                match invoke_with_retry(invoker.as_ref(), &system_prompt, &user_prompt, &retry_policy).await {
                    Ok(reply) => {
                        let (keys, status) = parse_answer(&reply);
                        let keys = filter_known_keys(keys, &question.choices);
                        let scored = score(question.kind, &keys, &question.answer, status);
                        EvalResult {
                            question_text: question.text.clone(),
                            question_kind: question.kind,
                            correct_answer: question.answer.clone(),
                            model_answer: keys,
                            parsing_status: status,
                            score: scored.score,
                            metrics: scored.metrics,
                            depth: (!is_no_reference).then_some(built.actual_depth),
                            depth_bin: (!is_no_reference).then_some(assignment.depth_bin),
                            test_context_length: assignment.context_length,
                            test_mode: config.test_mode,
                        }
                    }
                    Err(e) => {
                        warnings.lock().invoker_errors += 1;
                        let status = e.terminal_status();
                        let scored = score(question.kind, &[], &question.answer, status);
                        EvalResult {
                            question_text: question.text.clone(),
                            question_kind: question.kind,
                            correct_answer: question.answer.clone(),
                            model_answer: Vec::new(),
                            parsing_status: status,
                            score: scored.score,
                            metrics: scored.metrics,
                            depth: (!is_no_reference).then_some(assignment.target_depth),
                            depth_bin: (!is_no_reference).then_some(assignment.depth_bin),
                            test_context_length: assignment.context_length,
                            test_mode: config.test_mode,
                        }
                    }
                }
            };

            results.lock().push(result);
            progress.completed.fetch_add(1, Ordering::SeqCst);
        });

        handles.push(handle);
    }

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!("pipeline task panicked: {e}");
        }
    }

    let results = Arc::try_unwrap(results).map(Mutex::into_inner).unwrap_or_default();
    let warnings = Arc::try_unwrap(warnings).map(Mutex::into_inner).unwrap_or_default();
    (results, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bench_core::model::{Position, QuestionKind};
    use bench_core::scheduler::DepthScheduler;
    use std::collections::BTreeMap;

    struct EchoInvoker;

    #[async_trait]
    impl ModelInvoker for EchoInvoker {
        async fn invoke(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, crate::invoker::InvokerError> {
            Ok(r#"{"answer": ["b"]}"#.to_string())
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    fn sample_questions() -> Vec<Question> {
        let mut choices = BTreeMap::new();
        choices.insert("a".to_string(), "wrong".to_string());
        choices.insert("b".to_string(), "right".to_string());
        vec![Question {
            text: "What happened?".into(),
            kind: QuestionKind::SingleChoice,
            choices,
            answer: vec!["b".into()],
            position: Position {
                start_pos: 100,
                end_pos: 150,
            },
            validation: None,
        }]
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(1),
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn pipeline_scores_correct_answer() {
        let tokenizer = bench_core::tokenizer::Tokenizer::new();
        let text = (0..2000)
            .map(|i| format!("This is sentence number {i}."))
            .collect::<Vec<_>>()
            .join(" ");
        let tokens = tokenizer.encode(&text);

        let questions = Arc::new(sample_questions());
        let scheduler = DepthScheduler::uniform(vec![2000]);
        let assignments = scheduler.schedule(1).unwrap();

        let (results, warnings) = run_pipeline(
            assignments,
            questions,
            Arc::new(tokens),
            Arc::new(EchoInvoker),
            PipelineConfig {
                concurrency: 4,
                padding_size: 10,
                test_mode: TestMode::WithReference,
                novel_summary: None,
            },
            fast_policy(),
            Arc::new(HashSet::new()),
            Arc::new(Progress::default()),
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 1.0);
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn no_reference_mode_skips_context_builder_and_uses_summary() {
        let questions = Arc::new(sample_questions());
        let assignments = vec![bench_core::scheduler::Assignment {
            question_index: 0,
            context_length: 0,
            target_depth: 0.0,
            depth_bin: bench_core::model::DepthBin::P0,
        }];

        let (results, _) = run_pipeline(
            assignments,
            questions,
            Arc::new(Vec::new()),
            Arc::new(EchoInvoker),
            PipelineConfig {
                concurrency: 1,
                padding_size: 10,
                test_mode: TestMode::NoReference,
                novel_summary: Some("A brief tale about a fox.".to_string()),
            },
            fast_policy(),
            Arc::new(HashSet::new()),
            Arc::new(Progress::default()),
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 1.0);
        assert!(results[0].depth.is_none());
        assert!(results[0].depth_bin.is_none());
    }

    #[tokio::test]
    async fn pipeline_skips_already_covered_assignments() {
        let tokenizer = bench_core::tokenizer::Tokenizer::new();
        let text = (0..2000)
            .map(|i| format!("This is sentence number {i}."))
            .collect::<Vec<_>>()
            .join(" ");
        let tokens = tokenizer.encode(&text);

        let questions = Arc::new(sample_questions());
        let scheduler = DepthScheduler::uniform(vec![2000]);
        let assignments = scheduler.schedule(1).unwrap();
        let depth_bin = assignments[0].depth_bin;

        let prior = vec![EvalResult {
            question_text: "What happened?".to_string(),
            question_kind: QuestionKind::SingleChoice,
            correct_answer: vec!["b".into()],
            model_answer: vec!["b".into()],
            parsing_status: bench_core::model::ParsingStatus::Success,
            score: 1.0,
            metrics: None,
            depth: Some(depth_bin.centroid()),
            depth_bin: Some(depth_bin),
            test_context_length: 2000,
            test_mode: TestMode::WithReference,
        }];
        let (_, covered) = crate::recovery::merge_recovered(prior, TestMode::WithReference);

        let progress = Arc::new(Progress::default());
        let (results, _) = run_pipeline(
            assignments,
            questions,
            Arc::new(tokens),
            Arc::new(EchoInvoker),
            PipelineConfig {
                concurrency: 4,
                padding_size: 10,
                test_mode: TestMode::WithReference,
                novel_summary: None,
            },
            fast_policy(),
            Arc::new(covered),
            progress.clone(),
        )
        .await;

        assert!(results.is_empty());
        assert_eq!(progress.completed.load(Ordering::SeqCst), 1);
    }
}
