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

mod config;
mod report;

use anyhow::{bail, Result};
use bench_core::aggregator::{calculate_depth_cells, calculate_position_bins, DepthResult, ScoredSpan};
use bench_core::model::{DepthMode, TestMode};
use bench_core::scheduler::DepthScheduler;
use bench_core::tokenizer::Tokenizer;
use bench_eval::invoker::{AnthropicInvoker, ModelInvoker, OpenAiInvoker, RetryPolicy};
use bench_eval::loader::{load_question_set, pre_check, PreCheckError};
use bench_eval::pipeline::{run_pipeline, PipelineConfig};
use bench_eval::recovery::merge_recovered;
use bench_eval::result::{EvalResult, RunWarnings};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit codes per the documented error-handling policy.
const EXIT_SUCCESS: u8 = 0;
const EXIT_ARG_CONFLICT: u8 = 2;
const EXIT_VALIDATION_FAILURE: u8 = 3;
const EXIT_INSUFFICIENT_SOURCE: u8 = 4;

#[derive(Parser, Debug)]
#[command(author, version, about = "Long-context recall benchmark harness", long_about = None)]
struct Args {
    /// Path to the source document (the "novel").
    #[arg(long)]
    novel: PathBuf,

    /// Path to the JSONL question set.
    #[arg(long = "data_set")]
    data_set: PathBuf,

    /// Path to write JSONL results.
    #[arg(long)]
    output: PathBuf,

    /// Optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker pool size.
    #[arg(long, env = "LONGBENCH_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Single context length, legacy mode.
    #[arg(long = "context_length")]
    context_length: Option<usize>,

    /// Comma-separated list of context lengths.
    #[arg(long = "context-lengths", value_delimiter = ',')]
    context_lengths: Vec<usize>,

    /// Scheduling mode.
    #[arg(long = "depth-mode", value_enum, default_value = "uniform")]
    depth_mode: DepthModeArg,

    /// Fixed depth in [0, 1], required when `--depth-mode fixed`.
    #[arg(long)]
    depth: Option<f64>,

    /// Tokens of padding applied to each side of the evidence span.
    /// Falls back to the configured `padding_size` when omitted.
    #[arg(long = "padding_size")]
    padding_size: Option<usize>,

    /// Cap on the number of questions sampled from the question set.
    #[arg(long = "max-questions")]
    max_questions: Option<usize>,

    /// Prior result file to resume from.
    #[arg(long)]
    recovery: Option<PathBuf>,

    /// Proceed even if questions are missing a `validation` field.
    #[arg(long = "skip-validation")]
    skip_validation: bool,

    /// Drop questions marked `validation.is_valid = false` instead of failing.
    #[arg(long = "ignore-invalid")]
    ignore_invalid: bool,

    /// Use the question set's `novel_summary` instead of building positioned contexts.
    #[arg(long = "no-reference")]
    no_reference: bool,

    /// Model identifier to invoke.
    #[arg(long, env = "LONGBENCH_MODEL", default_value = "gpt-4o-mini")]
    model_name: String,

    /// Which provider API shape to use.
    #[arg(long, value_enum, default_value = "openai")]
    provider: ProviderArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum DepthModeArg {
    Legacy,
    Uniform,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ProviderArg {
    Openai,
    Anthropic,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "longbench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(code) => Ok(ExitCode::from(code)),
        Err(e) => {
            tracing::error!("run failed: {e:#}");
            Ok(ExitCode::from(1))
        }
    }
}

async fn run(args: Args) -> Result<u8> {
    if args.no_reference && (!args.context_lengths.is_empty() || args.context_length.is_some()) {
        tracing::error!("--no-reference cannot be combined with --context_length / --context-lengths");
        return Ok(EXIT_ARG_CONFLICT);
    }
    if matches!(args.depth_mode, DepthModeArg::Fixed) && args.depth.is_none() {
        tracing::error!("--depth-mode fixed requires --depth");
        return Ok(EXIT_ARG_CONFLICT);
    }

    let config = config::RunConfig::load(args.config.clone())?;
    config.validate()?;

    let concurrency = args.concurrency.unwrap_or(config.concurrency);
    let padding_size = args.padding_size.unwrap_or(config.padding_size);

    let novel_text = std::fs::read_to_string(&args.novel)?;
    let tokenizer = Tokenizer::new();
    let source_tokens = Arc::new(tokenizer.encode(&novel_text));

    let file = std::fs::File::open(&args.data_set)?;
    let (mut question_set, loader_warnings) =
        load_question_set(std::io::BufReader::new(file), source_tokens.len())?;

    let precheck_report = match pre_check(&mut question_set, args.skip_validation, args.ignore_invalid) {
        Ok(report) => report,
        Err(PreCheckError::MissingValidation(n, indices)) => {
            tracing::error!("{n} question(s) missing validation field: {indices:?}");
            return Ok(EXIT_VALIDATION_FAILURE);
        }
        Err(PreCheckError::MarkedInvalid(n, indices)) => {
            tracing::error!("{n} question(s) marked invalid: {indices:?}");
            return Ok(EXIT_VALIDATION_FAILURE);
        }
        Err(PreCheckError::EmptyAfterFiltering) => {
            tracing::error!("question set is empty after pre-check filtering");
            return Ok(EXIT_VALIDATION_FAILURE);
        }
    };
    tracing::info!(
        remaining = precheck_report.remaining,
        dropped = precheck_report.dropped_invalid,
        skipped_lines = loader_warnings.skipped_invalid_lines,
        "pre-check complete"
    );

    let test_mode = if args.no_reference {
        TestMode::NoReference
    } else {
        TestMode::WithReference
    };

    let context_lengths: Vec<usize> = if let Some(length) = args.context_length {
        vec![length]
    } else {
        args.context_lengths.clone()
    };
    if !args.no_reference && context_lengths.is_empty() {
        bail!("at least one of --context_length or --context-lengths is required");
    }

    let novel_summary = question_set.metadata.novel_summary.clone();
    if args.no_reference && novel_summary.is_none() {
        bail!("--no-reference requires the question set to carry a novel_summary");
    }

    // No-reference mode takes one pass per question with the novel summary
    // substituted for a built context; there is no depth/context-length
    // matrix to schedule against.
    let (depth_mode, assignments) = if args.no_reference {
        let assignments = (0..question_set.questions.len())
            .map(|i| bench_core::scheduler::Assignment {
                question_index: i,
                context_length: 0,
                target_depth: 0.0,
                depth_bin: bench_core::model::DepthBin::P0,
            })
            .take(args.max_questions.unwrap_or(usize::MAX))
            .collect::<Vec<_>>();
        (DepthMode::Legacy, assignments)
    } else {
        let (depth_mode, scheduler) = match args.depth_mode {
            DepthModeArg::Legacy => (DepthMode::Legacy, DepthScheduler::legacy(context_lengths.clone())),
            DepthModeArg::Uniform => (DepthMode::Uniform, DepthScheduler::uniform(context_lengths.clone())),
            DepthModeArg::Fixed => (
                DepthMode::Fixed,
                DepthScheduler::fixed(context_lengths.clone(), args.depth.unwrap_or(0.0)),
            ),
        };
        let scheduler = scheduler.with_max_questions(args.max_questions);
        (depth_mode, scheduler.schedule(question_set.questions.len())?)
    };

    let prior_results: Vec<EvalResult> = match &args.recovery {
        Some(path) if path.exists() => read_results_file(path)?,
        _ => Vec::new(),
    };
    let (kept_results, covered_keys) = merge_recovered(prior_results, test_mode);
    tracing::info!(recovered = kept_results.len(), "recovery merge complete");

    let invoker: Arc<dyn ModelInvoker> = match args.provider {
        ProviderArg::Openai => {
            let api_key = config
                .provider
                .openai_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY not configured"))?;
            let mut client = OpenAiInvoker::new(
                api_key,
                args.model_name.clone(),
                config.temperature,
                config.max_tokens,
                std::time::Duration::from_secs(config.timeout_secs),
            );
            if let Some(base_url) = config.provider.openai_base_url.clone() {
                client = client.with_base_url(base_url);
            }
            Arc::new(client)
        }
        ProviderArg::Anthropic => {
            let api_key = config
                .provider
                .anthropic_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY not configured"))?;
            Arc::new(AnthropicInvoker::new(
                api_key,
                args.model_name.clone(),
                config.temperature,
                config.max_tokens,
                std::time::Duration::from_secs(config.timeout_secs),
            ))
        }
    };

    let pipeline_config = PipelineConfig {
        concurrency,
        padding_size,
        test_mode,
        novel_summary: novel_summary.clone(),
    };
    let progress = Arc::new(bench_eval::pipeline::Progress::default());
    let (mut fresh_results, mut warnings) = run_pipeline(
        assignments.clone(),
        Arc::new(question_set.questions.clone()),
        source_tokens.clone(),
        invoker,
        pipeline_config,
        RetryPolicy::exponential(),
        Arc::new(covered_keys),
        progress,
    )
    .await;

    warnings.skipped_invalid_lines = loader_warnings.skipped_invalid_lines;
    warnings.dropped_invalid_questions = precheck_report.dropped_invalid;

    if context_build_failures_cover_every_assignment(&context_lengths, &assignments, &fresh_results) {
        tracing::error!("source document too short for every assignment at one or more context lengths");
        return Ok(EXIT_INSUFFICIENT_SOURCE);
    }

    let mut all_results = kept_results;
    all_results.append(&mut fresh_results);

    let metadata = bench_eval::result::RunMetadata {
        tested_at: chrono::Utc::now().to_rfc3339(),
        model_name: args.model_name.clone(),
        novel_path: args.novel.display().to_string(),
        question_set_path: args.data_set.display().to_string(),
        context_lengths: context_lengths.clone(),
        depth_mode,
        depth_bins: None,
        padding_size,
        test_mode,
    };
    write_results_file(&args.output, &metadata, &all_results)?;

    emit_report(&args, &question_set, &all_results, &warnings, source_tokens.len())?;

    Ok(EXIT_SUCCESS)
}

fn context_build_failures_cover_every_assignment(
    context_lengths: &[usize],
    assignments: &[bench_core::scheduler::Assignment],
    results: &[EvalResult],
) -> bool {
    context_lengths.iter().any(|&length| {
        let expected = assignments.iter().filter(|a| a.context_length == length).count();
        if expected == 0 {
            return false;
        }
        let failed = results
            .iter()
            .filter(|r| {
                r.test_context_length == length
                    && r.parsing_status == bench_core::model::ParsingStatus::ContextBuildError
            })
            .count();
        failed == expected
    })
}

fn read_results_file(path: &std::path::Path) -> Result<Vec<EvalResult>> {
    let content = std::fs::read_to_string(path)?;
    let mut results = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if i == 0 {
            if serde_json::from_str::<bench_eval::result::RunMetadata>(line).is_ok() {
                continue;
            }
        }
        results.push(serde_json::from_str(line)?);
    }
    Ok(results)
}

fn write_results_file(
    path: &std::path::Path,
    metadata: &bench_eval::result::RunMetadata,
    results: &[EvalResult],
) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "{}", serde_json::to_string(metadata)?)?;
    for result in results {
        writeln!(file, "{}", serde_json::to_string(result)?)?;
    }
    Ok(())
}

fn emit_report(
    args: &Args,
    question_set: &bench_core::model::QuestionSet,
    results: &[EvalResult],
    warnings: &RunWarnings,
    source_len: usize,
) -> Result<()> {
    let spans: Vec<ScoredSpan> = question_set
        .questions
        .iter()
        .map(|q| ScoredSpan {
            position: q.position,
            score: results
                .iter()
                .find(|r| r.question_text == q.text)
                .map(|r| r.score),
        })
        .collect();
    let position_bins = calculate_position_bins(&spans, source_len, 10);

    let context_lengths: Vec<usize> = {
        let mut lengths: Vec<usize> = results.iter().map(|r| r.test_context_length).collect();
        lengths.sort_unstable();
        lengths.dedup();
        lengths
    };
    let depth_results: Vec<DepthResult> = results
        .iter()
        .filter_map(|r| {
            r.depth_bin.map(|bin| DepthResult {
                context_length: r.test_context_length,
                depth_bin: bin,
                score: r.score,
            })
        })
        .collect();
    let depth_cells = calculate_depth_cells(&context_lengths, &depth_results);

    let mean_score = if results.is_empty() {
        0.0
    } else {
        results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64
    };

    let report = report::RunReport {
        model_name: &args.model_name,
        questions_evaluated: results.len(),
        mean_score,
        position_bins: &position_bins,
        depth_cells: &depth_cells,
        warnings,
    };

    println!("{}", report::render_json(&report)?);
    println!();
    println!("{}", report::render_ascii_table(&context_lengths, &depth_cells));

    Ok(())
}
