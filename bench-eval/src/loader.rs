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

//! Question set loader and pre-check (C4).

use bench_core::model::{Question, QuestionSet, QuestionSetMetadata};
use std::io::BufRead;
use thiserror::Error;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoaderWarnings {
    pub skipped_invalid_lines: usize,
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to read question set: {0}")]
    Io(String),
}

/// Load a JSONL question set. The first line is treated as metadata if it
/// carries a `metadata` object or `novel_summary` field and *no*
/// `position` field; a `position` field present on the first line means
/// it is a question (see DESIGN.md for the tie-break rationale).
/// Questions that fail schema/semantic validation against `source_len`
/// are skipped and counted rather than rejecting the whole file.
pub fn load_question_set<R: BufRead>(
    reader: R,
    source_len: usize,
) -> Result<(QuestionSet, LoaderWarnings), LoaderError> {
    let mut metadata = QuestionSetMetadata::default();
    let mut questions = Vec::new();
    let mut warnings = LoaderWarnings::default();
    let mut first_line = true;

    for line in reader.lines() {
        let line = line.map_err(|e| LoaderError::Io(e.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                warnings.skipped_invalid_lines += 1;
                first_line = false;
                continue;
            }
        };

        if first_line {
            first_line = false;
            let looks_like_metadata = (value.get("metadata").is_some() || value.get("novel_summary").is_some())
                && value.get("position").is_none();
            if looks_like_metadata {
                metadata.source_path = value
                    .get("metadata")
                    .and_then(|m| m.get("source_path"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                metadata.encoding = value
                    .get("metadata")
                    .and_then(|m| m.get("encoding"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                metadata.generation_config = value.get("metadata").and_then(|m| m.get("generation_config")).cloned();
                metadata.novel_summary = value.get("novel_summary").and_then(|v| v.as_str()).map(str::to_string);
                continue;
            }
        }

        match serde_json::from_value::<Question>(value) {
            Ok(q) if q.validate(source_len).is_ok() => questions.push(q),
            _ => warnings.skipped_invalid_lines += 1,
        }
    }

    Ok((QuestionSet { metadata, questions }, warnings))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreCheckReport {
    pub dropped_invalid: usize,
    pub remaining: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreCheckError {
    #[error("{0} question(s) are missing a validation field; pass --skip-validation to proceed anyway. Indices: {1:?}")]
    MissingValidation(usize, Vec<usize>),
    #[error("{0} question(s) are marked invalid; pass --ignore-invalid to drop them instead. Indices: {1:?}")]
    MarkedInvalid(usize, Vec<usize>),
    #[error("question set is empty after pre-check filtering")]
    EmptyAfterFiltering,
}

/// Apply the evaluation pre-check policy: gate on missing validation,
/// drop or fail on `is_valid = false`, and fail if nothing
/// survives. Schema/semantic validation already happened at load time
/// (invalid lines were skipped and counted there).
pub fn pre_check(
    question_set: &mut QuestionSet,
    skip_validation: bool,
    ignore_invalid: bool,
) -> Result<PreCheckReport, PreCheckError> {
    if !skip_validation {
        let missing: Vec<usize> = question_set
            .questions
            .iter()
            .enumerate()
            .filter(|(_, q)| q.validation.is_none())
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            return Err(PreCheckError::MissingValidation(missing.len(), missing));
        }
    }

    let mut dropped = 0;
    if question_set.questions.iter().any(|q| is_marked_invalid(q)) {
        if ignore_invalid {
            let before = question_set.questions.len();
            question_set.questions.retain(|q| !is_marked_invalid(q));
            dropped = before - question_set.questions.len();
        } else {
            let indices: Vec<usize> = question_set
                .questions
                .iter()
                .enumerate()
                .filter(|(_, q)| is_marked_invalid(q))
                .map(|(i, _)| i)
                .collect();
            return Err(PreCheckError::MarkedInvalid(indices.len(), indices));
        }
    }

    if question_set.questions.is_empty() {
        return Err(PreCheckError::EmptyAfterFiltering);
    }

    Ok(PreCheckReport {
        dropped_invalid: dropped,
        remaining: question_set.questions.len(),
    })
}

fn is_marked_invalid(q: &Question) -> bool {
    matches!(&q.validation, Some(v) if !v.is_valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_jsonl() -> String {
        let meta = r#"{"metadata": {"source_path": "novel.txt", "encoding": "cl100k_base"}, "novel_summary": "A tale."}"#;
        let q1 = r#"{"text": "Q1", "kind": "single_choice", "choices": {"a": "x", "b": "y"}, "answer": ["a"], "position": {"start_pos": 0, "end_pos": 10}, "validation": {"is_valid": true, "failure_reasons": []}}"#;
        let q2 = r#"{"text": "Q2", "kind": "single_choice", "choices": {"a": "x", "b": "y"}, "answer": ["b"], "position": {"start_pos": 20, "end_pos": 30}}"#;
        format!("{meta}\n{q1}\n{q2}\n")
    }

    #[test]
    fn loads_metadata_and_questions() {
        let (set, warnings) = load_question_set(Cursor::new(sample_jsonl()), 1000).unwrap();
        assert_eq!(set.questions.len(), 2);
        assert_eq!(set.metadata.source_path.as_deref(), Some("novel.txt"));
        assert_eq!(warnings.skipped_invalid_lines, 0);
    }

    #[test]
    fn tolerates_missing_metadata_line() {
        let jsonl = sample_jsonl().lines().skip(1).collect::<Vec<_>>().join("\n");
        let (set, _) = load_question_set(Cursor::new(jsonl), 1000).unwrap();
        assert_eq!(set.questions.len(), 2);
        assert!(set.metadata.source_path.is_none());
    }

    #[test]
    fn skips_invalid_lines_with_warning() {
        let jsonl = format!("{}\nnot json at all\n", sample_jsonl());
        let (set, warnings) = load_question_set(Cursor::new(jsonl), 1000).unwrap();
        assert_eq!(set.questions.len(), 2);
        assert_eq!(warnings.skipped_invalid_lines, 1);
    }

    #[test]
    fn precheck_fails_on_missing_validation() {
        let (mut set, _) = load_question_set(Cursor::new(sample_jsonl()), 1000).unwrap();
        let err = pre_check(&mut set, false, false).unwrap_err();
        assert!(matches!(err, PreCheckError::MissingValidation(1, _)));
    }

    #[test]
    fn precheck_passes_with_skip_validation() {
        let (mut set, _) = load_question_set(Cursor::new(sample_jsonl()), 1000).unwrap();
        let report = pre_check(&mut set, true, false).unwrap();
        assert_eq!(report.remaining, 2);
    }

    #[test]
    fn precheck_drops_invalid_with_ignore_invalid() {
        let q_invalid = r#"{"text": "Q3", "kind": "single_choice", "choices": {"a": "x", "b": "y"}, "answer": ["a"], "position": {"start_pos": 40, "end_pos": 50}, "validation": {"is_valid": false, "failure_reasons": ["no evidence"]}}"#;
        let jsonl = format!(
            "{}\n{}\n",
            sample_jsonl()
                .lines()
                .map(|l| if l.contains("\"Q2\"") {
                    l.replace(
                        r#""position": {"start_pos": 20, "end_pos": 30}"#,
                        r#""position": {"start_pos": 20, "end_pos": 30}, "validation": {"is_valid": true, "failure_reasons": []}"#,
                    )
                } else {
                    l.to_string()
                })
                .collect::<Vec<_>>()
                .join("\n"),
            q_invalid
        );
        let (mut set, _) = load_question_set(Cursor::new(jsonl), 1000).unwrap();
        let report = pre_check(&mut set, false, true).unwrap();
        assert_eq!(report.dropped_invalid, 1);
        assert_eq!(report.remaining, 2);
    }

    #[test]
    fn precheck_fails_when_empty_after_filtering() {
        let q_invalid = r#"{"text": "Q", "kind": "single_choice", "choices": {"a": "x", "b": "y"}, "answer": ["a"], "position": {"start_pos": 0, "end_pos": 10}, "validation": {"is_valid": false, "failure_reasons": []}}"#;
        let (mut set, _) = load_question_set(Cursor::new(format!("{q_invalid}\n")), 1000).unwrap();
        let err = pre_check(&mut set, false, true).unwrap_err();
        assert_eq!(err, PreCheckError::EmptyAfterFiltering);
    }
}
