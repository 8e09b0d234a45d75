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

//! Answer parser (C2): extract a structured answer from a raw model
//! reply, with layered fallbacks.

use bench_core::model::ParsingStatus;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static SINGLE_LETTER_ASSERTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\(([a-z])\)|"([a-z])"|^([a-z])\b|answer(?:\s+is)?:?\s*([a-z])\b"#).unwrap());

/// Parse a raw model reply into a normalized, sorted, deduplicated list of
/// choice keys plus the status that produced it.
pub fn parse_answer(reply: &str) -> (Vec<String>, ParsingStatus) {
    if let Some(keys) = parse_direct_json(reply) {
        return (normalize(keys), ParsingStatus::Success);
    }
    if let Some(keys) = parse_embedded_json(reply) {
        return (normalize(keys), ParsingStatus::Success);
    }
    if let Some(key) = parse_single_letter_heuristic(reply) {
        return (normalize(vec![key]), ParsingStatus::RegexExtracted);
    }
    (Vec::new(), ParsingStatus::ParsingError)
}

fn parse_direct_json(reply: &str) -> Option<Vec<String>> {
    let value: serde_json::Value = serde_json::from_str(reply.trim()).ok()?;
    extract_answer_field(&value)
}

/// Scan for the first balanced `{...}` substring (regex alone can't match
/// recursive nesting, so we track brace depth manually) and JSON-parse it.
fn parse_embedded_json(reply: &str) -> Option<Vec<String>> {
    let bytes = reply.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{')?;

    let mut depth = 0i32;
    let mut end = None;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    let end = end?;
    let candidate = std::str::from_utf8(&bytes[start..=end]).ok()?;
    let value: serde_json::Value = serde_json::from_str(candidate).ok()?;
    extract_answer_field(&value)
}

fn extract_answer_field(value: &serde_json::Value) -> Option<Vec<String>> {
    let answer = value.get("answer")?;
    match answer {
        serde_json::Value::Array(items) => {
            let keys: Vec<String> = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            if keys.is_empty() {
                None
            } else {
                Some(keys)
            }
        }
        serde_json::Value::String(s) => {
            let keys: Vec<String> = s
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if keys.is_empty() {
                None
            } else {
                Some(keys)
            }
        }
        _ => None,
    }
}

/// Find a single, unambiguously asserted choice letter, e.g. "The answer
/// is (a)." Returns `None` unless exactly one distinct letter is found.
fn parse_single_letter_heuristic(reply: &str) -> Option<String> {
    let mut found: BTreeSet<String> = BTreeSet::new();
    for caps in SINGLE_LETTER_ASSERTION.captures_iter(reply) {
        for group in [1, 2, 3, 4] {
            if let Some(m) = caps.get(group) {
                found.insert(m.as_str().to_lowercase());
            }
        }
    }
    if found.len() == 1 {
        found.into_iter().next()
    } else {
        None
    }
}

/// Lowercase, trim, dedup, and sort choice keys. Validity against a
/// question's `choices` map is the caller's responsibility: unknown keys
/// are dropped at scoring time, not treated as a parse error.
fn normalize(keys: Vec<String>) -> Vec<String> {
    let mut set: BTreeSet<String> = BTreeSet::new();
    for key in keys {
        let trimmed = key.trim().to_lowercase();
        if !trimmed.is_empty() {
            set.insert(trimmed);
        }
    }
    set.into_iter().collect()
}

/// Drop any answer key not present in `choices`; not an error.
pub fn filter_known_keys(keys: Vec<String>, choices: &std::collections::BTreeMap<String, String>) -> Vec<String> {
    keys.into_iter().filter(|k| choices.contains_key(k)).collect()
}
