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

//! Recovery merger (C7): resume a run from a partial result file without
//! re-invoking the model for work that already succeeded.

use crate::result::EvalResult;
use bench_core::model::{DepthBin, TestMode};
use std::collections::HashSet;

/// Identifies one scheduled assignment for recovery matching. Depth-aware
/// runs key on `(question, context_length, depth_bin)`; legacy runs drop
/// the depth bin; no-reference runs drop the context length entirely
/// since there is only one pass over the source document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RecoveryKey {
    DepthAware(u64, usize, DepthBin),
    Legacy(u64, usize),
    NoReference(u64),
}

fn key_for(question_hash: u64, context_length: usize, depth_bin: Option<DepthBin>, test_mode: TestMode) -> RecoveryKey {
    match (test_mode, depth_bin) {
        (TestMode::NoReference, _) => RecoveryKey::NoReference(question_hash),
        (TestMode::WithReference, Some(bin)) => RecoveryKey::DepthAware(question_hash, context_length, bin),
        (TestMode::WithReference, None) => RecoveryKey::Legacy(question_hash, context_length),
    }
}

/// Hash a question's text to a stable key component. Using the text
/// rather than a vector index keeps recovery valid across question-set
/// reorderings between runs.
pub fn question_hash(text: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Split prior results into those that can be kept as-is (recoverable
/// successes) and the set of recovery keys that are already covered, so
/// the caller can filter its freshly scheduled assignment list down to
/// only what still needs to run.
pub fn merge_recovered(prior_results: Vec<EvalResult>, test_mode: TestMode) -> (Vec<EvalResult>, HashSet<u64>) {
    let mut kept = Vec::new();
    let mut covered_keys = HashSet::new();

    for result in prior_results {
        if result.parsing_status.is_recoverable_success() {
            let key = key_for(
                question_hash(&result.question_text),
                result.test_context_length,
                result.depth_bin,
                test_mode,
            );
            covered_keys.insert(recovery_key_hash(&key));
            kept.push(result);
        }
    }

    (kept, covered_keys)
}

/// Whether an about-to-be-scheduled assignment is already covered by a
/// kept prior result.
pub fn is_already_covered(
    covered_keys: &HashSet<u64>,
    question_text: &str,
    context_length: usize,
    depth_bin: Option<DepthBin>,
    test_mode: TestMode,
) -> bool {
    let key = key_for(question_hash(question_text), context_length, depth_bin, test_mode);
    covered_keys.contains(&recovery_key_hash(&key))
}

fn recovery_key_hash(key: &RecoveryKey) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}
