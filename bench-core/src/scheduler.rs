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

//! Depth / context-length scheduling (C6).

use crate::model::{DepthBin, DepthMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub question_index: usize,
    pub context_length: usize,
    pub target_depth: f64,
    pub depth_bin: DepthBin,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("fixed depth mode requires a depth in [0, 1], got {0}")]
    DepthOutOfRange(String),
    #[error("no context lengths supplied")]
    NoContextLengths,
    #[error("no questions to schedule")]
    NoQuestions,
}

pub struct DepthScheduler {
    mode: DepthMode,
    context_lengths: Vec<usize>,
    fixed_depth: f64,
    max_questions: Option<usize>,
}

impl DepthScheduler {
    pub fn legacy(context_lengths: Vec<usize>) -> Self {
        Self {
            mode: DepthMode::Legacy,
            context_lengths,
            fixed_depth: 0.0,
            max_questions: None,
        }
    }

    pub fn fixed(context_lengths: Vec<usize>, depth: f64) -> Self {
        Self {
            mode: DepthMode::Fixed,
            context_lengths,
            fixed_depth: depth,
            max_questions: None,
        }
    }

    pub fn uniform(context_lengths: Vec<usize>) -> Self {
        Self {
            mode: DepthMode::Uniform,
            context_lengths,
            fixed_depth: 0.0,
            max_questions: None,
        }
    }

    pub fn with_max_questions(mut self, max_questions: Option<usize>) -> Self {
        self.max_questions = max_questions;
        self
    }

    /// Produce the full, deterministically ordered assignment list for
    /// `question_count` questions.
    pub fn schedule(&self, question_count: usize) -> Result<Vec<Assignment>, SchedulerError> {
        if self.context_lengths.is_empty() {
            return Err(SchedulerError::NoContextLengths);
        }
        if question_count == 0 {
            return Err(SchedulerError::NoQuestions);
        }
        if self.mode == DepthMode::Fixed && !(0.0..=1.0).contains(&self.fixed_depth) {
            return Err(SchedulerError::DepthOutOfRange(self.fixed_depth.to_string()));
        }

        let indices = self.sample_indices(question_count);

        let mut assignments = match self.mode {
            DepthMode::Legacy => self.schedule_legacy(&indices),
            DepthMode::Fixed => self.schedule_fixed(&indices),
            DepthMode::Uniform => self.schedule_uniform(&indices),
        };

        assignments.sort_by(|a, b| {
            a.context_length
                .cmp(&b.context_length)
                .then(a.depth_bin.cmp(&b.depth_bin))
                .then(a.question_index.cmp(&b.question_index))
        });
        Ok(assignments)
    }

    /// Sample `question_count` questions, capped by `max_questions` and
    /// spread evenly across depth bins (uniform/fixed modes use all depth
    /// bins equally regardless of whether depth is simulated per cell, so
    /// the cap is applied by simple round-robin striping for determinism).
    fn sample_indices(&self, question_count: usize) -> Vec<usize> {
        match self.max_questions {
            Some(max) if max < question_count => {
                let bins = DepthBin::ALL.len();
                let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); bins];
                for i in 0..question_count {
                    buckets[i % bins].push(i);
                }
                let per_bucket = max / bins;
                let remainder = max % bins;
                let mut picked = Vec::with_capacity(max);
                for (b, bucket) in buckets.into_iter().enumerate() {
                    let take = per_bucket + usize::from(b < remainder);
                    picked.extend(bucket.into_iter().take(take));
                }
                picked.sort_unstable();
                picked
            }
            _ => (0..question_count).collect(),
        }
    }

    fn schedule_legacy(&self, indices: &[usize]) -> Vec<Assignment> {
        let mut out = Vec::new();
        for &q in indices {
            for &length in &self.context_lengths {
                out.push(Assignment {
                    question_index: q,
                    context_length: length,
                    target_depth: 0.0,
                    depth_bin: DepthBin::P0,
                });
            }
        }
        out
    }

    fn schedule_fixed(&self, indices: &[usize]) -> Vec<Assignment> {
        let bin = DepthBin::nearest(self.fixed_depth);
        let mut out = Vec::new();
        for &q in indices {
            for &length in &self.context_lengths {
                out.push(Assignment {
                    question_index: q,
                    context_length: length,
                    target_depth: self.fixed_depth,
                    depth_bin: bin,
                });
            }
        }
        out
    }

    /// Partition the sampled questions evenly across the full
    /// `context_lengths × 5 depth bins` cell grid, one assignment per
    /// question, with cell sizes differing by at most 1.
    fn schedule_uniform(&self, indices: &[usize]) -> Vec<Assignment> {
        let cells: Vec<(usize, DepthBin)> = self
            .context_lengths
            .iter()
            .flat_map(|&length| DepthBin::ALL.iter().map(move |&bin| (length, bin)))
            .collect();
        if cells.is_empty() {
            return Vec::new();
        }

        indices
            .iter()
            .enumerate()
            .map(|(i, &q)| {
                let (length, bin) = cells[i % cells.len()];
                Assignment {
                    question_index: q,
                    context_length: length,
                    target_depth: bin.centroid(),
                    depth_bin: bin,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_balance_within_one() {
        // 23 questions, 2 context lengths -> 10 cells; cell sizes should
        // be two 3s and eight 2s (or a rotation thereof), and the
        // assignment count is ~Q, not Q * lengths.len().
        let scheduler = DepthScheduler::uniform(vec![1000, 2000]);
        let assignments = scheduler.schedule(23).unwrap();

        use std::collections::HashMap;
        let mut counts: HashMap<(usize, DepthBin), usize> = HashMap::new();
        for length in [1000, 2000] {
            for bin in DepthBin::ALL {
                counts.insert((length, bin), 0);
            }
        }
        for a in &assignments {
            *counts.entry((a.context_length, a.depth_bin)).or_default() += 1;
        }
        let min = *counts.values().min().unwrap();
        let max = *counts.values().max().unwrap();
        assert!(max - min <= 1);
        assert_eq!(counts.len(), 2 * 5);
        assert_eq!(assignments.len(), 23);
    }

    #[test]
    fn deterministic_ordering() {
        let scheduler = DepthScheduler::uniform(vec![2000, 1000]);
        let assignments = scheduler.schedule(10).unwrap();
        for w in assignments.windows(2) {
            let key = |a: &Assignment| (a.context_length, a.depth_bin, a.question_index);
            assert!(key(&w[0]) <= key(&w[1]));
        }
    }

    #[test]
    fn fixed_mode_assigns_same_depth_everywhere() {
        let scheduler = DepthScheduler::fixed(vec![4000], 0.25);
        let assignments = scheduler.schedule(5).unwrap();
        assert!(assignments.iter().all(|a| a.depth_bin == DepthBin::P25));
    }

    #[test]
    fn legacy_mode_has_no_depth_variation() {
        let scheduler = DepthScheduler::legacy(vec![1000, 2000]);
        let assignments = scheduler.schedule(3).unwrap();
        assert_eq!(assignments.len(), 6);
        assert!(assignments.iter().all(|a| a.target_depth == 0.0));
    }

    #[test]
    fn max_questions_caps_and_balances() {
        let scheduler = DepthScheduler::uniform(vec![1000]).with_max_questions(Some(10));
        let assignments = scheduler.schedule(100).unwrap();
        assert_eq!(assignments.len(), 10);
    }

    #[test]
    fn empty_context_lengths_rejected() {
        let scheduler = DepthScheduler::uniform(vec![]);
        assert_eq!(
            scheduler.schedule(5).unwrap_err(),
            SchedulerError::NoContextLengths
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Uniform scheduling keeps every (length, bin) cell in the full
        /// grid within one of every other, for any question count and
        /// length set, with one assignment per question.
        #[test]
        fn uniform_buckets_stay_balanced(
            question_count in 1usize..200,
            lengths in prop::collection::vec(1usize..20_000, 1..4),
        ) {
            let scheduler = DepthScheduler::uniform(lengths.clone());
            let assignments = scheduler.schedule(question_count).unwrap();

            use std::collections::HashMap;
            let mut counts: HashMap<(usize, DepthBin), usize> = HashMap::new();
            for &length in &lengths {
                for bin in DepthBin::ALL {
                    counts.insert((length, bin), 0);
                }
            }
            for a in &assignments {
                *counts.entry((a.context_length, a.depth_bin)).or_default() += 1;
            }
            let min = *counts.values().min().unwrap();
            let max = *counts.values().max().unwrap();
            prop_assert!(max - min <= 1);
            prop_assert_eq!(assignments.len(), question_count);
        }

        /// Scheduling is a pure function of its inputs: same arguments
        /// always produce the same assignment list.
        #[test]
        fn schedule_is_deterministic(
            question_count in 1usize..100,
            lengths in prop::collection::vec(1usize..20_000, 1..4),
        ) {
            let a = DepthScheduler::uniform(lengths.clone()).schedule(question_count).unwrap();
            let b = DepthScheduler::uniform(lengths).schedule(question_count).unwrap();
            prop_assert_eq!(a, b);
        }

        /// max_questions caps the number of distinct questions scheduled at
        /// min(cap, question_count); one context length makes the
        /// assignment count equal to that directly.
        #[test]
        fn max_questions_never_exceeds_cap(
            question_count in 1usize..200,
            cap in 1usize..200,
        ) {
            let scheduler = DepthScheduler::uniform(vec![1000]).with_max_questions(Some(cap));
            let assignments = scheduler.schedule(question_count).unwrap();
            prop_assert_eq!(assignments.len(), question_count.min(cap));
        }
    }
}
