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

//! Heatmap aggregation (C9): 1-D position bins and 2-D depth×length cells.
//!
//! Both reductions are pure functions of their inputs — no I/O, no
//! randomness — so they can run identically whether fed live pipeline
//! output or a reloaded result file.

use crate::model::{DepthBin, Position};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionBin {
    pub start_pos: usize,
    pub end_pos: usize,
    pub coverage: f64,
    pub accuracy: Option<f64>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthCell {
    pub context_length: usize,
    pub depth_bin: DepthBin,
    pub accuracy: Option<f64>,
    pub count: usize,
}

/// A question's span plus its scored outcome, as consumed by the 1-D
/// aggregator. `score` is `None` for questions that were never evaluated
/// (only their coverage contributes, not their accuracy).
#[derive(Debug, Clone, Copy)]
pub struct ScoredSpan {
    pub position: Position,
    pub score: Option<f64>,
}

/// Compute the `B` 1-D position bins over a source of `source_len` tokens.
///
/// Coverage is the per-question proportional overlap with each bin,
/// summed across questions and then normalized by the total question
/// count (mean coverage per question, not the fraction of questions
/// touching the bin).
pub fn calculate_position_bins(
    spans: &[ScoredSpan],
    source_len: usize,
    num_bins: usize,
) -> Vec<PositionBin> {
    let mut bins: Vec<PositionBin> = (0..num_bins)
        .map(|i| {
            let start_pos = i * source_len / num_bins;
            let end_pos = (i + 1) * source_len / num_bins;
            PositionBin {
                start_pos,
                end_pos,
                coverage: 0.0,
                accuracy: None,
                count: 0,
            }
        })
        .collect();

    if spans.is_empty() {
        return bins;
    }

    let mut score_sum = vec![0.0f64; num_bins];
    let mut score_count = vec![0usize; num_bins];

    for span in spans {
        let s = span.position.start_pos;
        let e = span.position.end_pos;
        let span_len = (e - s).max(1) as f64;

        for bin in bins.iter_mut() {
            let overlap = overlap_len(s, e, bin.start_pos, bin.end_pos);
            if overlap > 0 {
                bin.coverage += overlap as f64 / span_len;
            }
        }

        for (i, bin) in bins.iter().enumerate() {
            if s >= bin.start_pos && s < bin.end_pos {
                if let Some(score) = span.score {
                    score_sum[i] += score;
                    score_count[i] += 1;
                }
            }
        }
    }

    let total = spans.len() as f64;
    for (i, bin) in bins.iter_mut().enumerate() {
        bin.coverage /= total;
        bin.count = score_count[i];
        bin.accuracy = if score_count[i] > 0 {
            Some(score_sum[i] / score_count[i] as f64)
        } else {
            None
        };
    }

    bins
}

fn overlap_len(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> usize {
    let lo = a_start.max(b_start);
    let hi = a_end.min(b_end);
    hi.saturating_sub(lo)
}

/// A single depth-aware result, as consumed by the 2-D aggregator.
#[derive(Debug, Clone, Copy)]
pub struct DepthResult {
    pub context_length: usize,
    pub depth_bin: DepthBin,
    pub score: f64,
}

/// Build the full `context_lengths × depth bins` cell grid, including
/// empty cells, so the result always has exactly
/// `context_lengths.len() * 5` entries.
pub fn calculate_depth_cells(context_lengths: &[usize], results: &[DepthResult]) -> Vec<DepthCell> {
    let mut cells: Vec<DepthCell> = context_lengths
        .iter()
        .flat_map(|&length| {
            DepthBin::ALL.iter().map(move |&bin| DepthCell {
                context_length: length,
                depth_bin: bin,
                accuracy: None,
                count: 0,
            })
        })
        .collect();

    let mut sums = vec![0.0f64; cells.len()];

    for result in results {
        if let Some(idx) = cells
            .iter()
            .position(|c| c.context_length == result.context_length && c.depth_bin == result.depth_bin)
        {
            sums[idx] += result.score;
            cells[idx].count += 1;
        }
    }

    for (cell, sum) in cells.iter_mut().zip(sums.into_iter()) {
        if cell.count > 0 {
            cell.accuracy = Some(sum / cell.count as f64);
        }
    }

    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_conservation_single_question() {
        let span = ScoredSpan {
            position: Position {
                start_pos: 0,
                end_pos: 300,
            },
            score: Some(1.0),
        };
        let bins = calculate_position_bins(&[span], 1000, 10);
        let sum: f64 = bins.iter().map(|b| b.coverage).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!((bins[0].coverage - 1.0 / 3.0).abs() < 1e-9);
        assert!((bins[1].coverage - 1.0 / 3.0).abs() < 1e-9);
        assert!((bins[2].coverage - 1.0 / 3.0).abs() < 1e-9);
        for bin in &bins[3..] {
            assert!((bin.coverage - 0.0).abs() < 1e-9);
        }
    }

    #[test]
    fn coverage_bounds_hold() {
        let spans: Vec<ScoredSpan> = (0..50)
            .map(|i| ScoredSpan {
                position: Position {
                    start_pos: i * 17,
                    end_pos: i * 17 + 40,
                },
                score: Some(0.5),
            })
            .collect();
        let bins = calculate_position_bins(&spans, 2000, 20);
        for bin in &bins {
            assert!(bin.coverage >= 0.0 && bin.coverage <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn empty_bin_has_no_accuracy() {
        let span = ScoredSpan {
            position: Position {
                start_pos: 0,
                end_pos: 10,
            },
            score: Some(1.0),
        };
        let bins = calculate_position_bins(&[span], 1000, 10);
        assert!(bins[9].accuracy.is_none());
        assert_eq!(bins[9].count, 0);
    }

    #[test]
    fn bin_count_matches_request() {
        let bins = calculate_position_bins(&[], 1000, 7);
        assert_eq!(bins.len(), 7);
    }

    #[test]
    fn depth_cell_grid_is_full_cartesian_product() {
        let cells = calculate_depth_cells(&[1000, 2000, 4000], &[]);
        assert_eq!(cells.len(), 15);
        assert!(cells.iter().all(|c| c.accuracy.is_none()));
    }

    #[test]
    fn depth_cell_accuracy_is_mean_score() {
        let results = vec![
            DepthResult {
                context_length: 1000,
                depth_bin: DepthBin::P50,
                score: 1.0,
            },
            DepthResult {
                context_length: 1000,
                depth_bin: DepthBin::P50,
                score: 0.0,
            },
        ];
        let cells = calculate_depth_cells(&[1000], &results);
        let cell = cells
            .iter()
            .find(|c| c.depth_bin == DepthBin::P50)
            .unwrap();
        assert_eq!(cell.count, 2);
        assert_eq!(cell.accuracy, Some(0.5));
    }
}
