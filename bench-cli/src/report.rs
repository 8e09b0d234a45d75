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

//! Report rendering: the structured JSON summary plus a terminal-friendly
//! ASCII heatmap, standing in for the out-of-scope HTML chart output.

use bench_core::model::DepthBin;
use bench_core::{DepthCell, PositionBin};
use bench_eval::RunWarnings;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub model_name: &'a str,
    pub questions_evaluated: usize,
    pub mean_score: f64,
    pub position_bins: &'a [PositionBin],
    pub depth_cells: &'a [DepthCell],
    pub warnings: &'a RunWarnings,
}

pub fn render_json(report: &RunReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

/// Render the depth x context-length grid as an ASCII table, one row per
/// context length and one column per depth bin, with `--` for empty cells.
pub fn render_ascii_table(context_lengths: &[usize], cells: &[DepthCell]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:>10} |", "length"));
    for bin in DepthBin::ALL {
        out.push_str(&format!(" {:>6} |", bin.label()));
    }
    out.push('\n');

    let header_width = 12 + DepthBin::ALL.len() * 9;
    out.push_str(&"-".repeat(header_width));
    out.push('\n');

    for &length in context_lengths {
        out.push_str(&format!("{:>10} |", length));
        for bin in DepthBin::ALL {
            let cell = cells
                .iter()
                .find(|c| c.context_length == length && c.depth_bin == bin);
            let text = match cell.and_then(|c| c.accuracy) {
                Some(acc) => format!("{:>5.1}%", acc * 100.0),
                None => "   -- ".to_string(),
            };
            out.push_str(&format!(" {text} |"));
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_table_renders_known_and_empty_cells() {
        let cells = vec![DepthCell {
            context_length: 1000,
            depth_bin: DepthBin::P50,
            accuracy: Some(0.75),
            count: 4,
        }];
        let table = render_ascii_table(&[1000], &cells);
        assert!(table.contains("75.0%"));
        assert!(table.contains("--"));
    }

    #[test]
    fn json_report_round_trips_through_serde() {
        let warnings = RunWarnings::default();
        let report = RunReport {
            model_name: "test-model",
            questions_evaluated: 10,
            mean_score: 0.5,
            position_bins: &[],
            depth_cells: &[],
            warnings: &warnings,
        };
        let json = render_json(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["model_name"], "test-model");
        assert_eq!(value["questions_evaluated"], 10);
    }
}
