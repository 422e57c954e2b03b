// src/layout.rs

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One positioned text fragment, as delivered by the extraction service.
/// Coordinates are page-relative, y growing towards the top of the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    pub text: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub page: u32,
}

/// One page of fragments, the unit of JSON input. Fragment order is
/// arbitrary; nothing downstream may assume the extractor pre-sorted them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub fragments: Vec<TextFragment>,
}

/// Tolerance for dense column tables where every cell of a row sits on the
/// same baseline.
pub const Y_TOLERANCE_TIGHT: f64 = 2.0;

/// Tolerance for wrapped narrative rows. Some vendors print the numeric
/// columns on a slightly lower baseline than the row's text, so the sweep
/// has to be more forgiving.
pub const Y_TOLERANCE_LOOSE: f64 = 4.5;

/// A reconstructed line: fragments sharing a baseline within tolerance,
/// ordered left to right, rendered as one whitespace-normalized string.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// y of the fragment that opened the line during the sweep.
    pub y: f64,
    pub fragments: Vec<TextFragment>,
    pub text: String,
}

/// Cluster the fragments of one page into ordered lines.
///
/// Sorts by descending y then ascending x and sweeps top to bottom,
/// accumulating fragments while they stay within `y_tolerance` of the line
/// anchor. Pure; empty input yields an empty line list.
pub fn reconstruct_lines(fragments: &[TextFragment], y_tolerance: f64) -> Vec<Line> {
    let mut sorted: Vec<TextFragment> = fragments.to_vec();
    sorted.sort_by(|a, b| {
        b.y.partial_cmp(&a.y)
            .unwrap_or(Ordering::Equal)
            .then(a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal))
    });

    let mut lines = Vec::new();
    let mut current: Vec<TextFragment> = Vec::new();
    let mut anchor_y = 0.0;

    for frag in sorted {
        if current.is_empty() {
            anchor_y = frag.y;
            current.push(frag);
        } else if (frag.y - anchor_y).abs() <= y_tolerance {
            current.push(frag);
        } else {
            lines.push(close_line(std::mem::take(&mut current), anchor_y));
            anchor_y = frag.y;
            current.push(frag);
        }
    }
    if !current.is_empty() {
        lines.push(close_line(current, anchor_y));
    }
    lines
}

fn close_line(mut fragments: Vec<TextFragment>, anchor_y: f64) -> Line {
    fragments.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal));
    let joined = fragments
        .iter()
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    Line {
        y: anchor_y,
        text: collapse_whitespace(&joined),
        fragments,
    }
}

/// Collapse any run of whitespace to a single space and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
