// src/assembler/tabular.rs
//
// Column-bucketed row assembly for layouts that survive pagination better
// when parsed tabularly. Anchors are located inside the inferred code
// column only (a code mentioned in an unrelated table must not open a
// row), each anchor owns the y-band down to the next anchor, and every
// column's text is reconstructed independently so a wrapped city name
// does not disturb the money columns.

use super::merge::{self, FieldPatterns};
use super::{RawRow, VendorProfile, order_number};
use crate::columns::{self, ColumnLayout};
use crate::layout::{self, Page, TextFragment};
use std::cmp::Ordering;
use tracing::debug;

/// Fragments this close below the header labels still belong to the
/// header band, not to the first row.
const HEADER_BAND_MARGIN: f64 = 1.0;

pub fn assemble_tabular(pages: &[Page], profile: &VendorProfile) -> Vec<RawRow> {
    let patterns = FieldPatterns::new();
    let mut rows = Vec::new();

    for page in pages {
        match columns::infer_columns(&page.fragments, profile.header_labels) {
            Some(layout) if layout.column("code").is_some() => {
                rows.extend(assemble_page(page, &layout, profile, &patterns));
            }
            _ => {
                // Continuation pages often omit the header row. Mandatory
                // fallback: anchor-merge over reconstructed lines.
                debug!(
                    page = page.number,
                    vendor = profile.format.tag(),
                    "Header inference failed, falling back to anchor-merge"
                );
                let lines =
                    layout::reconstruct_lines(&page.fragments, profile.y_tolerance);
                rows.extend(merge::assemble_merge(&lines, profile));
            }
        }
    }
    rows
}

fn assemble_page(
    page: &Page,
    layout: &ColumnLayout,
    profile: &VendorProfile,
    patterns: &FieldPatterns,
) -> Vec<RawRow> {
    let code_col = layout
        .column("code")
        .expect("checked by caller");

    // The header band was confidently located on this page (column
    // inference succeeded), so anchors above it are page furniture.
    let mut anchors: Vec<&TextFragment> = page
        .fragments
        .iter()
        .filter(|f| code_col.contains(f.x))
        .filter(|f| f.y < layout.header_y - HEADER_BAND_MARGIN)
        .filter(|f| profile.anchor.is_match(&f.text))
        .collect();
    anchors.sort_by(|a, b| b.y.partial_cmp(&a.y).unwrap_or(Ordering::Equal));

    let mut rows = Vec::new();
    for (idx, anchor) in anchors.iter().enumerate() {
        let band_top = anchor.y + profile.y_tolerance;
        let next_floor = anchors
            .get(idx + 1)
            .map(|n| n.y + profile.y_tolerance)
            .unwrap_or(f64::NEG_INFINITY);
        // A totals/footer block below the last row must not leak into it.
        let footer_floor = page
            .fragments
            .iter()
            .filter(|f| f.y < anchor.y - profile.y_tolerance)
            .filter(|f| patterns.is_footer(&f.text))
            .map(|f| f.y)
            .fold(f64::NEG_INFINITY, f64::max);
        let floor = next_floor.max(footer_floor);

        let band: Vec<TextFragment> = page
            .fragments
            .iter()
            .filter(|f| f.y <= band_top && f.y > floor)
            .cloned()
            .collect();

        let send_code = match profile.anchor.captures(&anchor.text) {
            Some(cap) => cap[1].to_string(),
            None => continue,
        };

        if let Some(row) = build_row(&send_code, &band, layout, profile, patterns) {
            rows.push(row);
        } else {
            debug!(send_code = %send_code, "Column-bucketed anchor discarded");
        }
    }
    rows
}

/// Reconstruct one column's text inside a band.
fn column_text(band: &[TextFragment], layout: &ColumnLayout, key: &str, y_tol: f64) -> String {
    let Some(col) = layout.column(key) else {
        return String::new();
    };
    let frags: Vec<TextFragment> = band
        .iter()
        .filter(|f| col.contains(f.x))
        .cloned()
        .collect();
    layout::reconstruct_lines(&frags, y_tol)
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn build_row(
    send_code: &str,
    band: &[TextFragment],
    layout: &ColumnLayout,
    profile: &VendorProfile,
    patterns: &FieldPatterns,
) -> Option<RawRow> {
    let y_tol = profile.y_tolerance;
    let raw = layout::reconstruct_lines(band, y_tol)
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let status_text = column_text(band, layout, "status", y_tol);
    let status = patterns
        .find_status(&status_text)
        .or_else(|| patterns.find_status(&raw));

    // Money columns in declared order; the disambiguator does not trust
    // that order anyway.
    let mut tokens = Vec::new();
    for key in ["crbt", "frais", "emballage", "total"] {
        tokens.extend(patterns.plain_amounts(&column_text(band, layout, key, y_tol)));
    }
    if tokens.is_empty() {
        tokens = patterns.money_tokens(&raw);
    }

    if status.is_none() && tokens.is_empty() {
        return None;
    }

    let city_text = column_text(band, layout, "ville", y_tol);
    let city = {
        let cleaned = merge::clean_city(&city_text);
        (!cleaned.is_empty()).then_some(cleaned)
    };

    let (pickup_date, delivery_date) = patterns.find_dates(&raw);

    Some(RawRow {
        send_code: send_code.to_string(),
        order_number: order_number(send_code),
        pickup_date,
        delivery_date,
        phone: patterns.find_phone(&raw),
        status,
        city,
        monetary_tokens: tokens,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::VendorFormat;

    fn frag(text: &str, x: f64, y: f64) -> TextFragment {
        TextFragment {
            text: text.to_string(),
            x,
            y,
            page: 1,
        }
    }

    fn header(y: f64) -> Vec<TextFragment> {
        vec![
            frag("Code d'envoi", 20.0, y),
            frag("Ville", 150.0, y),
            frag("Status", 280.0, y),
            frag("Crbt", 380.0, y),
            frag("Frais", 460.0, y),
        ]
    }

    #[test]
    fn rows_are_bucketed_by_column() {
        let mut frags = header(750.0);
        frags.extend(vec![
            frag("1200-4581", 20.0, 700.0),
            frag("Casablanca", 150.0, 700.0),
            frag("Livré", 280.0, 700.0),
            frag("290,00", 380.0, 700.0),
            frag("18,00", 460.0, 700.0),
            frag("1200-4582", 20.0, 660.0),
            frag("Rabat", 150.0, 660.0),
            frag("Refusé", 280.0, 660.0),
            frag("199,00", 380.0, 660.0),
            frag("18,00", 460.0, 660.0),
        ]);
        let page = Page {
            number: 1,
            fragments: frags,
        };
        let profile = VendorFormat::Metalivraison.profile();
        let rows = assemble_tabular(&[page], &profile);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].send_code, "1200-4581");
        assert_eq!(rows[0].city.as_deref(), Some("Casablanca"));
        assert_eq!(rows[0].status.as_deref(), Some("Livré"));
        assert_eq!(rows[0].monetary_tokens, vec![290.0, 18.0]);
        assert_eq!(rows[1].order_number, "4582");
        assert_eq!(rows[1].status.as_deref(), Some("Refusé"));
    }

    #[test]
    fn wrapped_city_does_not_disturb_money_columns() {
        let mut frags = header(750.0);
        frags.extend(vec![
            frag("1200-4581", 20.0, 700.0),
            frag("Sidi", 150.0, 700.0),
            frag("Bennour", 150.0, 697.5),
            frag("Livré", 280.0, 700.0),
            frag("290,00", 380.0, 700.0),
            frag("18,00", 460.0, 700.0),
        ]);
        let page = Page {
            number: 1,
            fragments: frags,
        };
        let profile = VendorFormat::Metalivraison.profile();
        let rows = assemble_tabular(&[page], &profile);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].city.as_deref(), Some("Sidi Bennour"));
        assert_eq!(rows[0].monetary_tokens, vec![290.0, 18.0]);
    }

    #[test]
    fn headerless_page_falls_back_to_anchor_merge() {
        // No header labels on this continuation page; the whole row is one
        // baseline, so anchor-merge still assembles it.
        let frags = vec![
            frag("1200-4581", 20.0, 700.0),
            frag("Casablanca", 150.0, 700.0),
            frag("Livré", 280.0, 700.0),
            frag("290,00 DH", 380.0, 700.0),
            frag("18,00 DH", 460.0, 700.0),
        ];
        let page = Page {
            number: 2,
            fragments: frags,
        };
        let profile = VendorFormat::Metalivraison.profile();
        let rows = assemble_tabular(&[page], &profile);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].send_code, "1200-4581");
        assert_eq!(rows[0].monetary_tokens, vec![290.0, 18.0]);
    }

    #[test]
    fn anchor_above_header_band_is_excluded() {
        let mut frags = header(750.0);
        // A code printed in the page title, above the table.
        frags.push(frag("1200-9999", 20.0, 790.0));
        frags.extend(vec![
            frag("1200-4581", 20.0, 700.0),
            frag("Casablanca", 150.0, 700.0),
            frag("Livré", 280.0, 700.0),
            frag("290,00", 380.0, 700.0),
        ]);
        let page = Page {
            number: 1,
            fragments: frags,
        };
        let profile = VendorFormat::Metalivraison.profile();
        let rows = assemble_tabular(&[page], &profile);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].send_code, "1200-4581");
    }

    #[test]
    fn anchor_outside_code_column_is_ignored() {
        let mut frags = header(750.0);
        frags.extend(vec![
            frag("1200-4581", 20.0, 700.0),
            frag("Casablanca", 150.0, 700.0),
            frag("Livré", 280.0, 700.0),
            frag("290,00", 380.0, 700.0),
            // An unrelated table on the right mentioning another code.
            frag("1200-7777", 460.0, 700.0),
        ]);
        let page = Page {
            number: 1,
            fragments: frags,
        };
        let profile = VendorFormat::Metalivraison.profile();
        let rows = assemble_tabular(&[page], &profile);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].send_code, "1200-4581");
    }

    #[test]
    fn footer_block_does_not_leak_into_last_row() {
        let mut frags = header(750.0);
        frags.extend(vec![
            frag("1200-4581", 20.0, 700.0),
            frag("Livré", 280.0, 700.0),
            frag("290,00", 380.0, 700.0),
            frag("Total", 280.0, 650.0),
            frag("4580,00", 380.0, 650.0),
        ]);
        let page = Page {
            number: 1,
            fragments: frags,
        };
        let profile = VendorFormat::Metalivraison.profile();
        let rows = assemble_tabular(&[page], &profile);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].monetary_tokens, vec![290.0]);
    }
}
