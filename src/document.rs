// src/document.rs
//
// Per-document parse pipeline: assemble raw rows, resolve their monetary
// tokens against the document-wide fee mode, and pull the invoice header
// metadata (number, date, declared totals) that the aggregator later
// checks the row sums against.

use crate::assembler::{self, RawRow, VendorFormat};
use crate::layout::{self, Page};
use crate::money::{self, ResolvedAmounts};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A raw row plus its resolved monetary fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRecord {
    #[serde(flatten)]
    pub row: RawRow,
    pub crbt: Option<f64>,
    pub fees: Option<f64>,
    pub packaging: Option<f64>,
    pub total: Option<f64>,
}

/// The durable output of one parse. Immutable once built; a re-parse
/// replaces it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDocument {
    pub file_name: String,
    pub vendor: VendorFormat,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub declared_total_net: Option<f64>,
    pub declared_total_brut: Option<f64>,
    pub declared_fees_total: Option<f64>,
    pub rows: Vec<ShipmentRecord>,
}

/// Parse one document's pages with the caller-supplied vendor format.
/// Never fails: unknown layouts degrade to partial or empty row sets.
pub fn parse_document(file_name: &str, pages: &[Page], vendor: VendorFormat) -> InvoiceDocument {
    let profile = vendor.profile();
    let raw_rows = assembler::assemble(pages, vendor);
    debug!(rows = raw_rows.len(), vendor = vendor.tag(), "Assembled raw rows");

    // Fee mode is scoped to this document's rows only. Fee conventions
    // differ by vendor and by invoice run, so modes are never pooled.
    let mode = money::fee_mode(
        raw_rows
            .iter()
            .flat_map(|r| r.monetary_tokens.iter().copied()),
    );

    let rows: Vec<ShipmentRecord> = raw_rows
        .into_iter()
        .map(|row| {
            let ResolvedAmounts {
                crbt,
                fees,
                packaging,
                total,
            } = money::resolve(&row.monetary_tokens, mode, profile.with_packaging);
            ShipmentRecord {
                row,
                crbt,
                fees,
                packaging,
                total,
            }
        })
        .collect();

    let meta = extract_metadata(pages);
    info!(
        file = %file_name,
        vendor = vendor.tag(),
        rows = rows.len(),
        invoice_number = ?meta.invoice_number,
        fee_mode = ?mode,
        "Parsed document"
    );

    InvoiceDocument {
        file_name: file_name.to_string(),
        vendor,
        invoice_number: meta.invoice_number,
        invoice_date: meta.invoice_date,
        declared_total_net: meta.total_net,
        declared_total_brut: meta.total_brut,
        declared_fees_total: meta.fees_total,
        rows,
    }
}

#[derive(Default)]
struct HeaderMetadata {
    invoice_number: Option<String>,
    invoice_date: Option<String>,
    total_net: Option<f64>,
    total_brut: Option<f64>,
    fees_total: Option<f64>,
}

/// Keyword-anchored header extraction over the reconstructed lines of
/// every page. Declared totals take the last match so a grand-total line
/// on the final page wins over per-page subtotals.
fn extract_metadata(pages: &[Page]) -> HeaderMetadata {
    let number_re =
        Regex::new(r"(?i)facture\s*(?:n[°o]?\s*)?:?\s*([A-Z0-9][A-Z0-9/-]*)").unwrap();
    let date_re =
        Regex::new(r"(?i)date\s*:?\s*(\d{2}/\d{2}/\d{4}|\d{4}-\d{2}-\d{2})").unwrap();
    let brut_re =
        Regex::new(r"(?i)total\s+(?:crbt|brut)\s*:?\s*(-?\d[\d\s]*(?:[.,]\d{1,2})?)").unwrap();
    let net_re =
        Regex::new(r"(?i)(?:net\s+a\s+payer|net\s+à\s+payer|total\s+net)\s*:?\s*(-?\d[\d\s]*(?:[.,]\d{1,2})?)")
            .unwrap();
    let fees_re =
        Regex::new(r"(?i)total\s+frais\s*:?\s*(-?\d[\d\s]*(?:[.,]\d{1,2})?)").unwrap();

    let mut meta = HeaderMetadata::default();
    for page in pages {
        for line in layout::reconstruct_lines(&page.fragments, layout::Y_TOLERANCE_LOOSE) {
            if meta.invoice_number.is_none() {
                if let Some(cap) = number_re.captures(&line.text) {
                    meta.invoice_number = Some(cap[1].to_string());
                }
            }
            if meta.invoice_date.is_none() {
                if let Some(cap) = date_re.captures(&line.text) {
                    meta.invoice_date = Some(cap[1].to_string());
                }
            }
            if let Some(cap) = brut_re.captures(&line.text) {
                meta.total_brut = parse_grouped_amount(&cap[1]);
            }
            if let Some(cap) = net_re.captures(&line.text) {
                meta.total_net = parse_grouped_amount(&cap[1]);
            }
            if let Some(cap) = fees_re.captures(&line.text) {
                meta.fees_total = parse_grouped_amount(&cap[1]);
            }
        }
    }
    meta
}

/// Totals are printed with thousands groups ("4 580,00").
fn parse_grouped_amount(s: &str) -> Option<f64> {
    s.replace(' ', "").replace(',', ".").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TextFragment;

    fn frag(text: &str, x: f64, y: f64) -> TextFragment {
        TextFragment {
            text: text.to_string(),
            x,
            y,
            page: 1,
        }
    }

    fn narrative_page(rows: &[&str], header: &[&str]) -> Page {
        let mut fragments = Vec::new();
        let mut y = 800.0;
        for text in header {
            fragments.push(frag(text, 20.0, y));
            y -= 20.0;
        }
        for text in rows {
            fragments.push(frag(text, 20.0, y));
            y -= 20.0;
        }
        Page {
            number: 1,
            fragments,
        }
    }

    #[test]
    fn full_pipeline_resolves_rows_and_metadata() {
        let page = narrative_page(
            &[
                "7-127130 0612345678 2024-05-01 Livré Casablanca 290,00 DH 18,00 DH 272,00 DH",
                "7-127131 0655443322 2024-05-02 Refusé Rabat 199,00 DH 18,00 DH 181,00 DH",
            ],
            &["Facture N° F-2024/0817", "Date : 15/05/2024"],
        );
        let doc = parse_document("mai.json", &[page], VendorFormat::Lionex);

        assert_eq!(doc.invoice_number.as_deref(), Some("F-2024/0817"));
        assert_eq!(doc.invoice_date.as_deref(), Some("15/05/2024"));
        assert_eq!(doc.rows.len(), 2);

        let first = &doc.rows[0];
        assert_eq!(first.row.order_number, "127130");
        assert_eq!(first.crbt, Some(290.0));
        assert_eq!(first.fees, Some(18.0));
        assert_eq!(first.total, Some(272.0));
        assert!(money::satisfies_identity(&ResolvedAmounts {
            crbt: first.crbt,
            fees: first.fees,
            packaging: first.packaging,
            total: first.total,
        }));
    }

    #[test]
    fn declared_totals_prefer_the_last_match() {
        let page1 = narrative_page(&[], &["Total CRBT : 1 000,00"]);
        let page2 = narrative_page(
            &[],
            &["Total CRBT : 4 580,00", "Net à payer : 4 292,00", "Total Frais : 288,00"],
        );
        let doc = parse_document("f.json", &[page1, page2], VendorFormat::Lionex);
        assert_eq!(doc.declared_total_brut, Some(4580.0));
        assert_eq!(doc.declared_total_net, Some(4292.0));
        assert_eq!(doc.declared_fees_total, Some(288.0));
    }

    #[test]
    fn illegible_rows_still_emit_with_null_amounts() {
        let page = narrative_page(
            &["7-127130 Livré Casablanca 290,00 DH"],
            &[],
        );
        let doc = parse_document("f.json", &[page], VendorFormat::Lionex);
        assert_eq!(doc.rows.len(), 1);
        assert_eq!(doc.rows[0].crbt, None);
        assert_eq!(doc.rows[0].total, None);
        assert!(doc.rows[0].row.raw.contains("290,00"));
    }

    #[test]
    fn empty_pages_yield_an_empty_document() {
        let doc = parse_document("empty.json", &[], VendorFormat::Yfd);
        assert!(doc.rows.is_empty());
        assert_eq!(doc.invoice_number, None);
    }
}
