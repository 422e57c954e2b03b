// src/assembler/merge.rs
//
// Generic anchor-merge row assembly. Scan reconstructed lines in order; a
// line matching the vendor's shipment-code pattern opens a row, and
// following lines merge into it until the next anchor, a footer boundary,
// or the continuation cap. Works for every narrative layout and doubles as
// the mandatory fallback when tabular header inference fails on a page.

use super::{RawRow, VendorProfile, order_number};
use crate::layout::{Line, collapse_whitespace};
use regex::Regex;

/// Stop merging early once a row has a delivery status and this many
/// currency tokens; further merging risks pulling in the next row.
const EARLY_STOP_TOKEN_COUNT: usize = 3;

/// Compiled field patterns shared by one assembly pass.
pub(crate) struct FieldPatterns {
    /// Signed decimal immediately followed by a currency marker, dot or
    /// comma as the decimal separator.
    money: Regex,
    phone: Regex,
    date: Regex,
    /// Totals, signatures, "thank you" boilerplate: section boundaries.
    footer: Regex,
    /// Delivery-status stems, tolerant of accent mangling after the stem.
    status: Regex,
    /// Bare signed decimal, for trusted column text where no currency
    /// marker is required.
    amount: Regex,
}

impl FieldPatterns {
    pub(crate) fn new() -> Self {
        Self {
            money: Regex::new(r"(?i)(-?\d+(?:[.,]\d{1,2})?)\s*(?:dhs?|mad)\b").unwrap(),
            phone: Regex::new(r"\b0\d{9}\b").unwrap(),
            date: Regex::new(r"\b(\d{4}-\d{2}-\d{2}|\d{2}/\d{2}/\d{4})\b").unwrap(),
            footer: Regex::new(
                r"(?i)\b(total|totaux|signature|cachet|merci|somme|ecart|écart)",
            )
            .unwrap(),
            status: Regex::new(r"(?i)\b(livr\S*|refus\S*)").unwrap(),
            amount: Regex::new(r"-?\d+(?:[.,]\d{1,2})?").unwrap(),
        }
    }

    pub(crate) fn is_footer(&self, text: &str) -> bool {
        self.footer.is_match(text)
    }

    pub(crate) fn money_tokens(&self, text: &str) -> Vec<f64> {
        self.money
            .captures_iter(text)
            .filter_map(|c| parse_amount(&c[1]))
            .collect()
    }

    pub(crate) fn find_status(&self, text: &str) -> Option<String> {
        self.status.find(text).map(|m| demojibake(m.as_str()))
    }

    pub(crate) fn find_phone(&self, text: &str) -> Option<String> {
        self.phone.find(text).map(|m| m.as_str().to_string())
    }

    pub(crate) fn find_dates(&self, text: &str) -> (Option<String>, Option<String>) {
        let mut dates = self.date.find_iter(text).map(|m| m.as_str().to_string());
        (dates.next(), dates.next())
    }

    /// Amounts from trusted column text, currency marker optional.
    pub(crate) fn plain_amounts(&self, text: &str) -> Vec<f64> {
        self.amount
            .find_iter(text)
            .filter_map(|m| parse_amount(m.as_str()))
            .collect()
    }
}

pub(crate) fn parse_amount(s: &str) -> Option<f64> {
    s.replace(',', ".").parse().ok()
}

/// Assemble rows from the ordered lines of one page.
pub fn assemble_merge(lines: &[Line], profile: &VendorProfile) -> Vec<RawRow> {
    let patterns = FieldPatterns::new();
    let mut rows = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let Some(cap) = profile.anchor.captures(&lines[i].text) else {
            i += 1;
            continue;
        };
        let send_code = cap[1].to_string();

        let mut merged = lines[i].text.clone();
        let mut continuations = 0;
        let mut j = i + 1;
        while j < lines.len() && continuations < profile.max_continuations {
            let text = &lines[j].text;
            if profile.anchor.is_match(text) || patterns.is_footer(text) {
                break;
            }
            merged.push(' ');
            merged.push_str(text);
            continuations += 1;
            j += 1;
            if patterns.status.is_match(&merged)
                && patterns.money_tokens(&merged).len() >= EARLY_STOP_TOKEN_COUNT
            {
                break;
            }
        }

        if let Some(row) = parse_row(&send_code, &merged, &patterns) {
            rows.push(row);
        } else {
            tracing::debug!(
                send_code = %send_code,
                "Anchor with no status and no monetary tokens, discarded"
            );
        }
        i = j.max(i + 1);
    }
    rows
}

/// Extract the row fields from a merged line buffer. Returns `None` for
/// candidates with neither a status nor monetary tokens: those are almost
/// always a stray reference to the code in an unrelated table (a variance
/// report, for instance), not a shipment row.
pub(crate) fn parse_row(
    send_code: &str,
    merged: &str,
    patterns: &FieldPatterns,
) -> Option<RawRow> {
    let status_match = patterns.status.find(merged);
    let tokens: Vec<(usize, f64)> = patterns
        .money
        .captures_iter(merged)
        .filter_map(|c| {
            let m = c.get(1)?;
            Some((m.start(), parse_amount(m.as_str())?))
        })
        .collect();

    if status_match.is_none() && tokens.is_empty() {
        return None;
    }

    let (pickup_date, delivery_date) = patterns.find_dates(merged);

    let city = status_match.and_then(|s| {
        let first_money = tokens.iter().map(|(pos, _)| *pos).find(|&pos| pos > s.end())?;
        let between = &merged[s.end()..first_money];
        let cleaned = clean_city(between);
        (!cleaned.is_empty()).then_some(cleaned)
    });

    Some(RawRow {
        send_code: send_code.to_string(),
        order_number: order_number(send_code),
        pickup_date,
        delivery_date,
        phone: patterns.phone.find(merged).map(|m| m.as_str().to_string()),
        status: status_match.map(|m| demojibake(m.as_str())),
        city,
        monetary_tokens: tokens.into_iter().map(|(_, v)| v).collect(),
        raw: merged.to_string(),
    })
}

/// Undo the common UTF-8-read-as-Latin-1 sequences these invoices carry.
pub(crate) fn demojibake(s: &str) -> String {
    s.replace("Ã©", "é")
        .replace("Ã¨", "è")
        .replace("Ã´", "ô")
        .replace("Ã®", "î")
        .replace("Ã»", "û")
        .replace("Ã§", "ç")
        .replace("Ã\u{a0}", "à")
        .replace('\u{fffd}', "")
}

/// Strip stray separators and mangling artifacts from a city slice.
pub(crate) fn clean_city(s: &str) -> String {
    let fixed = demojibake(s);
    let kept: String = fixed
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .collect();
    collapse_whitespace(&kept)
}
