// src/assembler/mod.rs
//
// Format-dispatched row assembly. Each delivery vendor prints the same
// logical shipment row in a structurally different layout; the caller
// names the vendor explicitly (formats look alike but are not sniffable)
// and the matching profile drives one of two shared algorithms.

mod merge;
mod tabular;

use crate::layout::{self, Page};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use merge::assemble_merge;

/// Delivery vendors with a supported invoice layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorFormat {
    Lionex,
    TwelveLivery,
    Metalivraison,
    Ibex,
    PalExpress,
    Yfd,
    Livre24,
    Oscario,
}

impl VendorFormat {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "lionex" => Some(Self::Lionex),
            "twelve_livery" => Some(Self::TwelveLivery),
            "metalivraison" => Some(Self::Metalivraison),
            "ibex" => Some(Self::Ibex),
            "pal_express" => Some(Self::PalExpress),
            "yfd" => Some(Self::Yfd),
            "livre24" => Some(Self::Livre24),
            "oscario" => Some(Self::Oscario),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Lionex => "lionex",
            Self::TwelveLivery => "twelve_livery",
            Self::Metalivraison => "metalivraison",
            Self::Ibex => "ibex",
            Self::PalExpress => "pal_express",
            Self::Yfd => "yfd",
            Self::Livre24 => "livre24",
            Self::Oscario => "oscario",
        }
    }

    /// The parsing profile for this vendor's layout.
    pub fn profile(self) -> VendorProfile {
        // All vendor codes share the digits-digits[_suffix] shape; the
        // digit-run lengths and the hyphen position are what differ.
        match self {
            Self::Lionex => VendorProfile::narrative(self, r"\b(\d{1,3}-\d{5,7})\b"),
            Self::TwelveLivery => {
                VendorProfile::narrative(self, r"\b(\d{2}-\d{6,8}(?:_\d+)?)\b")
            }
            Self::Metalivraison => VendorProfile::tabular(
                self,
                r"\b(\d{3,5}-\d{4,6})\b",
                &[
                    ("code", "Code d'envoi"),
                    ("ville", "Ville"),
                    ("status", "Status"),
                    ("crbt", "Crbt"),
                    ("frais", "Frais"),
                ],
            ),
            Self::Ibex => VendorProfile::narrative(self, r"\b(\d-\d{6,9})\b"),
            Self::PalExpress => VendorProfile::tabular(
                self,
                r"\b(\d{2,4}-\d{5,7}(?:_[A-Z0-9]+)?)\b",
                &[
                    ("code", "N° Colis"),
                    ("ville", "Destination"),
                    ("status", "Statut"),
                    ("crbt", "Montant CRBT"),
                    ("frais", "Frais"),
                    ("total", "Net"),
                ],
            ),
            Self::Yfd => VendorProfile::narrative(self, r"\b(\d{1,2}-\d{5,8})\b"),
            Self::Livre24 => VendorProfile::narrative(self, r"\b(\d{4,6}-\d{3,5})\b"),
            Self::Oscario => {
                let mut p = VendorProfile::narrative(self, r"\b(\d{1,3}-\d{5,8})\b");
                p.with_packaging = true;
                p
            }
        }
    }
}

/// Default cap on how many continuation lines may merge into one row.
pub const MAX_CONTINUATIONS: usize = 4;

/// Everything the two assembly algorithms need to know about a layout.
pub struct VendorProfile {
    pub format: VendorFormat,
    pub anchor: Regex,
    pub y_tolerance: f64,
    pub max_continuations: usize,
    /// Rows are strictly tabular: parse via inferred columns, falling back
    /// to anchor-merge when header inference fails on a page.
    pub tabular: bool,
    pub header_labels: &'static [(&'static str, &'static str)],
    /// Vendor itemizes a packaging fee (four-value monetary rows).
    pub with_packaging: bool,
}

impl VendorProfile {
    fn narrative(format: VendorFormat, anchor: &str) -> Self {
        Self {
            format,
            anchor: Regex::new(anchor).unwrap(),
            y_tolerance: layout::Y_TOLERANCE_LOOSE,
            max_continuations: MAX_CONTINUATIONS,
            tabular: false,
            header_labels: &[],
            with_packaging: false,
        }
    }

    fn tabular(
        format: VendorFormat,
        anchor: &str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self {
            format,
            anchor: Regex::new(anchor).unwrap(),
            y_tolerance: layout::Y_TOLERANCE_TIGHT,
            max_continuations: MAX_CONTINUATIONS,
            tabular: true,
            header_labels: labels,
            with_packaging: false,
        }
    }
}

/// One assembled shipment row, before monetary resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub send_code: String,
    pub order_number: String,
    pub pickup_date: Option<String>,
    pub delivery_date: Option<String>,
    pub phone: Option<String>,
    pub status: Option<String>,
    pub city: Option<String>,
    pub monetary_tokens: Vec<f64>,
    pub raw: String,
}

/// Derive the shop order number from a vendor send code: the digits
/// following the first hyphen, or the first digit run if there is none.
pub fn order_number(send_code: &str) -> String {
    if let Some((_, rest)) = send_code.split_once('-') {
        rest.chars().take_while(|c| c.is_ascii_digit()).collect()
    } else {
        send_code
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect()
    }
}

/// Assemble raw shipment rows from the pages of one document.
pub fn assemble(pages: &[Page], format: VendorFormat) -> Vec<RawRow> {
    let profile = format.profile();
    if profile.tabular {
        tabular::assemble_tabular(pages, &profile)
    } else {
        let mut rows = Vec::new();
        for page in pages {
            let lines = layout::reconstruct_lines(&page.fragments, profile.y_tolerance);
            rows.extend(merge::assemble_merge(&lines, &profile));
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_number_takes_digits_after_first_hyphen() {
        assert_eq!(order_number("7-127130"), "127130");
        assert_eq!(order_number("12-345678_2"), "345678");
    }

    #[test]
    fn order_number_falls_back_to_first_digit_run() {
        assert_eq!(order_number("CMD99881"), "99881");
        assert_eq!(order_number("127130"), "127130");
    }

    #[test]
    fn format_tags_round_trip() {
        for f in [
            VendorFormat::Lionex,
            VendorFormat::TwelveLivery,
            VendorFormat::Metalivraison,
            VendorFormat::Ibex,
            VendorFormat::PalExpress,
            VendorFormat::Yfd,
            VendorFormat::Livre24,
            VendorFormat::Oscario,
        ] {
            assert_eq!(VendorFormat::from_tag(f.tag()), Some(f));
        }
        assert_eq!(VendorFormat::from_tag("unknown_vendor"), None);
    }

    #[test]
    fn anchor_patterns_differ_per_vendor() {
        let lionex = VendorFormat::Lionex.profile();
        assert!(lionex.anchor.is_match("7-127130"));
        assert!(!lionex.anchor.is_match("ref 1234567"));

        let livre24 = VendorFormat::Livre24.profile();
        assert!(livre24.anchor.is_match("20240-881"));
        assert!(!livre24.anchor.is_match("7-127130"));
    }

    #[test]
    fn only_oscario_carries_packaging() {
        assert!(VendorFormat::Oscario.profile().with_packaging);
        assert!(!VendorFormat::Lionex.profile().with_packaging);
    }
}
