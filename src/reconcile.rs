// src/reconcile.rs
//
// Joins resolved shipment records to shop orders and classifies every row.
// Pure and idempotent: the same records and lookup results always yield
// the same reconciled rows, so the whole surface can be recomputed
// whenever either input changes.

use crate::columns::fold_text;
use crate::document::{InvoiceDocument, ShipmentRecord};
use crate::lookup::{MarkPaidOrder, OrderLookupResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// A row whose shop/invoice sides differ by less than this matches green.
pub const GREEN_DIFF_MAX: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    MatchedGreen,
    MatchedRed,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledRow {
    pub record: ShipmentRecord,
    pub lookup: Option<OrderLookupResult>,
    pub is_refused: bool,
    pub shop_comparable: Option<f64>,
    pub invoice_comparable: Option<f64>,
    pub diff: Option<f64>,
    pub classification: Classification,
}

/// Refused shipments are detected on the status stem; accent corruption
/// ("RefusÃ©", "Refus") must still count.
pub fn is_refused_status(status: Option<&str>) -> bool {
    status
        .map(fold_text)
        .is_some_and(|s| s.split_whitespace().any(|w| w.starts_with("refus")))
}

/// Join records to lookup results and classify each row.
pub fn reconcile_rows(
    records: &[ShipmentRecord],
    lookups: &HashMap<String, OrderLookupResult>,
) -> Vec<ReconciledRow> {
    records
        .iter()
        .map(|record| reconcile_row(record, lookups.get(&record.row.order_number)))
        .collect()
}

fn reconcile_row(
    record: &ShipmentRecord,
    lookup: Option<&OrderLookupResult>,
) -> ReconciledRow {
    let is_refused = is_refused_status(record.row.status.as_deref());

    let found = lookup.filter(|l| l.found);
    let Some(order) = found else {
        return ReconciledRow {
            record: record.clone(),
            lookup: lookup.cloned(),
            is_refused,
            shop_comparable: None,
            invoice_comparable: None,
            diff: None,
            classification: Classification::Missing,
        };
    };

    // A refused shipment is not charged: both sides are forced to zero so
    // it can never be flagged as a mismatch.
    let (shop, invoice) = if is_refused {
        (Some(0.0), Some(0.0))
    } else {
        (order.total_price, record.crbt)
    };

    let diff = match (shop, invoice) {
        (Some(s), Some(i)) => Some(s - i),
        _ => None,
    };
    let classification = match diff {
        Some(d) if d.abs() < GREEN_DIFF_MAX => Classification::MatchedGreen,
        // An unreadable side is a mismatch until a human looks at it.
        _ => Classification::MatchedRed,
    };

    ReconciledRow {
        record: record.clone(),
        lookup: lookup.cloned(),
        is_refused,
        shop_comparable: shop,
        invoice_comparable: invoice,
        diff,
        classification,
    }
}

/// Invoice-level counters and sums for the summary header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_rows: usize,
    pub matched: usize,
    pub green: usize,
    pub red: usize,
    pub missing: usize,
    /// The batched lookup request itself failed; all `missing` rows stem
    /// from that, not from unknown orders.
    pub lookup_failed: bool,
    pub shop_total_sum: f64,
    pub invoice_crbt_sum: f64,
    pub invoice_net_sum: f64,
    pub declared_brut_delta: Option<f64>,
    pub declared_net_delta: Option<f64>,
}

/// Aggregate the reconciled rows. Sums are restricted to non-refused
/// matched rows; deltas compare them against the documents' own declared
/// brut/net totals.
pub fn summarize(
    rows: &[ReconciledRow],
    documents: &[InvoiceDocument],
    lookup_failed: bool,
) -> Summary {
    let mut summary = Summary {
        total_rows: rows.len(),
        lookup_failed,
        ..Summary::default()
    };

    for row in rows {
        match row.classification {
            Classification::Missing => summary.missing += 1,
            Classification::MatchedGreen => {
                summary.matched += 1;
                summary.green += 1;
            }
            Classification::MatchedRed => {
                summary.matched += 1;
                summary.red += 1;
            }
        }
        if row.classification == Classification::Missing || row.is_refused {
            continue;
        }
        if let Some(lookup) = &row.lookup {
            summary.shop_total_sum += lookup.total_price.unwrap_or(0.0);
        }
        summary.invoice_crbt_sum += row.record.crbt.unwrap_or(0.0);
        summary.invoice_net_sum += net_of(&row.record).unwrap_or(0.0);
    }

    let declared_brut: Option<f64> = sum_declared(documents, |d| d.declared_total_brut);
    let declared_net: Option<f64> = sum_declared(documents, |d| d.declared_total_net);
    summary.declared_brut_delta = declared_brut.map(|d| d - summary.invoice_crbt_sum);
    summary.declared_net_delta = declared_net.map(|d| d - summary.invoice_net_sum);
    summary
}

/// Net owed for one record: the explicit total when resolved, otherwise
/// crbt minus fees (minus packaging).
fn net_of(record: &ShipmentRecord) -> Option<f64> {
    if let Some(total) = record.total {
        return Some(total);
    }
    match (record.crbt, record.fees) {
        (Some(crbt), Some(fees)) => Some(crbt - fees - record.packaging.unwrap_or(0.0)),
        _ => None,
    }
}

fn sum_declared<F>(documents: &[InvoiceDocument], field: F) -> Option<f64>
where
    F: Fn(&InvoiceDocument) -> Option<f64>,
{
    let declared: Vec<f64> = documents.iter().filter_map(&field).collect();
    (!declared.is_empty()).then(|| declared.iter().sum())
}

/// Rows eligible for the mark-paid call: found, with both identifiers
/// present, de-duplicated by gid. Everything else is silently excluded.
pub fn mark_paid_candidates(rows: &[ReconciledRow]) -> Vec<MarkPaidOrder> {
    let mut seen: HashSet<String> = HashSet::new();
    rows.iter()
        .filter(|r| r.classification != Classification::Missing)
        .filter_map(|r| {
            let lookup = r.lookup.as_ref()?;
            let order_gid = lookup.order_gid.clone()?;
            let store = lookup.store.clone()?;
            seen.insert(order_gid.clone()).then_some(MarkPaidOrder {
                order_gid,
                store,
            })
        })
        .collect()
}

/// One parse batch plus its lookup state. Generations implement
/// last-request-wins: a superseding parse discards any in-flight lookup
/// keyed to the previous batch.
#[derive(Default)]
pub struct ReconcileSession {
    generation: u64,
    documents: Vec<InvoiceDocument>,
    lookups: Option<HashMap<String, OrderLookupResult>>,
    lookup_failed: bool,
}

impl ReconcileSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the parsed state wholesale and invalidate pending lookups.
    /// Returns the generation token the eventual lookup must present.
    pub fn begin_parse(&mut self, documents: Vec<InvoiceDocument>) -> u64 {
        self.generation += 1;
        self.documents = documents;
        self.lookups = None;
        self.lookup_failed = false;
        self.generation
    }

    /// De-duplicated order numbers across the whole batch, in row order.
    pub fn order_numbers(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.documents
            .iter()
            .flat_map(|d| d.rows.iter())
            .map(|r| r.row.order_number.clone())
            .filter(|n| !n.is_empty() && seen.insert(n.clone()))
            .collect()
    }

    pub fn apply_lookup(
        &mut self,
        generation: u64,
        lookups: HashMap<String, OrderLookupResult>,
    ) {
        if generation != self.generation {
            warn!(
                stale = generation,
                current = self.generation,
                "Discarding lookup results from a superseded parse"
            );
            return;
        }
        self.lookups = Some(lookups);
        self.lookup_failed = false;
    }

    pub fn mark_lookup_failed(&mut self, generation: u64) {
        if generation != self.generation {
            return;
        }
        self.lookups = None;
        self.lookup_failed = true;
    }

    pub fn reconciled_rows(&self) -> Vec<ReconciledRow> {
        let empty = HashMap::new();
        let lookups = self.lookups.as_ref().unwrap_or(&empty);
        self.documents
            .iter()
            .flat_map(|d| reconcile_rows(&d.rows, lookups))
            .collect()
    }

    pub fn summary(&self) -> Summary {
        summarize(
            &self.reconciled_rows(),
            &self.documents,
            self.lookup_failed,
        )
    }
}
