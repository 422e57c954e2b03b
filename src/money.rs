// src/money.rs
//
// Assigns the ambiguous numeric tokens collected for one row to semantic
// monetary fields. Token order carries no meaning: the tokens come from
// text concatenation, not from a trusted column, and vendors disagree on
// column order. The solver searches for an assignment satisfying the
// accounting identity total = crbt - fees (- packaging) and scores the
// candidates with the heuristics below.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tolerance on the accounting identity. Scanned amounts lose cents.
pub const IDENTITY_EPSILON: f64 = 0.6;

/// Fees are a small surcharge, never the dominant amount of a row.
pub const FEE_PLAUSIBLE_MAX: f64 = 120.0;

/// Score reduction when the fees slot looks like a plausible fee.
pub const SMALL_FEE_BONUS: f64 = 1.5;

/// A negative "fees" slot usually means the slot is actually the net total
/// under a different vendor's column order. Must dominate the bonus.
pub const NEGATIVE_FEE_PENALTY: f64 = 4.0;

/// Weight of the distance from the invoice-wide fee mode.
pub const FEE_MODE_WEIGHT: f64 = 0.02;

/// A collect-on-delivery total exceeding the collected cash is implausible.
pub const TOTAL_EXCEEDS_CRBT_PENALTY: f64 = 1.0;

/// Resolved monetary fields for one shipment row. All-`None` is a valid
/// outcome: the row is still emitted so a human can inspect the raw text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAmounts {
    pub crbt: Option<f64>,
    pub fees: Option<f64>,
    pub packaging: Option<f64>,
    pub total: Option<f64>,
}

/// Most frequent plausible fee value across one document's rows, used to
/// break ties between assignments that satisfy the identity both ways.
/// Scoped to a single document: fee conventions differ per vendor and per
/// invoice run, so modes are never pooled across documents.
pub fn fee_mode<I>(tokens: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut tally: HashMap<i64, usize> = HashMap::new();
    for t in tokens {
        if t > 0.0 && t <= FEE_PLAUSIBLE_MAX {
            *tally.entry((t * 100.0).round() as i64).or_insert(0) += 1;
        }
    }
    tally
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(cents, _)| cents as f64 / 100.0)
}

/// Resolve the monetary tokens of one row. `with_packaging` selects the
/// four-value search used by the vendor that itemizes a packaging fee.
/// Never fails; fewer than two tokens resolve to all-`None`.
pub fn resolve(tokens: &[f64], mode: Option<f64>, with_packaging: bool) -> ResolvedAmounts {
    if tokens.len() < 2 {
        return ResolvedAmounts::default();
    }

    if with_packaging && tokens.len() >= 4 {
        if let Some(resolved) = solve_quadruples(tokens, mode) {
            return resolved;
        }
    }

    if let Some(resolved) = solve_triples(tokens, mode) {
        return resolved;
    }
    if let Some(resolved) = computed_pair(tokens) {
        return resolved;
    }
    last_three(tokens)
}

fn score_fees(fees: f64, mode: Option<f64>) -> f64 {
    let mut score = 0.0;
    if fees < 0.0 {
        score += NEGATIVE_FEE_PENALTY;
    } else if fees <= FEE_PLAUSIBLE_MAX {
        score -= SMALL_FEE_BONUS;
    }
    if let Some(m) = mode {
        score += FEE_MODE_WEIGHT * (fees - m).abs();
    }
    score
}

/// Enumerate ordered triples (crbt, fees, total) of distinct token
/// positions and keep the best-scoring one satisfying the identity.
fn solve_triples(tokens: &[f64], mode: Option<f64>) -> Option<ResolvedAmounts> {
    let n = tokens.len();
    let mut best: Option<(f64, ResolvedAmounts)> = None;

    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                if i == j || i == k || j == k {
                    continue;
                }
                let (crbt, fees, total) = (tokens[i], tokens[j], tokens[k]);
                let err = ((crbt - fees) - total).abs();
                if err > IDENTITY_EPSILON {
                    continue;
                }
                let mut score = err + score_fees(fees, mode);
                if fees >= 0.0 && total > crbt + IDENTITY_EPSILON {
                    score += TOTAL_EXCEEDS_CRBT_PENALTY;
                }
                let candidate = ResolvedAmounts {
                    crbt: Some(crbt),
                    fees: Some(fees),
                    packaging: None,
                    total: Some(total),
                };
                match &best {
                    Some((s, _)) if *s <= score => {}
                    _ => best = Some((score, candidate)),
                }
            }
        }
    }
    best.map(|(_, r)| r)
}

/// Four-value variant: total = crbt - fees - packaging.
fn solve_quadruples(tokens: &[f64], mode: Option<f64>) -> Option<ResolvedAmounts> {
    let n = tokens.len();
    let mut best: Option<(f64, ResolvedAmounts)> = None;

    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                for l in 0..n {
                    if i == j || i == k || i == l || j == k || j == l || k == l {
                        continue;
                    }
                    let (crbt, fees, packaging, total) =
                        (tokens[i], tokens[j], tokens[k], tokens[l]);
                    let err = ((crbt - fees - packaging) - total).abs();
                    if err > IDENTITY_EPSILON {
                        continue;
                    }
                    let mut score = err + score_fees(fees, mode);
                    if packaging < 0.0 {
                        score += NEGATIVE_FEE_PENALTY;
                    } else if packaging <= FEE_PLAUSIBLE_MAX {
                        score -= SMALL_FEE_BONUS;
                    }
                    if fees >= 0.0 && packaging >= 0.0 && total > crbt + IDENTITY_EPSILON {
                        score += TOTAL_EXCEEDS_CRBT_PENALTY;
                    }
                    let candidate = ResolvedAmounts {
                        crbt: Some(crbt),
                        fees: Some(fees),
                        packaging: Some(packaging),
                        total: Some(total),
                    };
                    match &best {
                        Some((s, _)) if *s <= score => {}
                        _ => best = Some((score, candidate)),
                    }
                }
            }
        }
    }
    best.map(|(_, r)| r)
}

/// Fallback when no triple satisfies the identity: pick a plausible fee and
/// read another token as the net total, deriving crbt = total + fees.
/// Prefers non-trivial totals. Best-effort, accuracy unverified against
/// production invoices.
fn computed_pair(tokens: &[f64]) -> Option<ResolvedAmounts> {
    let mut best: Option<(f64, ResolvedAmounts)> = None;
    for (j, &fees) in tokens.iter().enumerate() {
        if !(0.0..=FEE_PLAUSIBLE_MAX).contains(&fees) {
            continue;
        }
        for (k, &total) in tokens.iter().enumerate() {
            if j == k {
                continue;
            }
            let magnitude = total.abs();
            let candidate = ResolvedAmounts {
                crbt: Some(total + fees),
                fees: Some(fees),
                packaging: None,
                total: Some(total),
            };
            match &best {
                Some((m, _)) if *m >= magnitude => {}
                _ => best = Some((magnitude, candidate)),
            }
        }
    }
    best.map(|(_, r)| r)
}

/// Last resort: read the last three tokens in encountered order as
/// (crbt, fees, total). Best-effort, accuracy unverified.
fn last_three(tokens: &[f64]) -> ResolvedAmounts {
    if tokens.len() < 3 {
        return ResolvedAmounts::default();
    }
    let tail = &tokens[tokens.len() - 3..];
    ResolvedAmounts {
        crbt: Some(tail[0]),
        fees: Some(tail[1]),
        packaging: None,
        total: Some(tail[2]),
    }
}

/// Does a resolved row satisfy the identity invariant? Used by tests and
/// by the aggregator's sanity logging, not enforced on fallback output.
pub fn satisfies_identity(r: &ResolvedAmounts) -> bool {
    match (r.crbt, r.fees, r.total) {
        (Some(crbt), Some(fees), Some(total)) => {
            let packaging = r.packaging.unwrap_or(0.0);
            ((crbt - fees - packaging) - total).abs() <= IDENTITY_EPSILON
        }
        _ => false,
    }
}
