mod assembler;
mod columns;
mod config;
mod document;
mod layout;
mod lookup;
mod money;
mod reconcile;
mod store;

use assembler::VendorFormat;
use layout::Page;
use lookup::{HttpOrderDirectory, OrderDirectory};
use reconcile::{Classification, ReconcileSession, ReconciledRow, Summary};
use store::DocumentStore;
use tracing::{info, info_span, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter("info")
        .init();

    let cfg = config::Config::load(".config/colis.toml")?;

    let mut args = std::env::args().skip(1).peekable();
    let vendor_tag = match args.peek() {
        Some(tag) if VendorFormat::from_tag(tag).is_some() => args.next().unwrap(),
        _ => cfg.vendor.clone(),
    };
    let vendor = VendorFormat::from_tag(&vendor_tag)
        .ok_or_else(|| format!("Unknown vendor format: {vendor_tag}"))?;
    let files: Vec<String> = args.collect();
    if files.is_empty() {
        return Err("Usage: colis-reconcile [vendor] <fragments.json>...".into());
    }

    if let Some(parent) = std::path::Path::new(&cfg.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = DocumentStore::new(&cfg.db_path)?;

    // Parse every document in the batch sequentially; documents share no
    // mutable state beyond the session they end up in.
    let mut documents = Vec::new();
    for path in &files {
        let span = info_span!("parse", file = %path);
        let _guard = span.enter();

        let pages: Vec<Page> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let doc = document::parse_document(path, &pages, vendor);
        let uid = db.upsert_document(&doc)?;
        info!(uid = %uid, rows = doc.rows.len(), "Stored parsed document");
        documents.push(doc);
    }

    let mut session = ReconcileSession::new();
    let generation = session.begin_parse(documents);

    // One batched lookup for the whole parse, never one per row.
    let directory = HttpOrderDirectory::new(&cfg.lookup.base_url, cfg.lookup.timeout_secs);
    let numbers = session.order_numbers();
    match directory.lookup(&numbers).await {
        Ok(lookups) => session.apply_lookup(generation, lookups),
        Err(e) => {
            warn!(error = %e, "Order lookup failed, rows will render as missing");
            session.mark_lookup_failed(generation);
        }
    }

    let rows = session.reconciled_rows();
    let summary = session.summary();
    render(&rows, &summary);

    if cfg.lookup.mark_paid_enabled {
        let candidates = reconcile::mark_paid_candidates(&rows);
        if candidates.is_empty() {
            info!("No rows eligible for mark-paid");
        } else {
            match directory.mark_paid(&candidates).await {
                Ok(updated) => {
                    info!(updated, requested = candidates.len(), "Mark-paid complete")
                }
                Err(e) => warn!(error = %e, "Mark-paid request failed"),
            }
        }
    }

    let (doc_count, row_count) = db.counts()?;
    info!(
        documents_stored = doc_count,
        rows_stored = row_count,
        "Store statistics"
    );

    Ok(())
}

fn render(rows: &[ReconciledRow], summary: &Summary) {
    println!(
        "{:<14} {:<10} {:<14} {:<8} {:>10} {:>10} {:>8}  {}",
        "code", "order", "city", "status", "invoice", "shop", "diff", "class"
    );
    for row in rows {
        let class = match row.classification {
            Classification::MatchedGreen => "green",
            Classification::MatchedRed => "RED",
            Classification::Missing => "missing",
        };
        println!(
            "{:<14} {:<10} {:<14} {:<8} {:>10} {:>10} {:>8}  {}",
            row.record.row.send_code,
            row.record.row.order_number,
            row.record.row.city.as_deref().unwrap_or("-"),
            row.record.row.status.as_deref().unwrap_or("-"),
            fmt_amount(row.invoice_comparable),
            fmt_amount(row.shop_comparable),
            fmt_amount(row.diff),
            class
        );
    }

    println!();
    println!(
        "rows: {}  matched: {}  green: {}  red: {}  missing: {}",
        summary.total_rows, summary.matched, summary.green, summary.red, summary.missing
    );
    if summary.lookup_failed {
        println!("NOTE: order lookup request failed; missing rows reflect that, not unknown orders");
    }
    println!(
        "shop total: {:.2}  invoice crbt: {:.2}  invoice net: {:.2}",
        summary.shop_total_sum, summary.invoice_crbt_sum, summary.invoice_net_sum
    );
    if let Some(delta) = summary.declared_brut_delta {
        println!("declared brut delta: {delta:.2}");
    }
    if let Some(delta) = summary.declared_net_delta {
        println!("declared net delta: {delta:.2}");
    }
}

fn fmt_amount(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".to_string())
}
