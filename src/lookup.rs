// src/lookup.rs
//
// Clients for the two external order services. The directory is a trait
// so reconciliation can be exercised against an in-memory double; the
// HTTP implementation follows the shop gateway's JSON contract.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

pub type LookupError = Box<dyn std::error::Error + Send + Sync>;

/// What the shop knows about one order number. `found: false` entries are
/// normal: invoices regularly reference orders from another store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLookupResult {
    pub found: bool,
    pub store: Option<String>,
    pub order_gid: Option<String>,
    pub total_price: Option<f64>,
    pub financial_status: Option<String>,
}

/// One order to flag paid. Only rows with a resolved gid and store ever
/// become one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPaidOrder {
    pub order_gid: String,
    pub store: String,
}

#[async_trait]
pub trait OrderDirectory {
    /// Batched lookup for a de-duplicated list of order numbers. A number
    /// with no match comes back as `found: false`; only transport-level
    /// failures error.
    async fn lookup(
        &self,
        order_numbers: &[String],
    ) -> Result<HashMap<String, OrderLookupResult>, LookupError>;

    /// Flag orders as paid. Idempotent per order on the service side;
    /// returns the count actually updated, which may be lower than
    /// requested without that being a hard error.
    async fn mark_paid(&self, orders: &[MarkPaidOrder]) -> Result<usize, LookupError>;
}

#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    order_numbers: &'a [String],
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    orders: HashMap<String, OrderLookupResult>,
}

#[derive(Debug, Serialize)]
struct MarkPaidRequest<'a> {
    orders: &'a [MarkPaidOrder],
}

#[derive(Debug, Deserialize)]
struct MarkPaidResponse {
    updated: usize,
}

pub struct HttpOrderDirectory {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpOrderDirectory {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl OrderDirectory for HttpOrderDirectory {
    async fn lookup(
        &self,
        order_numbers: &[String],
    ) -> Result<HashMap<String, OrderLookupResult>, LookupError> {
        let url = format!("{}/orders/lookup", self.base_url);
        info!(count = order_numbers.len(), url = %url, "Order lookup request");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&LookupRequest { order_numbers })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Order lookup error {status}: {body}").into());
        }

        let parsed: LookupResponse = response.json().await?;
        let found = parsed.orders.values().filter(|o| o.found).count();
        info!(
            requested = order_numbers.len(),
            returned = parsed.orders.len(),
            found,
            "Order lookup response"
        );
        Ok(parsed.orders)
    }

    async fn mark_paid(&self, orders: &[MarkPaidOrder]) -> Result<usize, LookupError> {
        if orders.is_empty() {
            return Ok(0);
        }
        let url = format!("{}/orders/mark-paid", self.base_url);
        info!(count = orders.len(), url = %url, "Mark-paid request");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&MarkPaidRequest { orders })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Mark-paid error {status}: {body}").into());
        }

        let parsed: MarkPaidResponse = response.json().await?;
        if parsed.updated < orders.len() {
            warn!(
                updated = parsed.updated,
                requested = orders.len(),
                "Mark-paid updated fewer orders than requested"
            );
        }
        Ok(parsed.updated)
    }
}

/// In-memory directory used by tests and offline runs.
#[derive(Default)]
pub struct StaticOrderDirectory {
    pub orders: HashMap<String, OrderLookupResult>,
}

#[async_trait]
impl OrderDirectory for StaticOrderDirectory {
    async fn lookup(
        &self,
        order_numbers: &[String],
    ) -> Result<HashMap<String, OrderLookupResult>, LookupError> {
        Ok(order_numbers
            .iter()
            .filter_map(|n| self.orders.get(n).map(|o| (n.clone(), o.clone())))
            .collect())
    }

    async fn mark_paid(&self, orders: &[MarkPaidOrder]) -> Result<usize, LookupError> {
        Ok(orders.len())
    }
}
