// src/store.rs

use crate::document::InvoiceDocument;
use rusqlite::{Connection, Result as SqliteResult, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Local persistence for parsed invoice documents, so a reconciliation
/// surface can be re-rendered without re-uploading the source files.
pub struct DocumentStore {
    conn: Connection,
}

impl DocumentStore {
    /// Open (or create) the SQLite store at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                uid TEXT PRIMARY KEY,
                file_name TEXT NOT NULL,
                vendor TEXT NOT NULL,
                invoice_number TEXT,
                parsed_at INTEGER NOT NULL,
                json TEXT NOT NULL
            )",
            [],
        )?;

        info!("Document store initialized");
        Ok(Self { conn })
    }

    /// Deterministic uid for a document: re-parsing the same file for the
    /// same invoice replaces the previous record instead of duplicating it.
    pub fn generate_uid(file_name: &str, invoice_number: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(file_name.as_bytes());
        hasher.update(b"|");
        hasher.update(invoice_number.unwrap_or("").as_bytes());
        let hash = hasher.finalize();
        hash.iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect::<String>()
    }

    /// Insert or replace one parsed document.
    pub fn upsert_document(
        &self,
        doc: &InvoiceDocument,
    ) -> Result<String, Box<dyn std::error::Error>> {
        let uid = Self::generate_uid(&doc.file_name, doc.invoice_number.as_deref());
        let json = serde_json::to_string(doc)?;
        let parsed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        self.conn.execute(
            "INSERT OR REPLACE INTO documents
                (uid, file_name, vendor, invoice_number, parsed_at, json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                uid,
                doc.file_name,
                doc.vendor.tag(),
                doc.invoice_number,
                parsed_at,
                json
            ],
        )?;
        Ok(uid)
    }

    /// All stored documents, most recently parsed first.
    pub fn load_documents(&self) -> Result<Vec<InvoiceDocument>, Box<dyn std::error::Error>> {
        let mut stmt = self
            .conn
            .prepare("SELECT json FROM documents ORDER BY parsed_at DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut documents = Vec::new();
        for json in rows {
            documents.push(serde_json::from_str(&json?)?);
        }
        Ok(documents)
    }

    /// (document count, shipment row count) across the store.
    pub fn counts(&self) -> Result<(i64, usize), Box<dyn std::error::Error>> {
        let docs: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        let rows = self
            .load_documents()?
            .iter()
            .map(|d| d.rows.len())
            .sum();
        Ok((docs, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::VendorFormat;

    fn doc(file_name: &str, invoice_number: Option<&str>) -> InvoiceDocument {
        InvoiceDocument {
            file_name: file_name.to_string(),
            vendor: VendorFormat::Lionex,
            invoice_number: invoice_number.map(str::to_string),
            invoice_date: None,
            declared_total_net: None,
            declared_total_brut: None,
            declared_fees_total: None,
            rows: Vec::new(),
        }
    }

    #[test]
    fn uid_is_stable_and_distinguishes_invoices() {
        let a = DocumentStore::generate_uid("mai.json", Some("F-1"));
        let b = DocumentStore::generate_uid("mai.json", Some("F-1"));
        let c = DocumentStore::generate_uid("mai.json", Some("F-2"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn reparse_replaces_instead_of_duplicating() {
        let store = DocumentStore::new(":memory:").unwrap();
        store.upsert_document(&doc("mai.json", Some("F-1"))).unwrap();
        store.upsert_document(&doc("mai.json", Some("F-1"))).unwrap();
        store.upsert_document(&doc("juin.json", Some("F-2"))).unwrap();

        let (docs, rows) = store.counts().unwrap();
        assert_eq!(docs, 2);
        assert_eq!(rows, 0);
    }

    #[test]
    fn documents_round_trip_through_the_store() {
        let store = DocumentStore::new(":memory:").unwrap();
        store.upsert_document(&doc("mai.json", Some("F-1"))).unwrap();
        let loaded = store.load_documents().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].file_name, "mai.json");
        assert_eq!(loaded[0].vendor, VendorFormat::Lionex);
    }
}
