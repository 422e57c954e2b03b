use serde::Deserialize;
use std::{fs, path::Path};

#[derive(Deserialize)]
pub struct Config {
    pub lookup: LookupSection,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Default vendor format tag when the invocation does not name one.
    #[serde(default = "default_vendor")]
    pub vendor: String,
}

fn default_db_path() -> String {
    "docstore/invoices.db".to_string()
}

fn default_vendor() -> String {
    "lionex".to_string()
}

#[derive(Deserialize)]
pub struct LookupSection {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Mark-paid is a write call; off unless explicitly enabled.
    #[serde(default)]
    pub mark_paid_enabled: bool,
}

fn default_timeout_secs() -> u64 {
    15
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [lookup]
            base_url = "http://localhost:8080"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.db_path, "docstore/invoices.db");
        assert_eq!(cfg.vendor, "lionex");
        assert_eq!(cfg.lookup.timeout_secs, 15);
        assert!(!cfg.lookup.mark_paid_enabled);
    }
}
