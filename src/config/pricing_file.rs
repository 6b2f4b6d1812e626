//! File-based pricing overrides
//!
//! Loads per-model prices from a JSON file that extends or replaces the built-in table

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Prices in USD per million tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPriceConfig {
    pub input: Decimal,
    pub output: Decimal,
    #[serde(rename = "cacheRead", default)]
    pub cache_read: Decimal,
    #[serde(rename = "cacheWrite", default)]
    pub cache_write: Decimal,
}

/// Pricing override file contents
///
/// Keys are exact model identifiers or prefixes such as `claude-sonnet-4-5`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingFile {
    #[serde(default)]
    pub models: BTreeMap<String, ModelPriceConfig>,
}

impl PricingFile {
    /// Load pricing overrides from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading pricing overrides from: {:?}", path);

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pricing file: {:?}", path))?;

        let file: PricingFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse pricing JSON: {:?}", path))?;

        file.validate()?;

        debug!("Loaded {} pricing overrides", file.models.len());
        Ok(file)
    }

    /// Load overrides from the explicit path, else from the default location
    ///
    /// Searches in order:
    /// 1. `explicit` (from `TOKENWATCH_PRICING_PATH`), which must exist
    /// 2. ~/.config/tokenwatch/pricing.json
    ///
    /// Returns `None` when no override file is configured or present.
    pub fn load_optional(explicit: Option<&Path>) -> Result<Option<Self>> {
        if let Some(path) = explicit {
            return Self::load(path).map(Some);
        }

        match default_path() {
            Some(path) if path.exists() => Self::load(&path).map(Some),
            _ => Ok(None),
        }
    }

    /// Validate pricing entries
    fn validate(&self) -> Result<()> {
        for (model, price) in &self.models {
            if model.trim().is_empty() {
                anyhow::bail!("Pricing entry with empty model identifier");
            }

            let prices = [price.input, price.output, price.cache_read, price.cache_write];
            if prices.iter().any(|p| p.is_sign_negative() && !p.is_zero()) {
                anyhow::bail!("Negative price configured for model '{}'", model);
            }
        }

        Ok(())
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("tokenwatch").join("pricing.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::str::FromStr;
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_pricing_file() {
        let file = write_file(
            r#"{
                "models": {
                    "my-local-model": { "input": 0.5, "output": "1.25" },
                    "claude-sonnet-4-5": { "input": 3, "output": 15, "cacheRead": 0.3, "cacheWrite": 3.75 }
                }
            }"#,
        );

        let pricing = PricingFile::load(file.path()).unwrap();
        assert_eq!(pricing.models.len(), 2);

        let local = &pricing.models["my-local-model"];
        assert_eq!(local.output, Decimal::from_str("1.25").unwrap());
        assert!(local.cache_read.is_zero());

        let sonnet = &pricing.models["claude-sonnet-4-5"];
        assert_eq!(sonnet.cache_write, Decimal::from_str("3.75").unwrap());
    }

    #[test]
    fn test_rejects_negative_price() {
        let file = write_file(r#"{"models": {"m": {"input": -1, "output": 1}}}"#);
        assert!(PricingFile::load(file.path()).is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        let file = write_file("{ not json");
        assert!(PricingFile::load(file.path()).is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let missing = Path::new("/definitely/not/here/pricing.json");
        assert!(PricingFile::load_optional(Some(missing)).is_err());
    }
}
