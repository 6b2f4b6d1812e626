//! Cost calculator
//!
//! Static per-model pricing resolved by exact match, then longest prefix.
//! Costs use fixed-point decimals rounded to six places.

use crate::config::{ModelPriceConfig, PricingFile};
use crate::models::TokenUsage;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

/// Decimal places kept in a stored cost
pub const COST_PRECISION: u32 = 6;

const TOKENS_PER_PRICE_UNIT: i64 = 1_000_000;

/// Prices for one model identifier or prefix, in USD per million tokens
#[derive(Debug, Clone, PartialEq)]
pub struct PricingEntry {
    pub pattern: String,
    pub input_per_million: Decimal,
    pub output_per_million: Decimal,
    pub cache_read_per_million: Decimal,
    pub cache_write_per_million: Decimal,
}

impl PricingEntry {
    pub fn new(pattern: impl Into<String>, input: Decimal, output: Decimal, cache_read: Decimal, cache_write: Decimal) -> Self {
        Self {
            pattern: pattern.into(),
            input_per_million: input,
            output_per_million: output,
            cache_read_per_million: cache_read,
            cache_write_per_million: cache_write,
        }
    }

    fn from_config(pattern: &str, config: &ModelPriceConfig) -> Self {
        Self::new(pattern, config.input, config.output, config.cache_read, config.cache_write)
    }

    /// Cost of `usage` at this entry's prices
    pub fn cost(&self, usage: &TokenUsage) -> Decimal {
        let scaled = Decimal::from(usage.input_tokens) * self.input_per_million
            + Decimal::from(usage.output_tokens) * self.output_per_million
            + Decimal::from(usage.cache_read_tokens) * self.cache_read_per_million
            + Decimal::from(usage.cache_write_tokens) * self.cache_write_per_million;

        (scaled / Decimal::from(TOKENS_PER_PRICE_UNIT))
            .round_dp(COST_PRECISION)
            .normalize()
    }
}

/// Result of a pricing lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelPrice<'a> {
    Priced(&'a PricingEntry),
    /// Sentinel for identifiers without pricing; never reported as zero cost
    Unknown,
}

impl<'a> ModelPrice<'a> {
    pub fn cost(&self, usage: &TokenUsage) -> Option<Decimal> {
        match self {
            ModelPrice::Priced(entry) => Some(entry.cost(usage)),
            ModelPrice::Unknown => None,
        }
    }
}

/// Read-only pricing table shared by every request
#[derive(Debug, Clone)]
pub struct PricingTable {
    entries: BTreeMap<String, PricingEntry>,
}

/// Price in USD per million tokens, given in hundredths of a cent
fn usd(ten_thousandths: i64) -> Decimal {
    Decimal::new(ten_thousandths, 4)
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PricingTable {
    /// Built-in prices for the models the proxy commonly sees
    pub fn builtin() -> Self {
        let entries = vec![
            // Anthropic
            PricingEntry::new("claude-opus-4-6", usd(150_000), usd(750_000), usd(15_000), usd(187_500)),
            PricingEntry::new("claude-opus-4-5", usd(50_000), usd(250_000), usd(5_000), usd(62_500)),
            PricingEntry::new("claude-opus-4-1", usd(150_000), usd(750_000), usd(15_000), usd(187_500)),
            PricingEntry::new("claude-opus-4", usd(150_000), usd(750_000), usd(15_000), usd(187_500)),
            PricingEntry::new("claude-sonnet-4-5", usd(30_000), usd(150_000), usd(3_000), usd(37_500)),
            PricingEntry::new("claude-sonnet-4", usd(30_000), usd(150_000), usd(3_000), usd(37_500)),
            PricingEntry::new("claude-3-7-sonnet", usd(30_000), usd(150_000), usd(3_000), usd(37_500)),
            PricingEntry::new("claude-haiku-4-5", usd(8_000), usd(40_000), usd(800), usd(10_000)),
            PricingEntry::new("claude-3-5-haiku", usd(8_000), usd(40_000), usd(800), usd(10_000)),
            // OpenAI
            PricingEntry::new("gpt-4o", usd(25_000), usd(100_000), usd(12_500), Decimal::ZERO),
            PricingEntry::new("gpt-4o-mini", usd(1_500), usd(6_000), usd(750), Decimal::ZERO),
            // Z.AI / GLM
            PricingEntry::new("glm-4.7", usd(6_000), usd(6_000), usd(6_000), Decimal::ZERO),
            PricingEntry::new("glm-4.7-flash", usd(600), usd(600), usd(600), Decimal::ZERO),
        ];

        Self::from_entries(entries)
    }

    pub fn from_entries(entries: impl IntoIterator<Item = PricingEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.pattern.clone(), entry))
            .collect();
        Self { entries }
    }

    /// Built-in table with file overrides applied on top
    pub fn with_overrides(mut self, overrides: &PricingFile) -> Self {
        for (pattern, config) in &overrides.models {
            debug!("Pricing override for {}", pattern);
            self.entries
                .insert(pattern.clone(), PricingEntry::from_config(pattern, config));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a model identifier: exact match, then longest prefix, then unknown
    pub fn lookup(&self, model: &str) -> ModelPrice<'_> {
        if model.is_empty() {
            return ModelPrice::Unknown;
        }

        if let Some(entry) = self.entries.get(model) {
            return ModelPrice::Priced(entry);
        }

        self.entries
            .values()
            .filter(|entry| model.starts_with(entry.pattern.as_str()))
            .max_by_key(|entry| entry.pattern.len())
            .map(ModelPrice::Priced)
            .unwrap_or(ModelPrice::Unknown)
    }

    /// Cost of `usage` for `model`; `None` when the model is not priced
    pub fn cost(&self, model: &str, usage: &TokenUsage) -> Option<Decimal> {
        self.lookup(model).cost(usage)
    }
}
