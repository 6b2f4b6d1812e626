//! Configuration management module
//!
//! Responsible for loading settings from the environment and the optional pricing override file

pub mod pricing_file;
pub mod settings;

pub use pricing_file::{ModelPriceConfig, PricingFile};
pub use settings::Settings;
