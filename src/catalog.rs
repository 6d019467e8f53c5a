//! The model catalog: the static list of selectable completion models
//! with pricing metadata.
//!
//! Loaded once from configuration at startup and never mutated afterwards.
//! Prices are USD per million tokens.

use serde::{Deserialize, Serialize};

/// A single selectable model with its pricing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Unique catalog key, also the wire model identifier.
    pub key: String,
    /// Name shown to users in keyboards and confirmations.
    pub display_name: String,
    /// USD per 1M prompt tokens.
    pub input_price: f64,
    /// USD per 1M completion tokens.
    pub output_price: f64,
}

/// Immutable, process-wide catalog of selectable models.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelSpec>,
}

impl ModelCatalog {
    /// Build a catalog from its entries, preserving order.
    pub fn new(models: Vec<ModelSpec>) -> Self {
        Self { models }
    }

    /// Look up a model by its catalog key.
    pub fn get(&self, key: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.key == key)
    }

    /// Whether `key` names a catalog entry.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// All entries, in catalog order.
    pub fn entries(&self) -> &[ModelSpec] {
        &self.models
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }
}

/// The catalog shipped when the config file doesn't override it.
///
/// Mirrors the published OpenAI pricing at the time of writing.
pub fn default_models() -> Vec<ModelSpec> {
    fn spec(key: &str, input_price: f64, output_price: f64) -> ModelSpec {
        ModelSpec {
            key: key.to_string(),
            display_name: key.to_string(),
            input_price,
            output_price,
        }
    }

    vec![
        spec("gpt-4.1", 2.00, 8.00),
        spec("gpt-4.1-mini", 0.40, 1.60),
        spec("gpt-4.1-nano", 0.10, 0.40),
        spec("gpt-4o", 2.50, 10.00),
        spec("gpt-4o-mini", 0.15, 0.60),
        spec("o4-mini", 1.10, 4.40),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_contains_default_model() {
        let catalog = ModelCatalog::new(default_models());
        assert!(catalog.contains("gpt-4.1-nano"));
        assert_eq!(catalog.len(), 6);
    }

    #[test]
    fn get_returns_pricing() {
        let catalog = ModelCatalog::new(default_models());
        let model = catalog.get("gpt-4.1").unwrap();
        assert!((model.input_price - 2.00).abs() < f64::EPSILON);
        assert!((model.output_price - 8.00).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_key_is_absent() {
        let catalog = ModelCatalog::new(default_models());
        assert!(catalog.get("gpt-imaginary").is_none());
        assert!(!catalog.contains(""));
    }

    #[test]
    fn entries_preserve_order() {
        let catalog = ModelCatalog::new(default_models());
        assert_eq!(catalog.entries()[0].key, "gpt-4.1");
        assert_eq!(catalog.entries()[5].key, "o4-mini");
    }
}
