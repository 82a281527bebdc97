use crate::models::Usage;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
}

#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, ModelPrice>,
}

impl PricingTable {
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    pub fn with_price(mut self, model: impl Into<String>, input: f64, output: f64) -> Self {
        self.prices.insert(
            model.into(),
            ModelPrice {
                input_price_per_million: input,
                output_price_per_million: output,
            },
        );
        self
    }

    pub fn price(&self, model: &str) -> Option<ModelPrice> {
        self.prices.get(model).copied()
    }

    pub fn cost(&self, usage: &Usage, model: &str) -> f64 {
        match self.price(model) {
            Some(price) => {
                usage.input_tokens as f64 / 1e6 * price.input_price_per_million
                    + usage.output_tokens as f64 / 1e6 * price.output_price_per_million
            }
            None => 0.0,
        }
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::empty()
            .with_price("gpt-5", 1.25, 10.0)
            .with_price("gpt-5-mini", 0.25, 2.0)
            .with_price("gpt-5-nano", 0.05, 0.40)
            .with_price("gpt-4.1", 2.0, 8.0)
            .with_price("gpt-4.1-mini", 0.40, 1.60)
            .with_price("gpt-4.1-nano", 0.10, 0.40)
            .with_price("gpt-4o", 2.50, 10.0)
            .with_price("gpt-4o-mini", 0.15, 0.60)
    }
}
