//! Static per-model pricing.
//!
//! Prices are USD per 1K tokens as `(input, output)`. Models missing from the
//! table cost zero, so local or uninstrumented models never block a response.

use crate::types::Usage;

const PRICES_PER_1K: &[(&str, f64, f64)] = &[
    // OpenAI
    ("gpt-4", 0.03, 0.06),
    ("gpt-4-turbo", 0.01, 0.03),
    ("gpt-4o", 0.005, 0.015),
    ("gpt-4o-mini", 0.00015, 0.0006),
    ("gpt-3.5-turbo", 0.0005, 0.0015),
    ("text-embedding-ada-002", 0.0001, 0.0),
    ("text-embedding-3-small", 0.00002, 0.0),
    ("text-embedding-3-large", 0.00013, 0.0),
    // Anthropic
    ("claude-3-opus-20240229", 0.015, 0.075),
    ("claude-3-sonnet-20240229", 0.003, 0.015),
    ("claude-3-haiku-20240307", 0.00025, 0.00125),
    ("claude-sonnet-4-20250514", 0.003, 0.015),
    ("claude-opus-4-20250514", 0.015, 0.075),
];

/// Input/output price per 1K tokens for `model`, if known.
pub fn price_per_1k(model: &str) -> Option<(f64, f64)> {
    PRICES_PER_1K
        .iter()
        .find(|(name, _, _)| *name == model)
        .map(|(_, input, output)| (*input, *output))
}

/// Estimated cost in USD of `input_tokens` prompt and `output_tokens` completion tokens.
pub fn estimate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    match price_per_1k(model) {
        Some((input, output)) => {
            f64::from(input_tokens) / 1000.0 * input + f64::from(output_tokens) / 1000.0 * output
        }
        None => 0.0,
    }
}

/// Estimated cost of a chat completion's usage.
pub fn estimate_usage_cost(model: &str, usage: &Usage) -> f64 {
    estimate_cost(model, usage.input_tokens, usage.output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_sums_both_categories() {
        let cost = estimate_cost("gpt-4", 1000, 500);
        assert!((cost - (0.03 + 0.03)).abs() < 1e-12);
    }

    #[test]
    fn unknown_model_is_free() {
        assert_eq!(estimate_cost("llama3", 10_000, 10_000), 0.0);
        assert!(price_per_1k("llama3").is_none());
    }

    #[test]
    fn embedding_models_have_no_output_price() {
        let cost = estimate_usage_cost("text-embedding-3-small", &Usage::new(2000, 0));
        assert!((cost - 0.00004).abs() < 1e-12);
    }
}
