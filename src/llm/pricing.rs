use once_cell::sync::Lazy;
use std::collections::HashMap;

use super::ProviderKind;

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

static OPENAI_PRICING: Lazy<HashMap<&'static str, ModelPricing>> = Lazy::new(|| {
    HashMap::from([
        (
            "gpt-4o-mini",
            ModelPricing {
                input_per_mtok: 0.150,
                output_per_mtok: 0.600,
            },
        ),
        (
            "gpt-4o",
            ModelPricing {
                input_per_mtok: 2.50,
                output_per_mtok: 10.00,
            },
        ),
        (
            "gpt-4-turbo",
            ModelPricing {
                input_per_mtok: 10.00,
                output_per_mtok: 30.00,
            },
        ),
    ])
});

static ANTHROPIC_PRICING: Lazy<HashMap<&'static str, ModelPricing>> = Lazy::new(|| {
    HashMap::from([
        (
            "claude-3-5-haiku-20241022",
            ModelPricing {
                input_per_mtok: 0.80,
                output_per_mtok: 4.00,
            },
        ),
        (
            "claude-3-5-sonnet-20241022",
            ModelPricing {
                input_per_mtok: 3.00,
                output_per_mtok: 15.00,
            },
        ),
        (
            "claude-3-opus-20240229",
            ModelPricing {
                input_per_mtok: 15.00,
                output_per_mtok: 75.00,
            },
        ),
    ])
});

// Unknown models fall back to the cheapest listed model of the provider.
const OPENAI_DEFAULT: ModelPricing = ModelPricing {
    input_per_mtok: 0.150,
    output_per_mtok: 0.600,
};
const ANTHROPIC_DEFAULT: ModelPricing = ModelPricing {
    input_per_mtok: 0.80,
    output_per_mtok: 4.00,
};

pub fn pricing_for(kind: ProviderKind, model: &str) -> ModelPricing {
    match kind {
        ProviderKind::OpenAI => OPENAI_PRICING.get(model).copied().unwrap_or(OPENAI_DEFAULT),
        ProviderKind::Anthropic => ANTHROPIC_PRICING
            .get(model)
            .copied()
            .unwrap_or(ANTHROPIC_DEFAULT),
    }
}

/// Pure cost formula: tokens are billed per million at the model's rates.
pub fn estimate_cost(kind: ProviderKind, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let pricing = pricing_for(kind, model);
    (input_tokens as f64 / 1_000_000.0) * pricing.input_per_mtok
        + (output_tokens as f64 / 1_000_000.0) * pricing.output_per_mtok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_use_listed_prices() {
        let gpt4o = pricing_for(ProviderKind::OpenAI, "gpt-4o");
        assert_eq!(gpt4o.input_per_mtok, 2.50);
        assert_eq!(gpt4o.output_per_mtok, 10.00);

        let haiku = pricing_for(ProviderKind::Anthropic, "claude-3-5-haiku-20241022");
        assert_eq!(haiku.input_per_mtok, 0.80);
        assert_eq!(haiku.output_per_mtok, 4.00);
    }

    #[test]
    fn unknown_models_fall_back_per_provider() {
        assert_eq!(
            pricing_for(ProviderKind::OpenAI, "gpt-99-experimental"),
            OPENAI_DEFAULT
        );
        assert_eq!(
            pricing_for(ProviderKind::Anthropic, "claude-99"),
            ANTHROPIC_DEFAULT
        );
    }

    #[test]
    fn cost_formula_is_per_million_tokens() {
        // 1M input + 1M output of gpt-4o-mini: 0.150 + 0.600.
        let cost = estimate_cost(ProviderKind::OpenAI, "gpt-4o-mini", 1_000_000, 1_000_000);
        assert!((cost - 0.750).abs() < 1e-9);
    }

    #[test]
    fn cost_of_small_calls_is_tiny_but_positive() {
        let cost = estimate_cost(ProviderKind::Anthropic, "claude-3-5-haiku-20241022", 100, 50);
        let expected = (100.0 / 1_000_000.0) * 0.80 + (50.0 / 1_000_000.0) * 4.00;
        assert!((cost - expected).abs() < 1e-12);
        assert!(cost > 0.0);
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        assert_eq!(estimate_cost(ProviderKind::OpenAI, "gpt-4o", 0, 0), 0.0);
    }
}
