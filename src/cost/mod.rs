use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Record of a single completed API call. Append-only; removed only by
/// [`CostTracker::reset`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

/// Tracks API spend across providers: a history of cost entries plus a
/// one-shot warning threshold and an optional hard limit. Aggregates are
/// recomputed from the entry list on demand; there is no cached state.
pub struct CostTracker {
    entries: Vec<CostEntry>,
    warning_threshold: f64,
    hard_limit: Option<f64>,
    warnings_issued: Vec<f64>,
}

impl CostTracker {
    pub fn new(warning_threshold: f64, hard_limit: Option<f64>) -> Self {
        Self {
            entries: Vec::new(),
            warning_threshold,
            hard_limit,
            warnings_issued: Vec::new(),
        }
    }

    /// Append a cost entry and evaluate the warning condition once against
    /// the post-append total.
    pub fn add_cost(
        &mut self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost: f64,
    ) {
        self.entries.push(CostEntry {
            timestamp: Utc::now(),
            provider: provider.to_string(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost,
        });

        let total = self.total_cost();
        if total >= self.warning_threshold && !self.already_warned(self.warning_threshold) {
            warn!(
                "Cost warning: total cost ${:.4} exceeds warning threshold ${:.2}",
                total, self.warning_threshold
            );
            self.warnings_issued.push(self.warning_threshold);
        }
    }

    fn already_warned(&self, threshold: f64) -> bool {
        self.warnings_issued.iter().any(|w| *w == threshold)
    }

    pub fn total_cost(&self) -> f64 {
        self.entries.iter().map(|e| e.cost).sum()
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.entries.iter().map(|e| e.input_tokens).sum()
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.entries.iter().map(|e| e.output_tokens).sum()
    }

    /// True while further calls are permitted. Deliberately strict `<`: a
    /// call that lands exactly on the limit is allowed, the next is blocked.
    pub fn check_hard_limit(&self) -> bool {
        match self.hard_limit {
            Some(limit) => self.total_cost() < limit,
            None => true,
        }
    }

    pub fn cost_by_provider(&self) -> HashMap<String, f64> {
        let mut costs = HashMap::new();
        for entry in &self.entries {
            *costs.entry(entry.provider.clone()).or_insert(0.0) += entry.cost;
        }
        costs
    }

    pub fn cost_by_model(&self) -> HashMap<String, f64> {
        let mut costs = HashMap::new();
        for entry in &self.entries {
            *costs.entry(entry.model.clone()).or_insert(0.0) += entry.cost;
        }
        costs
    }

    pub fn entries(&self) -> &[CostEntry] {
        &self.entries
    }

    pub fn hard_limit(&self) -> Option<f64> {
        self.hard_limit
    }

    pub fn warning_threshold(&self) -> f64 {
        self.warning_threshold
    }

    /// Human-readable session report.
    pub fn format_summary(&self) -> String {
        if self.entries.is_empty() {
            return "No API calls made yet.".to_string();
        }

        let mut lines = vec![
            "=".repeat(50),
            "Cost Summary".to_string(),
            "=".repeat(50),
            format!("Total Cost: ${:.6}", self.total_cost()),
            format!("Total Input Tokens: {}", self.total_input_tokens()),
            format!("Total Output Tokens: {}", self.total_output_tokens()),
            format!("Number of API Calls: {}", self.entries.len()),
            String::new(),
        ];

        let provider_costs = self.cost_by_provider();
        if !provider_costs.is_empty() {
            lines.push("Cost by Provider:".to_string());
            let mut providers: Vec<_> = provider_costs.into_iter().collect();
            providers.sort_by(|a, b| a.0.cmp(&b.0));
            for (provider, cost) in providers {
                lines.push(format!("  {}: ${:.6}", provider, cost));
            }
            lines.push(String::new());
        }

        let model_costs = self.cost_by_model();
        if !model_costs.is_empty() {
            lines.push("Cost by Model:".to_string());
            let mut models: Vec<_> = model_costs.into_iter().collect();
            models.sort_by(|a, b| a.0.cmp(&b.0));
            for (model, cost) in models {
                lines.push(format!("  {}: ${:.6}", model, cost));
            }
            lines.push(String::new());
        }

        match self.hard_limit {
            Some(limit) => {
                lines.push(format!("Hard Limit: ${:.2}", limit));
                lines.push(format!("Remaining: ${:.6}", limit - self.total_cost()));
            }
            None => lines.push("Hard Limit: Not set".to_string()),
        }

        lines.push("=".repeat(50));
        lines.join("\n")
    }

    /// Clear all entries and re-arm the warning. Idempotent.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.warnings_issued.clear();
        info!("Cost tracker reset");
    }
}
