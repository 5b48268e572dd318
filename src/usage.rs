//! Token-usage aggregation
//!
//! Rolls up model-reported token counters recorded on events. Sources
//! that group events by message carry the same counters on several rows;
//! each `(source_id, message_id)` pair is summed at most once. Pricing is
//! caller-supplied; unknown model ids are surfaced, never defaulted.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::store::TokenRow;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenTotals {
    pub input: i64,
    pub output: i64,
    pub cache_read: i64,
    pub cache_write: i64,
    pub cost_usd: f64,
}

impl TokenTotals {
    fn add(&mut self, row: &TokenRow, cost: f64) {
        self.input += row.input;
        self.output += row.output;
        self.cache_read += row.cache_read;
        self.cache_write += row.cache_write;
        self.cost_usd += cost;
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenStats {
    pub totals: TokenTotals,
    pub by_day: BTreeMap<String, TokenTotals>,
    pub by_session: BTreeMap<String, TokenTotals>,
    pub by_model: BTreeMap<String, TokenTotals>,
    /// Model ids with counted tokens but no pricing entry.
    pub unknown_models: Vec<String>,
}

/// Aggregate token rows with at-most-once attribution per message.
pub fn aggregate(rows: &[TokenRow], pricing: &HashMap<String, ModelPricing>) -> TokenStats {
    let mut stats = TokenStats::default();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for row in rows {
        if let Some(message_id) = &row.message_id {
            let key = (row.source_id.clone(), message_id.clone());
            if !seen.insert(key) {
                continue;
            }
        }

        let cost = match row.model.as_deref().and_then(|m| pricing.get(m)) {
            Some(p) => {
                (row.input as f64 * p.input
                    + row.output as f64 * p.output
                    + row.cache_read as f64 * p.cache_read
                    + row.cache_write as f64 * p.cache_write)
                    / 1_000_000.0
            }
            None => {
                if let Some(model) = &row.model {
                    if !stats.unknown_models.contains(model) {
                        stats.unknown_models.push(model.clone());
                    }
                }
                0.0
            }
        };

        stats.totals.add(row, cost);

        let day = row.event_ts.chars().take(10).collect::<String>();
        stats.by_day.entry(day).or_default().add(row, cost);

        if let Some(session) = &row.session_id {
            stats
                .by_session
                .entry(session.clone())
                .or_default()
                .add(row, cost);
        }
        if let Some(model) = &row.model {
            stats
                .by_model
                .entry(model.clone())
                .or_default()
                .add(row, cost);
        }
    }

    stats
}
