//! Token usage statistics command
//!
//! Pricing lives here in the CLI layer, not in the core: the aggregator
//! takes the map as input and reports model ids it cannot price.

use anyhow::Result;
use std::collections::HashMap;

use super::FilterArgs;
use crate::store::Store;
use crate::usage::{aggregate, ModelPricing, TokenTotals};

/// USD per million tokens. Edit to match current provider pricing.
fn default_pricing() -> HashMap<String, ModelPricing> {
    let mut map = HashMap::new();
    map.insert(
        "claude-sonnet-4-20250514".to_string(),
        ModelPricing { input: 3.0, output: 15.0, cache_read: 0.3, cache_write: 3.75 },
    );
    map.insert(
        "claude-opus-4-20250514".to_string(),
        ModelPricing { input: 15.0, output: 75.0, cache_read: 1.5, cache_write: 18.75 },
    );
    map.insert(
        "claude-3-5-haiku-20241022".to_string(),
        ModelPricing { input: 0.8, output: 4.0, cache_read: 0.08, cache_write: 1.0 },
    );
    map
}

pub fn run(store: &Store, filter: &FilterArgs, group_by: &str) -> Result<()> {
    let rows = store.token_usage_rows(&filter.to_query())?;
    if rows.is_empty() {
        println!("No token usage recorded in range.");
        return Ok(());
    }

    let stats = aggregate(&rows, &default_pricing());

    println!("Totals:");
    print_totals("", &stats.totals);

    let grouped: Vec<(&String, &TokenTotals)> = match group_by {
        "day" => stats.by_day.iter().collect(),
        "session" => stats.by_session.iter().collect(),
        "model" => stats.by_model.iter().collect(),
        _ => vec![],
    };

    if !grouped.is_empty() {
        println!("\nBy {}:", group_by);
        for (key, totals) in grouped {
            print_totals(key, totals);
        }
    }

    if !stats.unknown_models.is_empty() {
        println!(
            "\nNo pricing for: {} (costs exclude these)",
            stats.unknown_models.join(", ")
        );
    }

    Ok(())
}

fn print_totals(label: &str, totals: &TokenTotals) {
    println!(
        "  {:<28} in {:>10}  out {:>10}  cache-r {:>10}  cache-w {:>9}  ${:.2}",
        label, totals.input, totals.output, totals.cache_read, totals.cache_write, totals.cost_usd
    );
}
