//! Search command implementation

use anyhow::Result;

use super::{preview, short_ts, FilterArgs};
use crate::store::Store;

pub fn run(store: &Store, query: &str, filter: &FilterArgs) -> Result<()> {
    let page = store.search(query, &filter.to_query())?;

    if page.rows.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    println!(
        "{:<12} {:<18} {:<8} {}",
        "Timestamp", "Type", "Score", "Text"
    );
    println!("{}", "-".repeat(90));

    for row in &page.rows {
        println!(
            "{:<12} {:<18} {:<8.2} {}",
            short_ts(&row.event_ts),
            row.event_type,
            row.score.unwrap_or(0.0),
            preview(&row.text_redacted, 55),
        );
    }

    let shown_through = filter.offset + page.rows.len();
    println!(
        "\n{} of {} results (offset {})",
        page.rows.len(),
        page.total,
        filter.offset
    );
    if (shown_through as u64) < page.total {
        println!("Next page: --offset {}", shown_through);
    }

    Ok(())
}
