//! Timeline command implementation

use anyhow::Result;

use super::{preview, short_ts, FilterArgs};
use crate::store::Store;

pub fn run(store: &Store, filter: &FilterArgs) -> Result<()> {
    let (page, summary) = store.timeline(&filter.to_query())?;

    if page.rows.is_empty() {
        println!("No events in range.");
        return Ok(());
    }

    for row in &page.rows {
        let tool = row
            .tool_name
            .as_deref()
            .map(|t| format!(" [{}]", t))
            .unwrap_or_default();
        println!(
            "{:<12} {:<18}{} {}",
            short_ts(&row.event_ts),
            row.event_type,
            tool,
            preview(&row.text_redacted, 60),
        );
    }

    println!("\n{} of {} events", page.rows.len(), page.total);

    let mut counts: Vec<_> = summary.counts_by_type.iter().collect();
    counts.sort_by(|a, b| b.1.cmp(a.1));
    let breakdown = counts
        .iter()
        .map(|(t, n)| format!("{} {}", n, t))
        .collect::<Vec<_>>()
        .join(", ");
    println!("By type: {}", breakdown);

    if summary.commit_count > 0 {
        println!(
            "Git: {} commits, +{} -{}",
            summary.commit_count, summary.insertions, summary.deletions
        );
    }

    Ok(())
}
