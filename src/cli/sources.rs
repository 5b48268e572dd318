//! Source management commands

use anyhow::Result;

use super::short_ts;
use crate::adapter::SourceKind;
use crate::store::{SourceOptions, Store};

pub fn list(store: &Store) -> Result<()> {
    let sources = store.list_sources(None)?;

    if sources.is_empty() {
        println!("No sources registered. Run 'recall ingest' first.");
        return Ok(());
    }

    println!(
        "{:<22} {:<18} {:<8} {:<12} {}",
        "ID", "Kind", "Status", "Last seen", "Locator"
    );
    println!("{}", "-".repeat(100));

    for source in sources {
        let last_seen = source
            .last_seen_at
            .as_deref()
            .map(short_ts)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<22} {:<18} {:<8} {:<12} {}",
            source.source_id,
            source.kind.as_str(),
            source.status.as_str(),
            last_seen,
            source.locator,
        );
        if let Some(error) = &source.error_message {
            println!("{:<22} error: {}", "", error);
        }
    }

    Ok(())
}

pub fn add(
    store: &Store,
    device_id: &str,
    kind: &str,
    locator: &str,
    no_redact: bool,
) -> Result<()> {
    let kind = SourceKind::parse(kind)
        .ok_or_else(|| anyhow::anyhow!("Unknown source kind: {}", kind))?;
    let source = store.register_source(
        kind,
        locator,
        device_id,
        SourceOptions {
            redact_secrets: !no_redact,
            ..Default::default()
        },
    )?;
    println!("Registered {} ({})", source.source_id, source.kind.as_str());
    Ok(())
}

pub fn remove(store: &Store, source_id: &str, purge: bool) -> Result<()> {
    let Some(source) = store.get_source(source_id)? else {
        println!("Source '{}' not found.", source_id);
        return Ok(());
    };

    // retain_on_delete keeps events unless the caller forces a purge.
    let purge_events = purge && !source.retain_on_delete;
    store.delete_source(source_id, purge_events)?;

    if purge_events {
        println!("Removed {} and its events.", source_id);
    } else {
        println!("Removed {} (events kept).", source_id);
    }
    Ok(())
}
