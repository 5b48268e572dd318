//! File history and reconstruction commands

use anyhow::Result;
use chrono::Utc;

use super::{preview, short_ts};
use crate::reconstruct::{reconstruct, ReconstructError, Strategy};
use crate::store::{EditFilter, Store};
use crate::timeparse::parse_to_utc_string;

pub fn history(store: &Store, file_path: &str, limit: usize) -> Result<()> {
    let snapshots = store.get_file_history(file_path, None, None, limit)?;
    let edits = store.get_edits(&EditFilter {
        file_path: Some(file_path.to_string()),
        limit,
        ..Default::default()
    })?;

    if snapshots.is_empty() && edits.is_empty() {
        println!("No recorded activity for {}", file_path);
        return Ok(());
    }

    if !snapshots.is_empty() {
        println!("Snapshots:");
        for row in &snapshots {
            println!(
                "  {:<12} {:<8} {} bytes",
                short_ts(&row.event_ts),
                row.tool_name.as_deref().unwrap_or("-"),
                row.text_redacted.len(),
            );
        }
    }

    if !edits.is_empty() {
        println!("Edits:");
        for edit in &edits {
            println!(
                "  {:<12} -{} +{}  {}",
                short_ts(&edit.event_ts),
                edit.old_string.len(),
                edit.new_string.len(),
                preview(&edit.new_string, 40),
            );
        }
    }

    Ok(())
}

pub fn show(
    store: &Store,
    file_path: &str,
    at: Option<&str>,
    session: Option<&str>,
) -> Result<()> {
    let at_time = at.and_then(|s| parse_to_utc_string(s, Utc::now()));

    match reconstruct(store, file_path, at_time.as_deref(), session) {
        Ok(result) => {
            match result.strategy {
                Strategy::Snapshot => {
                    eprintln!("[snapshot, {} bytes]", result.text.len());
                }
                Strategy::Replay => {
                    eprintln!(
                        "[replayed {} edits: {} applied, {} failed]",
                        result.total, result.applied, result.failed
                    );
                }
            }
            println!("{}", result.text);
            Ok(())
        }
        Err(ReconstructError::NotReconstructible(path)) => {
            println!("Cannot reconstruct {}: no snapshot or edit stream.", path);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
