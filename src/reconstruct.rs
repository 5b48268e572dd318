//! Point-in-time file reconstruction
//!
//! Rebuilds a file's contents as of a wall-clock moment from what the
//! transcripts captured. A substantially complete read snapshot wins
//! outright; otherwise the edit stream is replayed in order, replacing
//! the first occurrence of each edit's old text. Edit streams are
//! imperfect (an intervening external write can strip an anchor), so
//! replay is best-effort and the report carries its fidelity.

use thiserror::Error;

use crate::store::{EditFilter, Store};

#[derive(Debug, Error)]
pub enum ReconstructError {
    #[error("no usable snapshot or edit stream for {0}")]
    NotReconstructible(String),
    #[error("store query failed: {0}")]
    Store(String),
}

fn store_err(e: anyhow::Error) -> ReconstructError {
    ReconstructError::Store(format!("{:#}", e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Snapshot,
    Replay,
}

#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub text: String,
    pub strategy: Strategy,
    pub applied: usize,
    pub failed: usize,
    pub total: usize,
}

/// Best-effort contents of `file_path` as of `at_time` (canonical UTC
/// string; `None` means now).
pub fn reconstruct(
    store: &Store,
    file_path: &str,
    at_time: Option<&str>,
    session_id: Option<&str>,
) -> Result<Reconstruction, ReconstructError> {
    // A structurally complete snapshot is exact; prefer it.
    if let Some(snapshot) = store.find_read_result(file_path, at_time).map_err(store_err)? {
        return Ok(Reconstruction {
            text: snapshot.text_redacted,
            strategy: Strategy::Snapshot,
            applied: 0,
            failed: 0,
            total: 0,
        });
    }

    let edits = store
        .get_edits(&EditFilter {
            until: at_time.map(String::from),
            session: session_id.map(String::from),
            file_path: Some(file_path.to_string()),
            limit: 0,
            ..Default::default()
        })
        .map_err(store_err)?;

    if edits.is_empty() {
        return Err(ReconstructError::NotReconstructible(file_path.to_string()));
    }

    let mut content = edits[0].old_string.clone();
    let mut applied = 0usize;
    let mut failed = 0usize;

    for edit in &edits {
        let occurrence = edit
            .meta_json
            .as_deref()
            .and_then(|m| serde_json::from_str::<serde_json::Value>(m).ok())
            .and_then(|m| m.get("occurrence_index").and_then(|v| v.as_u64()))
            .unwrap_or(0) as usize;

        match find_occurrence(&content, &edit.old_string, occurrence) {
            Some(pos) => {
                content.replace_range(pos..pos + edit.old_string.len(), &edit.new_string);
                applied += 1;
            }
            None => failed += 1,
        }
    }

    Ok(Reconstruction {
        text: content,
        strategy: Strategy::Replay,
        applied,
        failed,
        total: edits.len(),
    })
}

/// Byte position of the nth occurrence of `needle` in `haystack`.
/// An empty needle anchors at the start.
fn find_occurrence(haystack: &str, needle: &str, n: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    let mut from = 0;
    let mut count = 0;
    while let Some(rel) = haystack[from..].find(needle) {
        let pos = from + rel;
        if count == n {
            return Some(pos);
        }
        count += 1;
        from = pos + needle.len();
    }
    None
}
