//! Plain-text transcript adapter
//!
//! Data format: per-working-dir subdirectories of text files, one agent
//! session per file. Structure is marked by literal section headers:
//!
//! ```text
//! === USER (2025-01-05T10:00:00Z) ===
//! please fix the bug
//! === ASSISTANT ===
//! on it
//! === TOOL CALL: bash ===
//! cargo test
//! === TOOL RESULT ===
//! ok
//! ```
//!
//! The parenthesized timestamp is optional; blocks without one inherit
//! the previous block's. The whole file's mtime is the cursor
//! granularity: any change re-ingests the file and the store
//! deduplicates by event id.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{
    capture_cap, seal_events, CursorState, EventType, IngestOutput, IngestReport, NewEvent,
    NormalizeContext, SourceAdapter, SourceCandidate, SourceKind,
};
use crate::timeparse::{parse_time_input, to_utc_string};

pub struct PlainAdapter {
    base_path: PathBuf,
}

impl PlainAdapter {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(".local/share/agent-logs")
        });
        Self { base_path }
    }
}

impl SourceAdapter for PlainAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::PlainTranscript
    }

    fn discover(&self) -> Result<Vec<SourceCandidate>> {
        let mut candidates = vec![];
        if !self.base_path.exists() {
            return Ok(candidates);
        }

        for entry in WalkDir::new(&self.base_path).max_depth(2) {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e == "txt").unwrap_or(false) {
                candidates.push(SourceCandidate {
                    kind: SourceKind::PlainTranscript,
                    locator: path.to_string_lossy().to_string(),
                    working_dir: None,
                    session_id: path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .map(String::from),
                });
            }
        }

        Ok(candidates)
    }

    fn working_dirs(&self) -> Result<Vec<PathBuf>> {
        // Subdirectory names do not round-trip to real paths.
        Ok(vec![])
    }

    fn ingest(
        &self,
        locator: &str,
        ctx: &NormalizeContext,
        cursor: Option<&CursorState>,
    ) -> Result<IngestOutput> {
        let path = Path::new(locator);
        let meta = std::fs::metadata(path).context("Transcript file missing")?;
        let mtime: Option<String> = meta.modified().ok().map(|t| {
            let dt: DateTime<Utc> = t.into();
            to_utc_string(dt)
        });

        let new_cursor = CursorState {
            file_mtime: mtime.clone(),
            file_size: Some(meta.len()),
            ..Default::default()
        };

        if let Some(prev) = cursor {
            if prev.file_mtime == mtime {
                return Ok(IngestOutput {
                    events: vec![],
                    cursor: new_cursor,
                    report: IngestReport::default(),
                });
            }
        }

        let content = std::fs::read_to_string(path)?;
        let mut report = IngestReport::default();
        report.lines_read = content.lines().count();

        let mut events = Vec::new();
        let mut seq: i64 = 0;
        let mut last_ts = "1970-01-01T00:00:00.000Z".to_string();
        let mut pending_call: Option<(i64, String)> = None;

        for block in tokenize_blocks(&content) {
            if let Some(ts) = block.timestamp {
                last_ts = ts;
            }
            let text = block.body.trim();
            if text.is_empty() {
                continue;
            }

            match block.kind {
                BlockKind::User => {
                    events.push(NewEvent::new(
                        ctx,
                        seq as f64,
                        &last_ts,
                        EventType::UserMessage,
                        text,
                    ));
                    seq += 1;
                    pending_call = None;
                }
                BlockKind::Assistant => {
                    events.push(NewEvent::new(
                        ctx,
                        seq as f64,
                        &last_ts,
                        EventType::AssistantMessage,
                        text,
                    ));
                    seq += 1;
                    pending_call = None;
                }
                BlockKind::Thinking => {
                    let mut event = NewEvent::new(
                        ctx,
                        seq as f64,
                        &last_ts,
                        EventType::AssistantMessage,
                        text,
                    );
                    event.meta = Some(json!({ "thinking": true }));
                    events.push(event);
                    seq += 1;
                }
                BlockKind::ToolCall(tool) => {
                    let call_id = format!("plain-{}", seq);
                    let mut event = NewEvent::new(
                        ctx,
                        seq as f64,
                        &last_ts,
                        EventType::ToolCall,
                        text,
                    );
                    event.tool_name = Some(tool.clone());
                    event.meta = Some(json!({ "tool_call_id": call_id }));
                    events.push(event);
                    pending_call = Some((seq, tool));
                    seq += 1;
                }
                BlockKind::ToolResult => {
                    let (result_seq, tool_name, call_id) = match pending_call.take() {
                        Some((call_seq, tool)) => (
                            call_seq as f64 + 0.5,
                            Some(tool),
                            Some(format!("plain-{}", call_seq)),
                        ),
                        None => {
                            let s = seq as f64;
                            seq += 1;
                            (s, None, None)
                        }
                    };
                    let cap = tool_name
                        .as_deref()
                        .map(capture_cap)
                        .unwrap_or(super::TOOL_OUTPUT_CAP);
                    let mut event = NewEvent::new(
                        ctx,
                        result_seq,
                        &last_ts,
                        EventType::ToolResult,
                        super::truncate_capture(text, cap),
                    );
                    event.tool_name = tool_name;
                    if let Some(id) = call_id {
                        event.meta = Some(json!({ "tool_call_id": id }));
                    }
                    events.push(event);
                }
            }
        }

        seal_events(&mut events);
        report.events_emitted = events.len();

        Ok(IngestOutput {
            events,
            cursor: new_cursor,
            report,
        })
    }
}

#[derive(Debug, PartialEq)]
enum BlockKind {
    User,
    Assistant,
    Thinking,
    ToolCall(String),
    ToolResult,
}

struct Block {
    kind: BlockKind,
    timestamp: Option<String>,
    body: String,
}

fn tokenize_blocks(content: &str) -> Vec<Block> {
    let mut blocks: Vec<Block> = vec![];

    for line in content.lines() {
        match parse_header(line) {
            Some((kind, timestamp)) => blocks.push(Block {
                kind,
                timestamp,
                body: String::new(),
            }),
            None => {
                if let Some(block) = blocks.last_mut() {
                    block.body.push_str(line);
                    block.body.push('\n');
                }
                // Text before the first header has no block and is dropped.
            }
        }
    }

    blocks
}

fn parse_header(line: &str) -> Option<(BlockKind, Option<String>)> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix("=== ")?.strip_suffix(" ===")?;

    // Optional "(timestamp)" suffix on any header.
    let (label, timestamp) = match inner.rfind('(') {
        Some(open) if inner.ends_with(')') => {
            let ts_str = &inner[open + 1..inner.len() - 1];
            let parsed = parse_time_input(ts_str, Utc::now()).map(to_utc_string);
            (inner[..open].trim_end(), parsed)
        }
        _ => (inner, None),
    };

    let kind = if label == "USER" {
        BlockKind::User
    } else if label == "ASSISTANT" {
        BlockKind::Assistant
    } else if label == "THINKING" {
        BlockKind::Thinking
    } else if let Some(tool) = label.strip_prefix("TOOL CALL: ") {
        BlockKind::ToolCall(tool.trim().to_string())
    } else if label == "TOOL RESULT" {
        BlockKind::ToolResult
    } else {
        return None;
    };

    Some((kind, timestamp))
}
