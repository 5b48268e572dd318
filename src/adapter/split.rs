//! Split-file transcript adapter
//!
//! Data format: JSON files spread over parallel directories:
//!   - session/{project_hash}/ses_*.json   - session metadata
//!   - message/{session_id}/msg_*.json     - per-message metadata
//!   - part/{message_id}/prt_*.json        - message content parts
//!   - diff/{session_id}.json              - per-session file diffs
//!
//! Message order is each message's creation time; part order is the
//! part's start time. Assistant messages without a completion time are
//! still streaming and are skipped until a later tick. Because any
//! change re-walks the whole session, events are deduplicated purely by
//! their deterministic ids.

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use super::{
    capture_cap, seal_events, CursorState, EventType, IngestOutput, IngestReport, NewEvent,
    NormalizeContext, SourceAdapter, SourceCandidate, SourceKind,
};
use crate::timeparse::to_utc_string;

pub struct SplitAdapter {
    base_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct SessionFile {
    directory: Option<String>,
    #[allow(dead_code)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageFile {
    id: String,
    role: Option<String>,
    #[serde(rename = "modelID")]
    model_id: Option<String>,
    time: Option<MessageTime>,
    tokens: Option<TokenInfo>,
}

#[derive(Debug, Deserialize)]
struct MessageTime {
    created: Option<i64>,
    completed: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    input: Option<i64>,
    output: Option<i64>,
    cache: Option<CacheInfo>,
}

#[derive(Debug, Deserialize)]
struct CacheInfo {
    read: Option<i64>,
    write: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PartFile {
    #[serde(rename = "type")]
    part_type: String,
    text: Option<String>,
    tool: Option<String>,
    #[serde(rename = "callID")]
    call_id: Option<String>,
    state: Option<ToolState>,
    time: Option<PartTime>,
}

#[derive(Debug, Deserialize)]
struct ToolState {
    status: Option<String>,
    input: Option<Value>,
    output: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PartTime {
    start: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DiffEntry {
    file: String,
    #[serde(default)]
    before: String,
    #[serde(default)]
    after: String,
    #[serde(default)]
    additions: i64,
    #[serde(default)]
    deletions: i64,
}

impl SplitAdapter {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(".local/share/opencode/storage")
        });
        Self { base_path }
    }

    fn session_dir(&self) -> PathBuf {
        self.base_path.join("session")
    }

    fn message_dir(&self) -> PathBuf {
        self.base_path.join("message")
    }

    fn part_dir(&self) -> PathBuf {
        self.base_path.join("part")
    }

    fn diff_file(&self, session_id: &str) -> PathBuf {
        self.base_path.join("diff").join(format!("{}.json", session_id))
    }

    fn ms_to_iso(ms: i64) -> Option<String> {
        Utc.timestamp_millis_opt(ms).single().map(to_utc_string)
    }

    fn sorted_json_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(prefix) && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

impl SourceAdapter for SplitAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::SplitTranscript
    }

    fn discover(&self) -> Result<Vec<SourceCandidate>> {
        let mut candidates = vec![];
        let session_dir = self.session_dir();

        if !session_dir.exists() {
            return Ok(candidates);
        }

        for project_entry in std::fs::read_dir(&session_dir)? {
            let project_dir = project_entry?.path();
            if !project_dir.is_dir() {
                continue;
            }

            for file in Self::sorted_json_files(&project_dir, "ses_")? {
                let session_id = file
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("unknown")
                    .to_string();
                let working_dir = std::fs::read_to_string(&file)
                    .ok()
                    .and_then(|c| serde_json::from_str::<SessionFile>(&c).ok())
                    .and_then(|s| s.directory)
                    .map(PathBuf::from);

                candidates.push(SourceCandidate {
                    kind: SourceKind::SplitTranscript,
                    locator: file.to_string_lossy().to_string(),
                    working_dir,
                    session_id: Some(session_id),
                });
            }
        }

        Ok(candidates)
    }

    fn working_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = vec![];
        for candidate in self.discover()? {
            if let Some(dir) = candidate.working_dir {
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        Ok(dirs)
    }

    fn describe(&self, locator: &str) -> SourceCandidate {
        let path = Path::new(locator);
        let working_dir = std::fs::read_to_string(path)
            .ok()
            .and_then(|c| serde_json::from_str::<SessionFile>(&c).ok())
            .and_then(|s| s.directory)
            .map(PathBuf::from);
        SourceCandidate {
            kind: SourceKind::SplitTranscript,
            locator: locator.to_string(),
            working_dir,
            session_id: path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(String::from),
        }
    }

    fn ingest(
        &self,
        locator: &str,
        ctx: &NormalizeContext,
        cursor: Option<&CursorState>,
    ) -> Result<IngestOutput> {
        let session_path = Path::new(locator);
        let session_meta = std::fs::metadata(session_path).context("Session file missing")?;
        let session_id = session_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let session_mtime: Option<String> = session_meta
            .modified()
            .ok()
            .map(|t| to_utc_string(t.into()));
        let diff_path = self.diff_file(&session_id);
        let diff_mtime: Option<String> = std::fs::metadata(&diff_path)
            .ok()
            .and_then(|m| m.modified().ok())
            .map(|t| to_utc_string(t.into()));

        let new_cursor = CursorState {
            file_mtime: session_mtime.clone(),
            diff_mtime: diff_mtime.clone(),
            ..Default::default()
        };

        // Skip only when neither the session tree nor the diff file moved.
        if let Some(prev) = cursor {
            if prev.file_mtime == session_mtime && prev.diff_mtime == diff_mtime {
                return Ok(IngestOutput {
                    events: vec![],
                    cursor: new_cursor,
                    report: IngestReport::default(),
                });
            }
        }

        let mut report = IngestReport::default();
        let mut events: Vec<NewEvent> = Vec::new();
        let mut seq: i64 = 0;
        let mut first_completed_ts: Option<String> = None;

        // Messages sort by creation time.
        let message_session_dir = self.message_dir().join(&session_id);
        let mut messages: Vec<(i64, PathBuf, MessageFile)> = vec![];
        if message_session_dir.exists() {
            for path in Self::sorted_json_files(&message_session_dir, "msg_")? {
                report.lines_read += 1;
                let content = std::fs::read_to_string(&path)?;
                let msg: MessageFile = match serde_json::from_str(&content) {
                    Ok(m) => m,
                    Err(_) => {
                        report.parse_skips += 1;
                        continue;
                    }
                };
                let created = msg.time.as_ref().and_then(|t| t.created).unwrap_or(0);
                messages.push((created, path, msg));
            }
        }
        messages.sort_by_key(|(created, path, _)| (*created, path.clone()));

        for (created, _path, msg) in &messages {
            let role = msg.role.as_deref().unwrap_or("assistant");
            let completed = msg.time.as_ref().and_then(|t| t.completed);

            // Streaming assistant output gets picked up on a later tick.
            if role == "assistant" && completed.is_none() {
                continue;
            }

            let ts = Self::ms_to_iso(*created)
                .unwrap_or_else(|| "1970-01-01T00:00:00.000Z".to_string());
            if first_completed_ts.is_none() && completed.is_some() {
                first_completed_ts = Some(ts.clone());
            }

            // Token counters live on the message; attach them to exactly
            // one emitted event to avoid double-counting.
            let mut token_meta = msg.tokens.as_ref().map(|t| {
                let mut meta = json!({
                    "tokens": {
                        "input": t.input.unwrap_or(0),
                        "output": t.output.unwrap_or(0),
                        "cache_read": t.cache.as_ref().and_then(|c| c.read).unwrap_or(0),
                        "cache_write": t.cache.as_ref().and_then(|c| c.write).unwrap_or(0),
                    },
                    "message_id": msg.id,
                });
                if let Some(model) = &msg.model_id {
                    meta["model"] = json!(model);
                }
                meta
            });

            self.normalize_parts(
                ctx,
                &msg.id,
                role,
                &ts,
                &mut seq,
                &mut token_meta,
                &mut events,
                &mut report,
            )?;
        }

        // Per-session diffs become edit calls, stamped at the first
        // completed message of the session.
        if diff_path.exists() {
            let diff_ts = first_completed_ts
                .unwrap_or_else(|| "1970-01-01T00:00:00.000Z".to_string());
            let content = std::fs::read_to_string(&diff_path)?;
            match serde_json::from_str::<Vec<DiffEntry>>(&content) {
                Ok(entries) => {
                    for entry in entries {
                        let mut event = NewEvent::new(
                            ctx,
                            seq as f64,
                            &diff_ts,
                            EventType::ToolCall,
                            format!("edit {}", entry.file),
                        );
                        event.tool_name = Some("edit".to_string());
                        event.file_paths = vec![entry.file.clone()];
                        event.tool_args = Some(json!({
                            "file_path": entry.file,
                            "oldString": entry.before,
                            "newString": entry.after,
                        }));
                        event.meta = Some(json!({
                            "additions": entry.additions,
                            "deletions": entry.deletions,
                            "from_diff": true,
                        }));
                        events.push(event);
                        seq += 1;
                    }
                }
                Err(_) => report.parse_skips += 1,
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

impl SplitAdapter {
    #[allow(clippy::too_many_arguments)]
    fn normalize_parts(
        &self,
        ctx: &NormalizeContext,
        message_id: &str,
        role: &str,
        ts: &str,
        seq: &mut i64,
        token_meta: &mut Option<Value>,
        events: &mut Vec<NewEvent>,
        report: &mut IngestReport,
    ) -> Result<()> {
        let part_msg_dir = self.part_dir().join(message_id);
        if !part_msg_dir.exists() {
            return Ok(());
        }

        // Parts sort by their start time.
        let mut parts: Vec<(i64, PathBuf, PartFile)> = vec![];
        for path in Self::sorted_json_files(&part_msg_dir, "prt_")? {
            report.lines_read += 1;
            let content = std::fs::read_to_string(&path)?;
            let part: PartFile = match serde_json::from_str(&content) {
                Ok(p) => p,
                Err(_) => {
                    report.parse_skips += 1;
                    continue;
                }
            };
            let start = part.time.as_ref().and_then(|t| t.start).unwrap_or(0);
            parts.push((start, path, part));
        }
        parts.sort_by_key(|(start, path, _)| (*start, path.clone()));

        for (_start, _path, part) in parts {
            match part.part_type.as_str() {
                "text" => {
                    let text = part.text.unwrap_or_default();
                    if text.trim().is_empty() {
                        continue;
                    }
                    let event_type = if role == "user" {
                        EventType::UserMessage
                    } else {
                        EventType::AssistantMessage
                    };
                    let mut event = NewEvent::new(ctx, *seq as f64, ts, event_type, text);
                    event.meta = token_meta.take();
                    events.push(event);
                    *seq += 1;
                }
                "tool" => {
                    let tool = part.tool.unwrap_or_else(|| "unknown".to_string());
                    let call_id = part.call_id.unwrap_or_default();
                    let state = part.state;
                    let input = state
                        .as_ref()
                        .and_then(|s| s.input.clone())
                        .unwrap_or(Value::Null);

                    let call_seq = *seq;
                    *seq += 1;

                    let mut call = NewEvent::new(
                        ctx,
                        call_seq as f64,
                        ts,
                        EventType::ToolCall,
                        summarize_input(&input),
                    );
                    call.tool_name = Some(tool.clone());
                    call.file_paths = super::jsonl::extract_file_paths(&input);
                    let mut call_meta = token_meta.take().unwrap_or_else(|| json!({}));
                    call_meta["tool_call_id"] = json!(call_id);
                    call.meta = Some(call_meta);
                    let call_paths = call.file_paths.clone();
                    call.tool_args = Some(input);
                    events.push(call);

                    let completed = state
                        .as_ref()
                        .and_then(|s| s.status.as_deref())
                        .map(|s| s == "completed")
                        .unwrap_or(false);
                    if completed {
                        let output = state.and_then(|s| s.output).unwrap_or_default();
                        let mut result = NewEvent::new(
                            ctx,
                            call_seq as f64 + 0.5,
                            ts,
                            EventType::ToolResult,
                            super::truncate_capture(&output, capture_cap(&tool)),
                        );
                        result.tool_name = Some(tool);
                        result.file_paths = call_paths;
                        result.meta = Some(json!({ "tool_call_id": call_id }));
                        events.push(result);
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn summarize_input(input: &Value) -> String {
    match input {
        Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| {
                v.as_str().map(|s| {
                    let mut end = s.len().min(200);
                    while end > 0 && !s.is_char_boundary(end) {
                        end -= 1;
                    }
                    format!("{}={}", k, &s[..end])
                })
            })
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}
