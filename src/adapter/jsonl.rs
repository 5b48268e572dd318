//! Line-delimited JSON transcript adapter
//!
//! Data format: one JSON object per line, one file per session, files
//! grouped under per-project directories. The adapter tails each file
//! with a byte-offset cursor and detects rotation via the inode and a
//! shrinking file; legacy assistant turns that embed tool invocations as
//! an XML-like block are unfolded into paired call/result events.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{
    capture_cap, seal_events, CursorState, EventType, IngestOutput, IngestReport, NewEvent,
    NormalizeContext, SourceAdapter, SourceCandidate, SourceKind, WRITE_TOOLS,
};
use crate::timeparse::to_utc_string;

pub struct JsonlAdapter {
    base_path: PathBuf,
}

impl JsonlAdapter {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(".claude/projects")
        });
        Self { base_path }
    }
}

impl SourceAdapter for JsonlAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::JsonlTranscript
    }

    fn discover(&self) -> Result<Vec<SourceCandidate>> {
        let mut found = vec![];
        if !self.base_path.is_dir() {
            return Ok(found);
        }

        // Sessions sit exactly one project directory below the base.
        for entry in WalkDir::new(&self.base_path).min_depth(2).max_depth(2) {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            found.push(SourceCandidate {
                kind: SourceKind::JsonlTranscript,
                locator: path.to_string_lossy().into_owned(),
                working_dir: peek_cwd(path),
                session_id: path.file_stem().and_then(|s| s.to_str()).map(String::from),
            });
        }

        Ok(found)
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
        SourceCandidate {
            kind: SourceKind::JsonlTranscript,
            locator: locator.to_string(),
            working_dir: peek_cwd(path),
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
        let path = Path::new(locator);
        let meta = std::fs::metadata(path).context("Transcript file missing")?;
        let size = meta.len();
        let inode = file_inode(&meta);
        let mtime: Option<DateTime<Utc>> = meta.modified().ok().map(Into::into);

        let prev = cursor.cloned().unwrap_or_default();

        // Rotation: a new inode or a shrunken file restarts the tail.
        let rotated = prev
            .file_inode
            .map(|old| Some(old) != inode)
            .unwrap_or(false)
            || prev.byte_offset.map(|off| off > size).unwrap_or(false);
        let start_offset = if rotated {
            0
        } else {
            prev.byte_offset.unwrap_or(0)
        };

        let mut seq = prev.last_rowid.map(|r| r + 1).unwrap_or(0);
        let mut events: Vec<NewEvent> = Vec::new();
        let mut report = IngestReport::default();

        let mut consumed = start_offset;
        if start_offset < size {
            let mut file = File::open(path)?;
            file.seek(SeekFrom::Start(start_offset))?;
            let mut reader = BufReader::new(file);

            // Pairs tool results back to their call's sequence number.
            let mut pending: HashMap<String, (i64, String)> = HashMap::new();
            let mut last_ts = "1970-01-01T00:00:00.000Z".to_string();

            let mut line = String::new();
            loop {
                line.clear();
                let read = reader.read_line(&mut line)?;
                if read == 0 {
                    break;
                }
                // A line without its newline is still being written;
                // leave it for the next tick.
                if !line.ends_with('\n') {
                    break;
                }
                consumed += read as u64;
                report.lines_read += 1;

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let entry: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(_) => {
                        report.parse_skips += 1;
                        continue;
                    }
                };

                if entry.get("type").and_then(|v| v.as_str()) == Some("queue-operation") {
                    continue;
                }

                if let Some(ts) = entry
                    .get("timestamp")
                    .and_then(|v| v.as_str())
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                {
                    last_ts = to_utc_string(ts.with_timezone(&Utc));
                }

                normalize_entry(ctx, &entry, &last_ts, &mut seq, &mut pending, &mut events);
            }
        }

        seal_events(&mut events);
        report.events_emitted = events.len();

        Ok(IngestOutput {
            events,
            cursor: CursorState {
                file_inode: inode,
                file_size: Some(size),
                file_mtime: mtime.map(to_utc_string),
                byte_offset: Some(consumed),
                diff_mtime: None,
                last_event_id: None,
                last_rowid: Some(seq - 1),
            },
            report,
        })
    }
}

/// Emit the events for one transcript entry.
fn normalize_entry(
    ctx: &NormalizeContext,
    entry: &Value,
    ts: &str,
    seq: &mut i64,
    pending: &mut HashMap<String, (i64, String)>,
    events: &mut Vec<NewEvent>,
) {
    let message = entry.get("message");
    let role = message
        .and_then(|m| m.get("role"))
        .and_then(|v| v.as_str())
        .or_else(|| entry.get("type").and_then(|v| v.as_str()))
        .unwrap_or("unknown");

    let content = message.and_then(|m| m.get("content"));

    match role {
        "user" => normalize_user(ctx, content, ts, seq, pending, events),
        "assistant" => normalize_assistant(ctx, entry, message, content, ts, seq, pending, events),
        _ => {}
    }
}

fn normalize_user(
    ctx: &NormalizeContext,
    content: Option<&Value>,
    ts: &str,
    seq: &mut i64,
    pending: &mut HashMap<String, (i64, String)>,
    events: &mut Vec<NewEvent>,
) {
    match content {
        Some(Value::String(text)) => {
            events.push(NewEvent::new(ctx, next(seq) as f64, ts, EventType::UserMessage, text));
        }
        Some(Value::Array(blocks)) => {
            let mut text_parts: Vec<&str> = vec![];
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                            text_parts.push(t);
                        }
                    }
                    Some("tool_result") => {
                        let call_id = block
                            .get("tool_use_id")
                            .and_then(|v| v.as_str())
                            .unwrap_or("");
                        let text = tool_result_text(block);
                        push_tool_result(ctx, ts, seq, pending, events, call_id, &text);
                    }
                    _ => {}
                }
            }
            if !text_parts.is_empty() {
                events.push(NewEvent::new(
                    ctx,
                    next(seq) as f64,
                    ts,
                    EventType::UserMessage,
                    text_parts.join("\n"),
                ));
            }
        }
        _ => {}
    }
}

#[allow(clippy::too_many_arguments)]
fn normalize_assistant(
    ctx: &NormalizeContext,
    entry: &Value,
    message: Option<&Value>,
    content: Option<&Value>,
    ts: &str,
    seq: &mut i64,
    pending: &mut HashMap<String, (i64, String)>,
    events: &mut Vec<NewEvent>,
) {
    let token_meta = token_meta(entry, message);

    match content {
        Some(Value::String(text)) => {
            if text.contains("<function_calls>") {
                normalize_legacy_block(ctx, text, ts, seq, events, &token_meta);
            } else {
                push_assistant_text(ctx, ts, seq, events, text, &token_meta);
            }
        }
        Some(Value::Array(blocks)) => {
            let mut tokens_attached = false;
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        let text = block.get("text").and_then(|t| t.as_str()).unwrap_or("");
                        if text.contains("<function_calls>") {
                            normalize_legacy_block(ctx, text, ts, seq, events, &token_meta);
                        } else {
                            let meta = if tokens_attached { &None } else { &token_meta };
                            push_assistant_text(ctx, ts, seq, events, text, meta);
                        }
                        tokens_attached = true;
                    }
                    Some("tool_use") => {
                        let name = block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown")
                            .to_string();
                        let call_id = block
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        let input = block.get("input").cloned().unwrap_or(Value::Null);
                        push_tool_call(ctx, ts, seq, pending, events, &name, &call_id, input);
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn push_assistant_text(
    ctx: &NormalizeContext,
    ts: &str,
    seq: &mut i64,
    events: &mut Vec<NewEvent>,
    text: &str,
    token_meta: &Option<Value>,
) {
    if text.trim().is_empty() {
        return;
    }
    let mut event = NewEvent::new(ctx, next(seq) as f64, ts, EventType::AssistantMessage, text);
    event.meta = token_meta.clone();
    events.push(event);
}

fn push_tool_call(
    ctx: &NormalizeContext,
    ts: &str,
    seq: &mut i64,
    pending: &mut HashMap<String, (i64, String)>,
    events: &mut Vec<NewEvent>,
    name: &str,
    call_id: &str,
    input: Value,
) {
    let call_seq = next(seq);
    let mut event = NewEvent::new(
        ctx,
        call_seq as f64,
        ts,
        EventType::ToolCall,
        summarize_args(&input),
    );
    event.tool_name = Some(name.to_string());
    event.file_paths = extract_file_paths(&input);
    event.meta = Some(json!({ "tool_call_id": call_id }));

    // The write tool's content argument is the as-written file; keep it
    // as its own result event so reconstruction can reach the bytes.
    let write_content = if WRITE_TOOLS.contains(&name) {
        input.get("content").and_then(|c| c.as_str()).map(String::from)
    } else {
        None
    };

    event.tool_args = Some(input);
    if !call_id.is_empty() {
        pending.insert(call_id.to_string(), (call_seq, name.to_string()));
    }
    let file_paths = event.file_paths.clone();
    events.push(event);

    if let Some(content) = write_content {
        let mut result = NewEvent::new(
            ctx,
            call_seq as f64 + 0.5,
            ts,
            EventType::ToolResult,
            super::truncate_capture(&content, capture_cap(name)),
        );
        result.tool_name = Some(name.to_string());
        result.file_paths = file_paths;
        result.meta = Some(json!({ "tool_call_id": call_id, "is_write_content": true }));
        events.push(result);
        // The slot is taken; a harness result for the same call would
        // collide, so drop the pending entry.
        pending.remove(call_id);
    }
}

fn push_tool_result(
    ctx: &NormalizeContext,
    ts: &str,
    seq: &mut i64,
    pending: &mut HashMap<String, (i64, String)>,
    events: &mut Vec<NewEvent>,
    call_id: &str,
    text: &str,
) {
    let (result_seq, tool_name) = match pending.remove(call_id) {
        Some((call_seq, name)) => (call_seq as f64 + 0.5, Some(name)),
        None => (next(seq) as f64, None),
    };

    let cap = tool_name.as_deref().map(capture_cap).unwrap_or(super::TOOL_OUTPUT_CAP);
    let mut event = NewEvent::new(
        ctx,
        result_seq,
        ts,
        EventType::ToolResult,
        super::truncate_capture(text, cap),
    );
    event.tool_name = tool_name;
    if !call_id.is_empty() {
        event.meta = Some(json!({ "tool_call_id": call_id }));
    }
    events.push(event);
}

fn token_meta(entry: &Value, message: Option<&Value>) -> Option<Value> {
    let usage = message.and_then(|m| m.get("usage"))?;
    let mut meta = json!({
        "tokens": {
            "input": usage.get("input_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
            "output": usage.get("output_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
            "cache_read": usage.get("cache_read_input_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
            "cache_write": usage.get("cache_creation_input_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
        }
    });
    if let Some(model) = message.and_then(|m| m.get("model")).and_then(|v| v.as_str()) {
        meta["model"] = json!(model);
    }
    let message_id = message
        .and_then(|m| m.get("id"))
        .and_then(|v| v.as_str())
        .or_else(|| entry.get("uuid").and_then(|v| v.as_str()));
    if let Some(id) = message_id {
        meta["message_id"] = json!(id);
    }
    Some(meta)
}

fn tool_result_text(block: &Value) -> String {
    match block.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn summarize_args(input: &Value) -> String {
    match input {
        Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| format!("{}={}", k, truncate(s, 200))))
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

fn truncate(s: &str, cap: usize) -> String {
    if s.len() <= cap {
        s.to_string()
    } else {
        let mut end = cap;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

pub(crate) fn extract_file_paths(input: &Value) -> Vec<String> {
    let mut paths = vec![];
    for key in ["file_path", "filePath", "path", "notebook_path"] {
        if let Some(p) = input.get(key).and_then(|v| v.as_str()) {
            if !paths.contains(&p.to_string()) {
                paths.push(p.to_string());
            }
        }
    }
    paths
}

fn next(seq: &mut i64) -> i64 {
    let current = *seq;
    *seq += 1;
    current
}

/// Read the head of a transcript looking for the working directory.
fn peek_cwd(path: &Path) -> Option<PathBuf> {
    let file = File::open(path).ok()?;
    let reader = BufReader::new(file);
    for line in reader.lines().take(20) {
        let line = line.ok()?;
        if let Ok(json) = serde_json::from_str::<Value>(&line) {
            if let Some(cwd) = json.get("cwd").and_then(|v| v.as_str()) {
                return Some(PathBuf::from(cwd));
            }
        }
    }
    None
}

#[cfg(unix)]
fn file_inode(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_inode(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

// ============================================
// LEGACY XML-STYLE TOOL BLOCKS
// ============================================

#[derive(Debug, PartialEq)]
pub(crate) struct LegacyInvocation {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub result: Option<String>,
}

fn normalize_legacy_block(
    ctx: &NormalizeContext,
    text: &str,
    ts: &str,
    seq: &mut i64,
    events: &mut Vec<NewEvent>,
    token_meta: &Option<Value>,
) {
    let (leftover, invocations) = parse_legacy_blocks(text);

    if !leftover.trim().is_empty() {
        push_assistant_text(ctx, ts, seq, events, &leftover, token_meta);
    } else if token_meta.is_some() && !invocations.is_empty() {
        // Keep token accounting even when the turn was all tool calls.
        push_assistant_text(ctx, ts, seq, events, "[tool invocation]", token_meta);
    }

    for invocation in invocations {
        let call_seq = next(seq);
        let call_id = format!("xml-{}", call_seq);
        let args: Value = Value::Object(
            invocation
                .params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        );

        let mut call = NewEvent::new(
            ctx,
            call_seq as f64,
            ts,
            EventType::ToolCall,
            summarize_args(&args),
        );
        call.tool_name = Some(invocation.name.clone());
        call.file_paths = extract_file_paths(&args);
        call.meta = Some(json!({ "tool_call_id": call_id, "legacy_block": true }));
        let call_paths = call.file_paths.clone();
        call.tool_args = Some(args);
        events.push(call);

        if let Some(output) = invocation.result {
            let mut result = NewEvent::new(
                ctx,
                call_seq as f64 + 0.5,
                ts,
                EventType::ToolResult,
                super::truncate_capture(&output, capture_cap(&invocation.name)),
            );
            result.tool_name = Some(invocation.name.clone());
            result.file_paths = call_paths;
            result.meta = Some(json!({ "tool_call_id": call_id, "legacy_block": true }));
            events.push(result);
        }
    }
}

/// Parse every `<function_calls>` block (and a trailing `<result>` per
/// block, if present) out of assistant text. Returns the remaining prose
/// and the invocations in order.
pub(crate) fn parse_legacy_blocks(text: &str) -> (String, Vec<LegacyInvocation>) {
    let mut leftover = String::new();
    let mut invocations = vec![];
    let mut rest = text;

    while let Some(start) = rest.find("<function_calls>") {
        leftover.push_str(&rest[..start]);
        let after = &rest[start + "<function_calls>".len()..];
        let Some(end) = after.find("</function_calls>") else {
            // Unterminated block: treat the tail as prose.
            leftover.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let block = &after[..end];
        let mut block_invocations = parse_invocations(block);
        rest = &after[end + "</function_calls>".len()..];

        // An optional result block binds to the last invocation.
        let trimmed = rest.trim_start();
        if let Some(result_body) = trimmed.strip_prefix("<result>") {
            if let Some(result_end) = result_body.find("</result>") {
                if let Some(last) = block_invocations.last_mut() {
                    last.result = Some(result_body[..result_end].trim().to_string());
                }
                let consumed = (rest.len() - trimmed.len())
                    + "<result>".len()
                    + result_end
                    + "</result>".len();
                rest = &rest[consumed..];
            }
        }

        invocations.extend(block_invocations);
    }
    leftover.push_str(rest);

    (leftover, invocations)
}

fn parse_invocations(block: &str) -> Vec<LegacyInvocation> {
    let mut invocations = vec![];
    let mut rest = block;

    while let Some(start) = rest.find("<invoke name=\"") {
        let after = &rest[start + "<invoke name=\"".len()..];
        let Some(name_end) = after.find('"') else { break };
        let name = after[..name_end].to_string();
        let body = &after[name_end + 1..];
        let Some(end) = body.find("</invoke>") else { break };

        invocations.push(LegacyInvocation {
            name,
            params: parse_parameters(&body[..end]),
            result: None,
        });
        rest = &body[end + "</invoke>".len()..];
    }

    invocations
}

fn parse_parameters(body: &str) -> Vec<(String, String)> {
    let mut params = vec![];
    let mut rest = body;

    while let Some(start) = rest.find("<parameter name=\"") {
        let after = &rest[start + "<parameter name=\"".len()..];
        let Some(name_end) = after.find('"') else { break };
        let name = after[..name_end].to_string();
        let Some(value_start) = after.find('>') else { break };
        let value_body = &after[value_start + 1..];
        let Some(end) = value_body.find("</parameter>") else { break };

        params.push((name, value_body[..end].to_string()));
        rest = &value_body[end + "</parameter>".len()..];
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> NormalizeContext {
        NormalizeContext {
            source_id: "src-jsonl".into(),
            device_id: "dev-1".into(),
            project_id: None,
            session_id: Some("ses-1".into()),
            source_kind: SourceKind::JsonlTranscript,
            redact_secrets: true,
        }
    }

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut content = String::new();
        for line in lines {
            content.push_str(line);
            content.push('\n');
        }
        std::fs::write(path, content).unwrap();
    }

    fn user_line(ts: &str, text: &str) -> String {
        serde_json::to_string(&json!({
            "timestamp": ts,
            "message": { "role": "user", "content": text }
        }))
        .unwrap()
    }

    #[test]
    fn tails_across_appends() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ses-1.jsonl");
        let adapter = JsonlAdapter::new(Some(dir.path().to_path_buf()));
        let locator = path.to_string_lossy().to_string();

        write_lines(
            &path,
            &[
                &user_line("2025-01-01T00:00:00Z", "L1"),
                &user_line("2025-01-01T00:00:01Z", "L2"),
            ],
        );
        let first = adapter.ingest(&locator, &ctx(), None).unwrap();
        assert_eq!(first.events.len(), 2);
        assert_eq!(
            first.cursor.byte_offset,
            Some(std::fs::metadata(&path).unwrap().len())
        );

        // Append one more line; only it is ingested.
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str(&user_line("2025-01-01T00:00:02Z", "L3"));
        content.push('\n');
        std::fs::write(&path, &content).unwrap();

        let second = adapter.ingest(&locator, &ctx(), Some(&first.cursor)).unwrap();
        assert_eq!(second.events.len(), 1);
        assert_eq!(second.events[0].text, "L3");
        assert_eq!(second.events[0].source_seq, 2.0);

        // Unchanged input produces nothing.
        let third = adapter.ingest(&locator, &ctx(), Some(&second.cursor)).unwrap();
        assert!(third.events.is_empty());
    }

    #[test]
    fn rotation_restarts_at_zero() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ses-1.jsonl");
        let adapter = JsonlAdapter::new(Some(dir.path().to_path_buf()));
        let locator = path.to_string_lossy().to_string();

        write_lines(
            &path,
            &[
                &user_line("2025-01-01T00:00:00Z", "L1"),
                &user_line("2025-01-01T00:00:01Z", "L2"),
            ],
        );
        let first = adapter.ingest(&locator, &ctx(), None).unwrap();

        // Truncate and rewrite: offset now exceeds the file size.
        write_lines(&path, &[&user_line("2025-01-01T00:00:05Z", "L1'")]);
        let second = adapter.ingest(&locator, &ctx(), Some(&first.cursor)).unwrap();
        assert_eq!(second.events.len(), 1);
        assert_eq!(second.events[0].text, "L1'");
    }

    #[test]
    fn ingest_is_deterministic() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ses-1.jsonl");
        let adapter = JsonlAdapter::new(Some(dir.path().to_path_buf()));
        let locator = path.to_string_lossy().to_string();

        write_lines(&path, &[&user_line("2025-01-01T00:00:00Z", "hello")]);
        let a = adapter.ingest(&locator, &ctx(), None).unwrap();
        let b = adapter.ingest(&locator, &ctx(), None).unwrap();
        assert_eq!(
            a.events.iter().map(|e| e.event_id.clone()).collect::<Vec<_>>(),
            b.events.iter().map(|e| e.event_id.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn tool_use_and_result_are_paired() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ses-1.jsonl");
        let adapter = JsonlAdapter::new(Some(dir.path().to_path_buf()));
        let locator = path.to_string_lossy().to_string();

        let call = serde_json::to_string(&json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "message": {
                "role": "assistant",
                "content": [
                    { "type": "text", "text": "Reading the file." },
                    { "type": "tool_use", "id": "toolu_1", "name": "Read",
                      "input": { "file_path": "/tmp/foo.rs" } }
                ]
            }
        }))
        .unwrap();
        let result = serde_json::to_string(&json!({
            "timestamp": "2025-01-01T00:00:01Z",
            "message": {
                "role": "user",
                "content": [
                    { "type": "tool_result", "tool_use_id": "toolu_1",
                      "content": "fn main() {}" }
                ]
            }
        }))
        .unwrap();
        write_lines(&path, &[&call, &result]);

        let out = adapter.ingest(&locator, &ctx(), None).unwrap();
        let call_event = out
            .events
            .iter()
            .find(|e| e.event_type == EventType::ToolCall)
            .unwrap();
        let result_event = out
            .events
            .iter()
            .find(|e| e.event_type == EventType::ToolResult)
            .unwrap();

        assert_eq!(call_event.tool_name.as_deref(), Some("Read"));
        assert_eq!(call_event.file_paths, vec!["/tmp/foo.rs"]);
        assert_eq!(result_event.source_seq, call_event.source_seq + 0.5);
        assert_eq!(
            result_event.meta.as_ref().unwrap()["tool_call_id"],
            call_event.meta.as_ref().unwrap()["tool_call_id"]
        );
    }

    #[test]
    fn write_content_is_captured() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ses-1.jsonl");
        let adapter = JsonlAdapter::new(Some(dir.path().to_path_buf()));
        let locator = path.to_string_lossy().to_string();

        let call = serde_json::to_string(&json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "message": {
                "role": "assistant",
                "content": [
                    { "type": "tool_use", "id": "toolu_9", "name": "Write",
                      "input": { "file_path": "/tmp/out.txt", "content": "alpha\nbeta\n" } }
                ]
            }
        }))
        .unwrap();
        write_lines(&path, &[&call]);

        let out = adapter.ingest(&locator, &ctx(), None).unwrap();
        let result = out
            .events
            .iter()
            .find(|e| e.event_type == EventType::ToolResult)
            .unwrap();
        assert_eq!(result.text, "alpha\nbeta\n");
        assert_eq!(result.meta.as_ref().unwrap()["is_write_content"], true);
        assert_eq!(result.file_paths, vec!["/tmp/out.txt"]);
    }

    #[test]
    fn token_usage_lands_on_text_event() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ses-1.jsonl");
        let adapter = JsonlAdapter::new(Some(dir.path().to_path_buf()));
        let locator = path.to_string_lossy().to_string();

        let line = serde_json::to_string(&json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "message": {
                "role": "assistant",
                "id": "msg_01",
                "model": "sonnet-4",
                "content": [ { "type": "text", "text": "done" } ],
                "usage": {
                    "input_tokens": 100, "output_tokens": 20,
                    "cache_read_input_tokens": 50, "cache_creation_input_tokens": 10
                }
            }
        }))
        .unwrap();
        write_lines(&path, &[&line]);

        let out = adapter.ingest(&locator, &ctx(), None).unwrap();
        let meta = out.events[0].meta.as_ref().unwrap();
        assert_eq!(meta["tokens"]["input"], 100);
        assert_eq!(meta["tokens"]["cache_write"], 10);
        assert_eq!(meta["model"], "sonnet-4");
        assert_eq!(meta["message_id"], "msg_01");
    }

    #[test]
    fn partial_last_line_is_left_for_next_tick() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ses-1.jsonl");
        let adapter = JsonlAdapter::new(Some(dir.path().to_path_buf()));
        let locator = path.to_string_lossy().to_string();

        let full = user_line("2025-01-01T00:00:00Z", "done");
        let mut content = full.clone();
        content.push('\n');
        content.push_str("{\"half\":");
        std::fs::write(&path, &content).unwrap();

        let out = adapter.ingest(&locator, &ctx(), None).unwrap();
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.cursor.byte_offset, Some(full.len() as u64 + 1));
    }

    #[test]
    fn legacy_block_parses_invocations() {
        let text = "Let me check.\n<function_calls>\
            <invoke name=\"Read\">\
            <parameter name=\"file_path\">/tmp/a.rs</parameter>\
            </invoke></function_calls>\n\
            <result>fn a() {}</result>\nDone.";
        let (leftover, invocations) = parse_legacy_blocks(text);
        assert!(leftover.contains("Let me check."));
        assert!(leftover.contains("Done."));
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].name, "Read");
        assert_eq!(
            invocations[0].params,
            vec![("file_path".to_string(), "/tmp/a.rs".to_string())]
        );
        assert_eq!(invocations[0].result.as_deref(), Some("fn a() {}"));
    }

    #[test]
    fn legacy_block_becomes_paired_events() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ses-1.jsonl");
        let adapter = JsonlAdapter::new(Some(dir.path().to_path_buf()));
        let locator = path.to_string_lossy().to_string();

        let text = "<function_calls><invoke name=\"Bash\">\
            <parameter name=\"command\">ls</parameter>\
            </invoke></function_calls><result>a.txt</result>";
        let line = serde_json::to_string(&json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "message": { "role": "assistant", "content": text }
        }))
        .unwrap();
        write_lines(&path, &[&line]);

        let out = adapter.ingest(&locator, &ctx(), None).unwrap();
        let call = out
            .events
            .iter()
            .find(|e| e.event_type == EventType::ToolCall)
            .unwrap();
        let result = out
            .events
            .iter()
            .find(|e| e.event_type == EventType::ToolResult)
            .unwrap();
        assert_eq!(call.tool_name.as_deref(), Some("Bash"));
        assert_eq!(call.tool_args.as_ref().unwrap()["command"], "ls");
        assert_eq!(result.text, "a.txt");
        assert_eq!(result.source_seq, call.source_seq + 0.5);
    }
}
