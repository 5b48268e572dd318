//! Source adapters: per-harness discovery, tailing, and normalization
//!
//! Every adapter turns a harness-specific on-disk layout into canonical
//! events. Event identity is deterministic: re-running `ingest` over
//! unchanged bytes must produce the same `event_id`s, which the store's
//! `INSERT OR IGNORE` then collapses.

mod git;
mod jsonl;
mod plain;
mod split;

pub use git::{AuthorScope, GitAdapter};
pub use jsonl::JsonlAdapter;
pub use plain::PlainAdapter;
pub use split::SplitAdapter;

use anyhow::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::config::Config;

/// Captured file contents (reads and writes) keep up to this many bytes.
pub const FILE_CAPTURE_CAP: usize = 100_000;
/// Other tool outputs keep up to this many bytes.
pub const TOOL_OUTPUT_CAP: usize = 50_000;

/// Tool names that identify an edit operation.
pub const EDIT_TOOLS: &[&str] = &["edit", "Edit"];
/// Tool names whose results carry full file reads.
pub const READ_TOOLS: &[&str] = &["read", "Read", "read_file"];
/// Tool names whose results carry as-written file contents.
pub const WRITE_TOOLS: &[&str] = &["write", "Write", "write_file"];

/// Capture cap for a given tool's output.
pub fn capture_cap(tool: &str) -> usize {
    if READ_TOOLS.contains(&tool) || WRITE_TOOLS.contains(&tool) {
        FILE_CAPTURE_CAP
    } else {
        TOOL_OUTPUT_CAP
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    JsonlTranscript,
    SplitTranscript,
    PlainTranscript,
    Git,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::JsonlTranscript => "jsonl_transcript",
            SourceKind::SplitTranscript => "split_transcript",
            SourceKind::PlainTranscript => "plain_transcript",
            SourceKind::Git => "git",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "jsonl_transcript" => Some(SourceKind::JsonlTranscript),
            "split_transcript" => Some(SourceKind::SplitTranscript),
            "plain_transcript" => Some(SourceKind::PlainTranscript),
            "git" => Some(SourceKind::Git),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    UserMessage,
    AssistantMessage,
    ToolCall,
    ToolResult,
    GitCommit,
    GitBranch,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserMessage => "user_message",
            EventType::AssistantMessage => "assistant_message",
            EventType::ToolCall => "tool_call",
            EventType::ToolResult => "tool_result",
            EventType::GitCommit => "git_commit",
            EventType::GitBranch => "git_branch",
        }
    }
}

/// Shared normalization context handed to every `ingest` call.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    pub source_id: String,
    pub device_id: String,
    pub project_id: Option<String>,
    pub session_id: Option<String>,
    pub source_kind: SourceKind,
    pub redact_secrets: bool,
}

/// A normalized event before redaction and storage.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_id: String,
    pub source_id: String,
    pub source_seq: f64,
    pub device_id: String,
    pub project_id: Option<String>,
    pub session_id: Option<String>,
    pub event_ts: String,
    pub source_kind: SourceKind,
    pub event_type: EventType,
    pub text: String,
    pub tool_name: Option<String>,
    pub tool_args: Option<Value>,
    pub file_paths: Vec<String>,
    pub meta: Option<Value>,
    pub redaction_manifest: Option<String>,
}

impl NewEvent {
    pub fn new(
        ctx: &NormalizeContext,
        source_seq: f64,
        event_ts: impl Into<String>,
        event_type: EventType,
        text: impl Into<String>,
    ) -> Self {
        Self {
            event_id: String::new(),
            source_id: ctx.source_id.clone(),
            source_seq,
            device_id: ctx.device_id.clone(),
            project_id: ctx.project_id.clone(),
            session_id: ctx.session_id.clone(),
            event_ts: event_ts.into(),
            source_kind: ctx.source_kind,
            event_type,
            text: text.into(),
            tool_name: None,
            tool_args: None,
            file_paths: Vec::new(),
            meta: None,
            redaction_manifest: None,
        }
    }
}

/// Render a sequence number the way it is hashed into event ids:
/// integral values carry no fractional part.
pub fn format_seq(seq: f64) -> String {
    if seq.fract() == 0.0 {
        format!("{}", seq as i64)
    } else {
        format!("{}", seq)
    }
}

/// `event_id = sha256(source_id + ":" + source_seq + ":" + payload_hash)[:32]`
pub fn seal_events(events: &mut [NewEvent]) {
    for event in events {
        let payload_hash = {
            let mut h = Sha256::new();
            h.update(event.event_type.as_str().as_bytes());
            h.update(b"\x1f");
            h.update(event.event_ts.as_bytes());
            h.update(b"\x1f");
            h.update(event.text.as_bytes());
            h.update(b"\x1f");
            h.update(event.tool_name.as_deref().unwrap_or("").as_bytes());
            h.update(b"\x1f");
            if let Some(args) = &event.tool_args {
                h.update(args.to_string().as_bytes());
            }
            hex::encode(h.finalize())
        };
        let id_input = format!(
            "{}:{}:{}",
            event.source_id,
            format_seq(event.source_seq),
            payload_hash
        );
        event.event_id = hex::encode(Sha256::digest(id_input.as_bytes()))[..32].to_string();
    }
}

/// Truncate captured output on a char boundary, marking the cut.
pub fn truncate_capture(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[truncated]", &text[..end])
}

/// Durable per-source ingestion progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorState {
    pub file_inode: Option<u64>,
    pub file_size: Option<u64>,
    pub file_mtime: Option<String>,
    pub byte_offset: Option<u64>,
    pub diff_mtime: Option<String>,
    pub last_event_id: Option<String>,
    pub last_rowid: Option<i64>,
}

/// A locator an adapter found on this machine.
#[derive(Debug, Clone)]
pub struct SourceCandidate {
    pub kind: SourceKind,
    pub locator: String,
    pub working_dir: Option<PathBuf>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub lines_read: usize,
    pub events_emitted: usize,
    pub parse_skips: usize,
}

#[derive(Debug)]
pub struct IngestOutput {
    pub events: Vec<NewEvent>,
    pub cursor: CursorState,
    pub report: IngestReport,
}

pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Locators present on this machine.
    fn discover(&self) -> Result<Vec<SourceCandidate>>;

    /// Working directories seen in transcripts, for git auto-registration.
    fn working_dirs(&self) -> Result<Vec<PathBuf>>;

    /// Hints for a single registered locator.
    fn describe(&self, locator: &str) -> SourceCandidate {
        SourceCandidate {
            kind: self.kind(),
            locator: locator.to_string(),
            working_dir: None,
            session_id: std::path::Path::new(locator)
                .file_stem()
                .and_then(|s| s.to_str())
                .map(String::from),
        }
    }

    /// Read new bytes past `cursor` and normalize them.
    fn ingest(
        &self,
        locator: &str,
        ctx: &NormalizeContext,
        cursor: Option<&CursorState>,
    ) -> Result<IngestOutput>;
}

pub struct AdapterRegistry {
    adapters: Vec<Box<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new(config: &Config) -> Self {
        let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();
        if config.adapter_enabled("jsonl") {
            adapters.push(Box::new(JsonlAdapter::new(config.adapter_path("jsonl"))));
        }
        if config.adapter_enabled("split") {
            adapters.push(Box::new(SplitAdapter::new(config.adapter_path("split"))));
        }
        if config.adapter_enabled("plain") {
            adapters.push(Box::new(PlainAdapter::new(config.adapter_path("plain"))));
        }
        if config.adapter_enabled("git") {
            adapters.push(Box::new(GitAdapter::new(config.git_author_scope())));
        }
        Self { adapters }
    }

    pub fn by_kind(&self, kind: SourceKind) -> Option<&dyn SourceAdapter> {
        self.adapters
            .iter()
            .find(|a| a.kind() == kind)
            .map(|a| a.as_ref())
    }

    pub fn all(&self) -> impl Iterator<Item = &dyn SourceAdapter> {
        self.adapters.iter().map(|a| a.as_ref())
    }

    pub fn register(&mut self, adapter: Box<dyn SourceAdapter>) {
        self.adapters.push(adapter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> NormalizeContext {
        NormalizeContext {
            source_id: "src-abc".into(),
            device_id: "dev-1".into(),
            project_id: None,
            session_id: Some("ses-1".into()),
            source_kind: SourceKind::JsonlTranscript,
            redact_secrets: true,
        }
    }

    #[test]
    fn seq_formatting() {
        assert_eq!(format_seq(3.0), "3");
        assert_eq!(format_seq(3.5), "3.5");
        assert_eq!(format_seq(0.0), "0");
    }

    #[test]
    fn event_ids_are_stable() {
        let make = || {
            let mut events = vec![NewEvent::new(
                &ctx(),
                2.0,
                "2025-01-01T00:00:00.000Z",
                EventType::UserMessage,
                "hello",
            )];
            seal_events(&mut events);
            events.remove(0)
        };
        let a = make();
        let b = make();
        assert_eq!(a.event_id, b.event_id);
        assert_eq!(a.event_id.len(), 32);
    }

    #[test]
    fn event_ids_differ_by_seq_and_payload() {
        let mut events = vec![
            NewEvent::new(&ctx(), 1.0, "t", EventType::UserMessage, "same"),
            NewEvent::new(&ctx(), 2.0, "t", EventType::UserMessage, "same"),
            NewEvent::new(&ctx(), 1.0, "t", EventType::UserMessage, "other"),
        ];
        seal_events(&mut events);
        assert_ne!(events[0].event_id, events[1].event_id);
        assert_ne!(events[0].event_id, events[2].event_id);
    }

    #[test]
    fn truncation_marks_the_cut() {
        let long = "x".repeat(FILE_CAPTURE_CAP + 1000);
        let out = truncate_capture(&long, FILE_CAPTURE_CAP);
        assert!(out.ends_with("[truncated]"));
        assert!(out.len() < long.len());

        let short = "short";
        assert_eq!(truncate_capture(short, FILE_CAPTURE_CAP), "short");
    }
}
