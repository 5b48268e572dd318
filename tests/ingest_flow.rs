//! End-to-end ingestion and retrieval scenarios
//!
//! Each test drives the real pipeline: transcript files on disk, the
//! jsonl adapter through the orchestrator, cursor persistence in the
//! store, and the query primitives on the way back out.

use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use recall::adapter::{
    seal_events, AdapterRegistry, EventType, NewEvent, NormalizeContext, SourceKind,
};
use recall::config::{AdapterConfig, Config};
use recall::identity::Device;
use recall::ingest::Ingestor;
use recall::reconstruct::{reconstruct, ReconstructError, Strategy};
use recall::store::{EditFilter, QueryFilter, SourceOptions, SourceRow, Store};

const DEVICE_ID: &str = "dev-test";

struct Harness {
    _tmp: tempfile::TempDir,
    store: Store,
    config: Config,
    jsonl_dir: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let tmp = tempfile::TempDir::new().unwrap();
        let jsonl_dir = tmp.path().join("jsonl/project-a");
        std::fs::create_dir_all(&jsonl_dir).unwrap();

        let mut config = Config::default();
        config.adapters.insert(
            "jsonl".into(),
            AdapterConfig {
                base_path: Some(tmp.path().join("jsonl").to_string_lossy().to_string()),
                ..Default::default()
            },
        );
        for name in ["split", "plain", "git"] {
            config.adapters.insert(
                name.into(),
                AdapterConfig {
                    enabled: Some(false),
                    ..Default::default()
                },
            );
        }

        let store = Store::open_in_memory().unwrap();
        store
            .upsert_device(&Device {
                device_id: DEVICE_ID.into(),
                nickname: "test".into(),
                created_at: "2025-01-01T00:00:00.000Z".into(),
            })
            .unwrap();

        Self {
            _tmp: tmp,
            store,
            config,
            jsonl_dir,
        }
    }

    fn registry(&self) -> AdapterRegistry {
        AdapterRegistry::new(&self.config)
    }

    fn session_file(&self, name: &str) -> PathBuf {
        self.jsonl_dir.join(name)
    }

    fn register(&self, path: &Path) -> SourceRow {
        self.store
            .register_source(
                SourceKind::JsonlTranscript,
                &path.to_string_lossy(),
                DEVICE_ID,
                SourceOptions::default(),
            )
            .unwrap()
    }

    fn ingest(&self, registry: &AdapterRegistry, source: &SourceRow) -> usize {
        let ingestor = Ingestor::new(&self.store, registry, DEVICE_ID);
        ingestor.ingest_source(source).unwrap().unwrap()
    }
}

fn user_line(ts: &str, text: &str) -> String {
    serde_json::to_string(&json!({
        "timestamp": ts,
        "message": { "role": "user", "content": text }
    }))
    .unwrap()
}

fn append_line(path: &Path, line: &str) {
    let mut content = std::fs::read_to_string(path).unwrap_or_default();
    content.push_str(line);
    content.push('\n');
    std::fs::write(path, content).unwrap();
}

fn synthetic_event(
    source_id: &str,
    seq: f64,
    ts: &str,
    event_type: EventType,
    text: &str,
) -> NewEvent {
    let ctx = NormalizeContext {
        source_id: source_id.into(),
        device_id: DEVICE_ID.into(),
        project_id: None,
        session_id: Some("ses-test".into()),
        source_kind: SourceKind::JsonlTranscript,
        redact_secrets: false,
    };
    NewEvent::new(&ctx, seq, ts, event_type, text)
}

fn edit_event(source_id: &str, seq: f64, ts: &str, file: &str, old: &str, new: &str) -> NewEvent {
    let mut event = synthetic_event(
        source_id,
        seq,
        ts,
        EventType::ToolCall,
        &format!("edit {}", file),
    );
    event.tool_name = Some("Edit".into());
    event.tool_args = Some(json!({
        "file_path": file,
        "old_string": old,
        "new_string": new,
    }));
    event.file_paths = vec![file.to_string()];
    event
}

// ============================================
// SCENARIO 1: cursor across appends
// ============================================

#[test]
fn cursor_across_appends() {
    let h = Harness::new();
    let registry = h.registry();
    let path = h.session_file("ses-1.jsonl");

    append_line(&path, &user_line("2025-02-01T10:00:00Z", "L1"));
    append_line(&path, &user_line("2025-02-01T10:00:01Z", "L2"));
    let source = h.register(&path);

    assert_eq!(h.ingest(&registry, &source), 2);
    let cursor = h.store.get_cursor(&source.source_id).unwrap().unwrap();
    assert_eq!(
        cursor.byte_offset,
        Some(std::fs::metadata(&path).unwrap().len())
    );

    append_line(&path, &user_line("2025-02-01T10:00:02Z", "L3"));
    assert_eq!(h.ingest(&registry, &source), 1);

    // No changes: zero events, same cursor.
    assert_eq!(h.ingest(&registry, &source), 0);
    assert_eq!(h.store.count_events(Some(&source.source_id)).unwrap(), 3);

    // Events come back in file order.
    let (page, _) = h
        .store
        .timeline(&QueryFilter {
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    let texts: Vec<&str> = page.rows.iter().map(|r| r.text_redacted.as_str()).collect();
    assert_eq!(texts, vec!["L1", "L2", "L3"]);
}

// ============================================
// SCENARIO 2: rotation
// ============================================

#[test]
fn rotation_keeps_old_events() {
    let h = Harness::new();
    let registry = h.registry();
    let path = h.session_file("ses-1.jsonl");

    append_line(&path, &user_line("2025-02-01T10:00:00Z", "L1"));
    append_line(&path, &user_line("2025-02-01T10:00:01Z", "L2"));
    let source = h.register(&path);
    assert_eq!(h.ingest(&registry, &source), 2);

    // Truncate to zero and write new content: offset exceeds size.
    std::fs::write(&path, "").unwrap();
    append_line(&path, &user_line("2025-02-01T11:00:00Z", "R1 after rotation"));

    assert_eq!(h.ingest(&registry, &source), 1);
    assert_eq!(h.store.count_events(Some(&source.source_id)).unwrap(), 3);

    let page = h
        .store
        .search("rotation", &QueryFilter { limit: 10, ..Default::default() })
        .unwrap();
    assert_eq!(page.total, 1);

    // The pre-rotation events are still present.
    let page = h
        .store
        .search("L2", &QueryFilter { limit: 10, ..Default::default() })
        .unwrap();
    assert_eq!(page.total, 1);
}

// ============================================
// SCENARIO 3: redaction round trip
// ============================================

#[test]
fn redaction_end_to_end() {
    let h = Harness::new();
    let registry = h.registry();
    let path = h.session_file("ses-1.jsonl");

    let original = "token is sk-ABCDEFGHIJKLMNOPQRSTUVWX";
    append_line(&path, &user_line("2025-02-01T10:00:00Z", original));
    let source = h.register(&path);
    h.ingest(&registry, &source);

    let (page, _) = h
        .store
        .timeline(&QueryFilter { limit: 10, ..Default::default() })
        .unwrap();
    let row = &page.rows[0];
    assert_eq!(row.text_redacted, "token is [REDACTED:api_key]");

    let manifest: serde_json::Value =
        serde_json::from_str(row.redaction_manifest_json.as_ref().unwrap()).unwrap();
    let entry = &manifest["redactions"][0];
    let (start, end) = (
        entry["start"].as_u64().unwrap() as usize,
        entry["end"].as_u64().unwrap() as usize,
    );
    assert_eq!(&original[start..end], "sk-ABCDEFGHIJKLMNOPQRSTUVWX");

    let expected_hash = &hex::encode(Sha256::digest(b"sk-ABCDEFGHIJKLMNOPQRSTUVWX"))[..16];
    assert_eq!(entry["original_hash"].as_str().unwrap(), expected_hash);

    // The secret is not findable; the marker is.
    assert_eq!(
        h.store
            .search("ABCDEFGHIJKLMNOPQRSTUVWX", &QueryFilter { limit: 10, ..Default::default() })
            .unwrap()
            .total,
        0
    );
}

// ============================================
// SCENARIOS 4 & 5: edit replay reconstruction
// ============================================

fn seed_edit_stream(h: &Harness, source_id: &str, with_bad_edit: bool) {
    let mut events = vec![
        edit_event(source_id, 0.0, "2025-02-01T10:00:00.000Z", "foo.txt", "", "a\nb\n"),
        edit_event(
            source_id,
            1.0,
            "2025-02-01T10:00:01.000Z",
            "foo.txt",
            "a\nb\n",
            "a\nB\nc\n",
        ),
    ];
    if with_bad_edit {
        events.push(edit_event(
            source_id,
            2.0,
            "2025-02-01T10:00:02.000Z",
            "foo.txt",
            "nonexistent",
            "x",
        ));
    }
    events.push(edit_event(
        source_id,
        3.0,
        "2025-02-01T10:00:03.000Z",
        "foo.txt",
        "c\n",
        "C\n",
    ));
    seal_events(&mut events);
    h.store.insert_events(&events, None).unwrap();
}

#[test]
fn reconstruct_replays_edits() {
    let h = Harness::new();
    let source = h.register(&h.session_file("ses-1.jsonl"));
    seed_edit_stream(&h, &source.source_id, false);

    let result = reconstruct(&h.store, "foo.txt", None, None).unwrap();
    assert_eq!(result.text, "a\nB\nC\n");
    assert_eq!(result.strategy, Strategy::Replay);
    assert_eq!(result.applied, 3);
    assert_eq!(result.failed, 0);
    assert_eq!(result.total, 3);
}

#[test]
fn reconstruct_skips_unmatched_edits() {
    let h = Harness::new();
    let source = h.register(&h.session_file("ses-1.jsonl"));
    seed_edit_stream(&h, &source.source_id, true);

    let result = reconstruct(&h.store, "foo.txt", None, None).unwrap();
    assert_eq!(result.text, "a\nB\nC\n");
    assert_eq!(result.applied, 3);
    assert_eq!(result.failed, 1);
    assert_eq!(result.total, 4);
}

#[test]
fn reconstruct_prefers_complete_snapshot() {
    let h = Harness::new();
    let source = h.register(&h.session_file("ses-1.jsonl"));
    seed_edit_stream(&h, &source.source_id, false);

    // A substantially complete read snapshot wins over replay.
    let snapshot_text = format!("{}\n", "x".repeat(1500));
    let mut call = synthetic_event(
        &source.source_id,
        10.0,
        "2025-02-01T12:00:00.000Z",
        EventType::ToolCall,
        "read foo.txt",
    );
    call.tool_name = Some("Read".into());
    call.file_paths = vec!["foo.txt".into()];
    call.meta = Some(json!({ "tool_call_id": "t1" }));
    let mut result_event = synthetic_event(
        &source.source_id,
        10.5,
        "2025-02-01T12:00:00.000Z",
        EventType::ToolResult,
        &snapshot_text,
    );
    result_event.tool_name = Some("Read".into());
    result_event.file_paths = vec!["foo.txt".into()];
    result_event.meta = Some(json!({ "tool_call_id": "t1" }));

    let mut events = vec![call, result_event];
    seal_events(&mut events);
    h.store.insert_events(&events, None).unwrap();

    let result = reconstruct(&h.store, "foo.txt", None, None).unwrap();
    assert_eq!(result.strategy, Strategy::Snapshot);
    assert_eq!(result.text, snapshot_text);

    // Bounded before the snapshot, replay takes over again.
    let earlier = reconstruct(&h.store, "foo.txt", Some("2025-02-01T11:00:00.000Z"), None).unwrap();
    assert_eq!(earlier.strategy, Strategy::Replay);
    assert_eq!(earlier.text, "a\nB\nC\n");
}

#[test]
fn reconstruct_fails_without_any_material() {
    let h = Harness::new();
    match reconstruct(&h.store, "never-seen.txt", None, None) {
        Err(ReconstructError::NotReconstructible(path)) => {
            assert_eq!(path, "never-seen.txt");
        }
        other => panic!("expected NotReconstructible, got {:?}", other.map(|r| r.text)),
    }
}

// ============================================
// SCENARIO 6: search pagination
// ============================================

#[test]
fn search_pagination_returns_total() {
    let h = Harness::new();
    let source = h.register(&h.session_file("ses-1.jsonl"));

    let mut events = vec![];
    for i in 0..42 {
        events.push(synthetic_event(
            &source.source_id,
            i as f64,
            &format!("2025-02-01T10:{:02}:00.000Z", i % 60),
            EventType::UserMessage,
            &format!("auth attempt number {}", i),
        ));
    }
    // Decoys that must not match.
    for i in 0..5 {
        events.push(synthetic_event(
            &source.source_id,
            100.0 + i as f64,
            "2025-02-01T11:00:00.000Z",
            EventType::UserMessage,
            &format!("unrelated message {}", i),
        ));
    }
    seal_events(&mut events);
    h.store.insert_events(&events, None).unwrap();

    let page = h
        .store
        .search(
            "auth",
            &QueryFilter {
                event_types: vec!["user_message".into()],
                limit: 10,
                offset: 30,
                ..Default::default()
            },
        )
        .unwrap();

    // total lets the caller page without a second query.
    assert_eq!(page.rows.len(), 10);
    assert_eq!(page.total, 42);
    for row in &page.rows {
        assert!(row.score.is_some());
        assert!(row.text_redacted.contains("auth"));
    }

    // The final page returns only the remainder.
    let tail = h
        .store
        .search(
            "auth",
            &QueryFilter {
                event_types: vec!["user_message".into()],
                limit: 10,
                offset: 40,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(tail.rows.len(), 2);
    assert_eq!(tail.total, 42);
}

// ============================================
// INVARIANTS
// ============================================

#[test]
fn reingestion_is_idempotent_at_the_store() {
    let h = Harness::new();
    let registry = h.registry();
    let path = h.session_file("ses-1.jsonl");
    append_line(&path, &user_line("2025-02-01T10:00:00Z", "only once"));
    let source = h.register(&path);

    assert_eq!(h.ingest(&registry, &source), 1);

    // Force a full re-read by dropping the cursor state: same bytes,
    // same event ids, zero new rows.
    let empty = Default::default();
    let adapter = registry.by_kind(SourceKind::JsonlTranscript).unwrap();
    let ctx = NormalizeContext {
        source_id: source.source_id.clone(),
        device_id: DEVICE_ID.into(),
        project_id: None,
        session_id: Some("ses-1".into()),
        source_kind: SourceKind::JsonlTranscript,
        redact_secrets: true,
    };
    let out = adapter
        .ingest(&path.to_string_lossy(), &ctx, Some(&empty))
        .unwrap();
    let inserted = h.store.insert_events(&out.events, None).unwrap();
    assert_eq!(inserted, 0);
    assert_eq!(h.store.count_events(Some(&source.source_id)).unwrap(), 1);
}

#[test]
fn fts_stays_consistent_with_deletes() {
    let h = Harness::new();
    let source = h.register(&h.session_file("ses-1.jsonl"));

    let mut events = vec![synthetic_event(
        &source.source_id,
        0.0,
        "2025-02-01T10:00:00.000Z",
        EventType::UserMessage,
        "needle in the haystack",
    )];
    seal_events(&mut events);
    h.store.insert_events(&events, None).unwrap();

    let hit = |q: &str| {
        h.store
            .search(q, &QueryFilter { limit: 10, ..Default::default() })
            .unwrap()
            .total
    };
    assert_eq!(hit("needle"), 1);

    h.store.delete_source(&source.source_id, true).unwrap();
    assert_eq!(hit("needle"), 0);
}

#[test]
fn timeline_window_and_summary() {
    let h = Harness::new();
    let source = h.register(&h.session_file("ses-1.jsonl"));

    let mut events = vec![
        synthetic_event(
            &source.source_id,
            0.0,
            "2025-02-01T09:00:00.000Z",
            EventType::UserMessage,
            "before window",
        ),
        synthetic_event(
            &source.source_id,
            1.0,
            "2025-02-01T10:30:00.000Z",
            EventType::UserMessage,
            "inside window",
        ),
    ];
    let mut commit = synthetic_event(
        &source.source_id,
        2.0,
        "2025-02-01T10:45:00.000Z",
        EventType::GitCommit,
        "fix the bug",
    );
    commit.meta = Some(json!({ "sha": "abc", "insertions": 12, "deletions": 4 }));
    events.push(commit);
    seal_events(&mut events);
    h.store.insert_events(&events, None).unwrap();

    let (page, summary) = h
        .store
        .timeline(&QueryFilter {
            since: Some("2025-02-01T10:00:00.000Z".into()),
            until: Some("2025-02-01T11:00:00.000Z".into()),
            limit: 10,
            ..Default::default()
        })
        .unwrap();

    assert_eq!(page.total, 2);
    for row in &page.rows {
        assert!(row.event_ts.as_str() >= "2025-02-01T10:00:00.000Z");
        assert!(row.event_ts.as_str() <= "2025-02-01T11:00:00.000Z");
    }
    assert_eq!(summary.commit_count, 1);
    assert_eq!(summary.insertions, 12);
    assert_eq!(summary.deletions, 4);
    assert_eq!(summary.counts_by_type["user_message"], 1);
}

#[test]
fn project_filter_resolves_through_the_chain() {
    let h = Harness::new();
    let source = h.register(&h.session_file("ses-1.jsonl"));

    h.store
        .upsert_project(&recall::identity::Project {
            project_id: "widgets-abcdef0123456789".into(),
            display_name: "widgets".into(),
            git_remote: Some("github.com/acme/widgets".into()),
            root_path: "/home/user/widgets".into(),
        })
        .unwrap();

    let mut event = synthetic_event(
        &source.source_id,
        0.0,
        "2025-02-01T10:00:00.000Z",
        EventType::UserMessage,
        "hello from widgets",
    );
    event.project_id = Some("widgets-abcdef0123456789".into());
    let mut events = vec![event];
    seal_events(&mut events);
    h.store.insert_events(&events, None).unwrap();

    let count = |project: &str| {
        let (page, _) = h
            .store
            .timeline(&QueryFilter {
                project: Some(project.to_string()),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        page.total
    };

    // Exact id, display name, root path, id prefix, name substring,
    // root-path prefix of a subdirectory, and wildcard all resolve.
    assert_eq!(count("widgets-abcdef0123456789"), 1);
    assert_eq!(count("widgets"), 1);
    assert_eq!(count("/home/user/widgets"), 1);
    assert_eq!(count("widgets-abc"), 1);
    assert_eq!(count("idget"), 1);
    assert_eq!(count("/home/user/widgets/src/lib.rs"), 1);
    assert_eq!(count("widgets-*"), 1);

    // Unresolvable input matches nothing, not everything.
    assert_eq!(count("no-such-project"), 0);
}

#[test]
fn edits_are_queryable_by_file() {
    let h = Harness::new();
    let source = h.register(&h.session_file("ses-1.jsonl"));
    seed_edit_stream(&h, &source.source_id, false);

    let edits = h
        .store
        .get_edits(&EditFilter {
            file_path: Some("foo".into()),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(edits.len(), 3);
    assert_eq!(edits[0].file_path, "foo.txt");
    assert_eq!(edits[0].old_string, "");
    assert_eq!(edits[0].new_string, "a\nb\n");

    let none = h
        .store
        .get_edits(&EditFilter {
            file_path: Some("bar".into()),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn latest_file_content_resolves_via_pairing() {
    let h = Harness::new();
    let source = h.register(&h.session_file("ses-1.jsonl"));

    // The result event carries no file_paths of its own; resolution
    // goes through the shared tool_call_id.
    let mut call = synthetic_event(
        &source.source_id,
        0.0,
        "2025-02-01T10:00:00.000Z",
        EventType::ToolCall,
        "write bar.txt",
    );
    call.tool_name = Some("Write".into());
    call.file_paths = vec!["bar.txt".into()];
    call.meta = Some(json!({ "tool_call_id": "w1" }));
    let mut old = synthetic_event(
        &source.source_id,
        0.5,
        "2025-02-01T10:00:00.000Z",
        EventType::ToolResult,
        "old contents",
    );
    old.tool_name = Some("Write".into());
    old.meta = Some(json!({ "tool_call_id": "w1", "is_write_content": true }));

    let mut call2 = call.clone();
    call2.source_seq = 1.0;
    call2.event_ts = "2025-02-01T11:00:00.000Z".into();
    call2.meta = Some(json!({ "tool_call_id": "w2" }));
    let mut newer = synthetic_event(
        &source.source_id,
        1.5,
        "2025-02-01T11:00:00.000Z",
        EventType::ToolResult,
        "new contents",
    );
    newer.tool_name = Some("Write".into());
    newer.meta = Some(json!({ "tool_call_id": "w2", "is_write_content": true }));

    let mut events = vec![call, old, call2, newer];
    seal_events(&mut events);
    h.store.insert_events(&events, None).unwrap();

    let latest = h
        .store
        .get_latest_file_content("bar.txt", None)
        .unwrap()
        .unwrap();
    assert_eq!(latest.text_redacted, "new contents");

    let bounded = h
        .store
        .get_latest_file_content("bar.txt", Some("2025-02-01T10:30:00.000Z"))
        .unwrap()
        .unwrap();
    assert_eq!(bounded.text_redacted, "old contents");
}

#[test]
fn token_rows_feed_the_aggregator() {
    let h = Harness::new();
    let source = h.register(&h.session_file("ses-1.jsonl"));

    let mut event = synthetic_event(
        &source.source_id,
        0.0,
        "2025-02-01T10:00:00.000Z",
        EventType::AssistantMessage,
        "done",
    );
    event.meta = Some(json!({
        "model": "sonnet-4",
        "message_id": "msg_1",
        "tokens": { "input": 100, "output": 25, "cache_read": 5, "cache_write": 2 }
    }));
    let mut events = vec![event];
    seal_events(&mut events);
    h.store.insert_events(&events, None).unwrap();

    let rows = h
        .store
        .token_usage_rows(&QueryFilter::default())
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].model.as_deref(), Some("sonnet-4"));
    assert_eq!(rows[0].input, 100);

    let stats = recall::usage::aggregate(&rows, &std::collections::HashMap::new());
    assert_eq!(stats.totals.output, 25);
    assert_eq!(stats.unknown_models, vec!["sonnet-4"]);
}

#[test]
fn accessed_files_are_grouped() {
    let h = Harness::new();
    let source = h.register(&h.session_file("ses-1.jsonl"));
    seed_edit_stream(&h, &source.source_id, false);

    let files = h
        .store
        .list_accessed_files(&QueryFilter { limit: 10, ..Default::default() })
        .unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_path, "foo.txt");
    assert_eq!(files[0].access_count, 3);
    assert_eq!(files[0].tools_used, vec!["Edit"]);
    assert_eq!(files[0].last_accessed, "2025-02-01T10:00:03.000Z");
}
