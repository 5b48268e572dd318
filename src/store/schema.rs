//! SQLite schema as forward-only migrations
//!
//! Each entry is applied inside its own transaction and finishes by
//! inserting its version row, so a crash can never leave a partially
//! applied version. `events_fts` is an external-content FTS5 mirror of
//! `(text_redacted, tool_name)` kept in sync by triggers.

/// Applied in order; the runner skips versions at or below
/// `MAX(version)` in `schema_version`.
pub const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_1), (2, MIGRATION_2)];

const MIGRATION_1: &str = r#"
-- ============================================
-- IDENTITY
-- ============================================

CREATE TABLE devices (
    device_id TEXT PRIMARY KEY,
    nickname TEXT,
    created_at TEXT NOT NULL,
    last_seen_at TEXT
);

CREATE TABLE projects (
    project_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    git_remote TEXT,
    root_path TEXT NOT NULL,
    share_policy TEXT NOT NULL DEFAULT 'private',
    created_at TEXT NOT NULL
);

-- ============================================
-- SOURCES & CURSORS
-- ============================================

CREATE TABLE sources (
    source_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,                    -- jsonl_transcript | split_transcript | plain_transcript | git
    locator TEXT NOT NULL,                 -- path or URI-like string
    device_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active', -- active | paused | missing | error
    last_seen_at TEXT,
    redact_secrets INTEGER NOT NULL DEFAULT 1,
    retain_on_delete INTEGER NOT NULL DEFAULT 0,
    encrypt_originals INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE(device_id, locator),
    FOREIGN KEY(device_id) REFERENCES devices(device_id)
);

-- One cursor per source; deleted with the source.
CREATE TABLE cursors (
    source_id TEXT PRIMARY KEY,
    file_inode INTEGER,
    file_size INTEGER,
    file_mtime TEXT,
    byte_offset INTEGER,
    diff_mtime TEXT,
    last_event_id TEXT,
    last_rowid INTEGER,
    updated_at TEXT NOT NULL,
    FOREIGN KEY(source_id) REFERENCES sources(source_id) ON DELETE CASCADE
);

-- Original payloads for sources that opt into encrypt_originals.
CREATE TABLE ciphertexts (
    ciphertext_id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    event_id TEXT,
    algo TEXT NOT NULL,
    nonce BLOB,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY(source_id) REFERENCES sources(source_id) ON DELETE CASCADE
);

-- ============================================
-- EVENTS
-- ============================================

CREATE TABLE events (
    event_id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    source_seq REAL NOT NULL,
    device_id TEXT NOT NULL,
    project_id TEXT,
    session_id TEXT,
    event_ts TEXT NOT NULL,                -- UTC ISO-8601
    ingest_ts TEXT NOT NULL,
    source_kind TEXT NOT NULL,
    event_type TEXT NOT NULL,              -- user_message | assistant_message | tool_call | tool_result | git_commit | git_branch
    text_redacted TEXT NOT NULL DEFAULT '',
    tool_name TEXT,
    tool_args_json TEXT,
    file_paths TEXT,                       -- JSON array
    meta_json TEXT,
    redaction_manifest_json TEXT
);

-- No FK from events to sources: deleting a source without purging
-- intentionally leaves its events behind.

CREATE VIRTUAL TABLE events_fts USING fts5(
    text_redacted,
    tool_name,
    content='events',
    content_rowid='rowid'
);

CREATE TRIGGER events_fts_ai AFTER INSERT ON events BEGIN
    INSERT INTO events_fts(rowid, text_redacted, tool_name)
    VALUES (new.rowid, new.text_redacted, new.tool_name);
END;

CREATE TRIGGER events_fts_ad AFTER DELETE ON events BEGIN
    INSERT INTO events_fts(events_fts, rowid, text_redacted, tool_name)
    VALUES ('delete', old.rowid, old.text_redacted, old.tool_name);
END;

CREATE TRIGGER events_fts_au AFTER UPDATE ON events BEGIN
    INSERT INTO events_fts(events_fts, rowid, text_redacted, tool_name)
    VALUES ('delete', old.rowid, old.text_redacted, old.tool_name);
    INSERT INTO events_fts(rowid, text_redacted, tool_name)
    VALUES (new.rowid, new.text_redacted, new.tool_name);
END;

-- ============================================
-- INDEXES
-- ============================================

CREATE INDEX idx_events_project ON events(project_id);
CREATE INDEX idx_events_session ON events(session_id);
CREATE INDEX idx_events_type ON events(event_type);
CREATE INDEX idx_events_ts ON events(event_ts);
CREATE INDEX idx_events_source_seq ON events(source_id, source_seq);
CREATE INDEX idx_sources_status ON sources(status);

CREATE TABLE schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT INTO schema_version(version, applied_at) VALUES (1, datetime('now'));
"#;

const MIGRATION_2: &str = r#"
ALTER TABLE sources ADD COLUMN error_message TEXT;
CREATE INDEX idx_events_ingest ON events(ingest_ts);

INSERT INTO schema_version(version, applied_at) VALUES (2, datetime('now'));
"#;
