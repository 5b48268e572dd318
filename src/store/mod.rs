//! Event store - SQLite with a full-text mirror
//!
//! Single embedded database holding devices, projects, sources, cursors,
//! and the append-only event log. Writes are serialized through one
//! connection; WAL keeps readers unblocked. The `(events insert, cursor
//! upsert)` pair for an ingest tick commits in a single transaction.

mod query;
mod schema;

pub use query::{
    AccessedFile, EditFilter, EditRow, EventRow, Page, QueryFilter, TimelineSummary, TokenRow,
};
pub use schema::MIGRATIONS;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::adapter::{CursorState, NewEvent, SourceKind};
use crate::identity::{Device, Project};
use crate::timeparse::now_utc_string;

pub struct Store {
    conn: Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Active,
    Paused,
    Missing,
    Error,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Paused => "paused",
            SourceStatus::Missing => "missing",
            SourceStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SourceStatus::Active),
            "paused" => Some(SourceStatus::Paused),
            "missing" => Some(SourceStatus::Missing),
            "error" => Some(SourceStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceRow {
    pub source_id: String,
    pub kind: SourceKind,
    pub locator: String,
    pub device_id: String,
    pub status: SourceStatus,
    pub error_message: Option<String>,
    pub last_seen_at: Option<String>,
    pub redact_secrets: bool,
    pub retain_on_delete: bool,
    pub encrypt_originals: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SourceOptions {
    pub redact_secrets: bool,
    pub retain_on_delete: bool,
    pub encrypt_originals: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            redact_secrets: true,
            retain_on_delete: false,
            encrypt_originals: false,
        }
    }
}

/// Deterministic source identity: stable for a `(device, locator)` pair.
pub fn derive_source_id(device_id: &str, locator: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(format!("{}:{}", device_id, locator).as_bytes());
    format!("src-{}", &hex::encode(digest)[..16])
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    fn configure(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    /// Apply pending migrations, each in its own transaction.
    fn migrate(&self) -> Result<()> {
        let current = self.schema_version()?;
        for (version, sql) in schema::MIGRATIONS {
            if *version <= current {
                continue;
            }
            let tx = self.conn.unchecked_transaction()?;
            tx.execute_batch(sql)
                .with_context(|| format!("Migration {} failed", version))?;
            tx.commit()?;
        }
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64> {
        let exists: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            [],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(0);
        }
        let version: Option<i64> =
            self.conn
                .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                    row.get(0)
                })?;
        Ok(version.unwrap_or(0))
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // ============================================
    // DEVICES
    // ============================================

    pub fn upsert_device(&self, device: &Device) -> Result<()> {
        self.conn.execute(
            "INSERT INTO devices (device_id, nickname, created_at, last_seen_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(device_id) DO UPDATE SET last_seen_at = excluded.last_seen_at",
            params![
                device.device_id,
                device.nickname,
                device.created_at,
                now_utc_string()
            ],
        )?;
        Ok(())
    }

    // ============================================
    // PROJECTS
    // ============================================

    pub fn upsert_project(&self, project: &Project) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO projects (project_id, display_name, git_remote, root_path, share_policy, created_at)
             VALUES (?, ?, ?, ?, 'private', ?)",
            params![
                project.project_id,
                project.display_name,
                project.git_remote,
                project.root_path,
                now_utc_string()
            ],
        )?;
        Ok(())
    }

    // ============================================
    // SOURCES
    // ============================================

    pub fn register_source(
        &self,
        kind: SourceKind,
        locator: &str,
        device_id: &str,
        opts: SourceOptions,
    ) -> Result<SourceRow> {
        let source_id = derive_source_id(device_id, locator);
        self.conn.execute(
            "INSERT OR IGNORE INTO sources
             (source_id, kind, locator, device_id, status, redact_secrets, retain_on_delete, encrypt_originals, created_at)
             VALUES (?, ?, ?, ?, 'active', ?, ?, ?, ?)",
            params![
                source_id,
                kind.as_str(),
                locator,
                device_id,
                opts.redact_secrets,
                opts.retain_on_delete,
                opts.encrypt_originals,
                now_utc_string()
            ],
        )?;
        self.get_source(&source_id)?
            .context("Source vanished after registration")
    }

    pub fn get_source(&self, source_id: &str) -> Result<Option<SourceRow>> {
        self.conn
            .query_row(
                &format!("{} WHERE source_id = ?", SOURCE_SELECT),
                params![source_id],
                map_source_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn find_source_by_locator(
        &self,
        device_id: &str,
        locator: &str,
    ) -> Result<Option<SourceRow>> {
        self.conn
            .query_row(
                &format!("{} WHERE device_id = ? AND locator = ?", SOURCE_SELECT),
                params![device_id, locator],
                map_source_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_sources(&self, status: Option<SourceStatus>) -> Result<Vec<SourceRow>> {
        let mut rows = Vec::new();
        match status {
            Some(s) => {
                let mut stmt = self.conn.prepare(&format!(
                    "{} WHERE status = ? ORDER BY created_at",
                    SOURCE_SELECT
                ))?;
                let mapped = stmt.query_map(params![s.as_str()], map_source_row)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("{} ORDER BY created_at", SOURCE_SELECT))?;
                let mapped = stmt.query_map([], map_source_row)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
        }
        Ok(rows)
    }

    pub fn set_source_status(
        &self,
        source_id: &str,
        status: SourceStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE sources SET status = ?, error_message = ? WHERE source_id = ?",
            params![status.as_str(), error_message, source_id],
        )?;
        Ok(())
    }

    pub fn touch_source(&self, source_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE sources SET last_seen_at = ? WHERE source_id = ?",
            params![now_utc_string(), source_id],
        )?;
        Ok(())
    }

    /// Remove a source. With `purge` its events go too; otherwise they
    /// are kept. The cursor always goes (FK cascade).
    pub fn delete_source(&self, source_id: &str, purge: bool) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        if purge {
            tx.execute(
                "DELETE FROM events WHERE source_id = ?",
                params![source_id],
            )?;
            tx.execute(
                "DELETE FROM ciphertexts WHERE source_id = ?",
                params![source_id],
            )?;
        }
        tx.execute("DELETE FROM sources WHERE source_id = ?", params![source_id])?;
        tx.commit()?;
        Ok(())
    }

    // ============================================
    // CURSORS
    // ============================================

    pub fn get_cursor(&self, source_id: &str) -> Result<Option<CursorState>> {
        self.conn
            .query_row(
                "SELECT file_inode, file_size, file_mtime, byte_offset, diff_mtime, last_event_id, last_rowid
                 FROM cursors WHERE source_id = ?",
                params![source_id],
                |row| {
                    Ok(CursorState {
                        file_inode: row.get::<_, Option<i64>>(0)?.map(|v| v as u64),
                        file_size: row.get::<_, Option<i64>>(1)?.map(|v| v as u64),
                        file_mtime: row.get(2)?,
                        byte_offset: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
                        diff_mtime: row.get(4)?,
                        last_event_id: row.get(5)?,
                        last_rowid: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    // ============================================
    // EVENTS
    // ============================================

    /// Insert a batch of events and, atomically with it, upsert the
    /// source's cursor. Duplicate event ids are silently ignored;
    /// returns the number of rows actually inserted.
    pub fn insert_events(
        &self,
        events: &[NewEvent],
        cursor: Option<(&str, &CursorState)>,
    ) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0usize;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO events
                 (event_id, source_id, source_seq, device_id, project_id, session_id,
                  event_ts, ingest_ts, source_kind, event_type, text_redacted,
                  tool_name, tool_args_json, file_paths, meta_json, redaction_manifest_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;

            let ingest_ts = now_utc_string();
            for event in events {
                let file_paths = if event.file_paths.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&event.file_paths)?)
                };
                let changed = stmt.execute(params![
                    event.event_id,
                    event.source_id,
                    event.source_seq,
                    event.device_id,
                    event.project_id,
                    event.session_id,
                    event.event_ts,
                    ingest_ts,
                    event.source_kind.as_str(),
                    event.event_type.as_str(),
                    event.text,
                    event.tool_name,
                    event.tool_args.as_ref().map(|v| v.to_string()),
                    file_paths,
                    event.meta.as_ref().map(|v| v.to_string()),
                    event.redaction_manifest,
                ])?;
                inserted += changed;
            }
        }

        if let Some((source_id, cursor)) = cursor {
            tx.execute(
                "INSERT INTO cursors
                 (source_id, file_inode, file_size, file_mtime, byte_offset, diff_mtime, last_event_id, last_rowid, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(source_id) DO UPDATE SET
                     file_inode = excluded.file_inode,
                     file_size = excluded.file_size,
                     file_mtime = excluded.file_mtime,
                     byte_offset = excluded.byte_offset,
                     diff_mtime = excluded.diff_mtime,
                     last_event_id = excluded.last_event_id,
                     last_rowid = excluded.last_rowid,
                     updated_at = excluded.updated_at",
                params![
                    source_id,
                    cursor.file_inode.map(|v| v as i64),
                    cursor.file_size.map(|v| v as i64),
                    cursor.file_mtime,
                    cursor.byte_offset.map(|v| v as i64),
                    cursor.diff_mtime,
                    cursor.last_event_id,
                    cursor.last_rowid,
                    now_utc_string()
                ],
            )?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    pub fn count_events(&self, source_id: Option<&str>) -> Result<u64> {
        let count: i64 = match source_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM events WHERE source_id = ?",
                params![id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }

    // ============================================
    // CIPHERTEXTS
    // ============================================

    /// Store an original payload verbatim for a source that opted into
    /// `encrypt_originals`. At-rest encryption itself is out of scope;
    /// `algo` records what (if anything) was applied.
    pub fn put_ciphertext(
        &self,
        source_id: &str,
        event_id: Option<&str>,
        data: &[u8],
    ) -> Result<()> {
        use sha2::{Digest, Sha256};
        let ciphertext_id = hex::encode(Sha256::digest(data))[..32].to_string();
        self.conn.execute(
            "INSERT OR IGNORE INTO ciphertexts (ciphertext_id, source_id, event_id, algo, nonce, data, created_at)
             VALUES (?, ?, ?, 'none', NULL, ?, ?)",
            params![ciphertext_id, source_id, event_id, data, now_utc_string()],
        )?;
        Ok(())
    }
}

const SOURCE_SELECT: &str = "SELECT source_id, kind, locator, device_id, status, error_message, \
     last_seen_at, redact_secrets, retain_on_delete, encrypt_originals, created_at FROM sources";

fn map_source_row(row: &rusqlite::Row) -> rusqlite::Result<SourceRow> {
    let kind_str: String = row.get(1)?;
    let status_str: String = row.get(4)?;
    Ok(SourceRow {
        source_id: row.get(0)?,
        kind: SourceKind::parse(&kind_str).unwrap_or(SourceKind::JsonlTranscript),
        locator: row.get(2)?,
        device_id: row.get(3)?,
        status: SourceStatus::parse(&status_str).unwrap_or(SourceStatus::Error),
        error_message: row.get(5)?,
        last_seen_at: row.get(6)?,
        redact_secrets: row.get(7)?,
        retain_on_delete: row.get(8)?,
        encrypt_originals: row.get(9)?,
        created_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{seal_events, EventType, NormalizeContext};

    fn test_device() -> Device {
        Device {
            device_id: "dev-test".into(),
            nickname: "test-box".into(),
            created_at: "2025-01-01T00:00:00.000Z".into(),
        }
    }

    fn test_ctx(source_id: &str) -> NormalizeContext {
        NormalizeContext {
            source_id: source_id.into(),
            device_id: "dev-test".into(),
            project_id: None,
            session_id: Some("ses-1".into()),
            source_kind: SourceKind::JsonlTranscript,
            redact_secrets: true,
        }
    }

    fn event(ctx: &NormalizeContext, seq: f64, text: &str) -> NewEvent {
        let mut events = vec![NewEvent::new(
            ctx,
            seq,
            "2025-01-02T03:04:05.000Z",
            EventType::UserMessage,
            text,
        )];
        seal_events(&mut events);
        events.remove(0)
    }

    fn setup() -> (Store, SourceRow) {
        let store = Store::open_in_memory().unwrap();
        store.upsert_device(&test_device()).unwrap();
        let source = store
            .register_source(
                SourceKind::JsonlTranscript,
                "/tmp/session.jsonl",
                "dev-test",
                SourceOptions::default(),
            )
            .unwrap();
        (store, source)
    }

    #[test]
    fn migrations_apply_to_latest() {
        let store = Store::open_in_memory().unwrap();
        let latest = MIGRATIONS.last().unwrap().0;
        assert_eq!(store.schema_version().unwrap(), latest);
    }

    #[test]
    fn migrations_are_idempotent_on_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("recall.db");
        {
            Store::open(&path).unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.schema_version().unwrap(), MIGRATIONS.last().unwrap().0);
    }

    #[test]
    fn source_registration_is_stable() {
        let (store, source) = setup();
        let again = store
            .register_source(
                SourceKind::JsonlTranscript,
                "/tmp/session.jsonl",
                "dev-test",
                SourceOptions::default(),
            )
            .unwrap();
        assert_eq!(source.source_id, again.source_id);
        assert_eq!(store.list_sources(None).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_event_ids_are_ignored() {
        let (store, source) = setup();
        let ctx = test_ctx(&source.source_id);
        let batch = vec![event(&ctx, 0.0, "hello"), event(&ctx, 1.0, "world")];

        let first = store.insert_events(&batch, None).unwrap();
        assert_eq!(first, 2);
        let second = store.insert_events(&batch, None).unwrap();
        assert_eq!(second, 0);
        assert_eq!(store.count_events(Some(&source.source_id)).unwrap(), 2);
    }

    #[test]
    fn cursor_commits_with_batch() {
        let (store, source) = setup();
        let ctx = test_ctx(&source.source_id);
        let cursor = CursorState {
            byte_offset: Some(128),
            file_size: Some(128),
            last_rowid: Some(1),
            ..Default::default()
        };
        store
            .insert_events(&[event(&ctx, 0.0, "x")], Some((&source.source_id, &cursor)))
            .unwrap();

        let loaded = store.get_cursor(&source.source_id).unwrap().unwrap();
        assert_eq!(loaded.byte_offset, Some(128));
        assert_eq!(loaded.last_rowid, Some(1));
    }

    #[test]
    fn delete_source_purges_or_keeps_events() {
        let (store, source) = setup();
        let ctx = test_ctx(&source.source_id);
        store
            .insert_events(&[event(&ctx, 0.0, "keep me")], None)
            .unwrap();

        store.delete_source(&source.source_id, false).unwrap();
        assert_eq!(store.count_events(None).unwrap(), 1);
        assert!(store.get_cursor(&source.source_id).unwrap().is_none());

        let source2 = store
            .register_source(
                SourceKind::JsonlTranscript,
                "/tmp/other.jsonl",
                "dev-test",
                SourceOptions::default(),
            )
            .unwrap();
        let ctx2 = test_ctx(&source2.source_id);
        store
            .insert_events(&[event(&ctx2, 0.0, "purge me")], None)
            .unwrap();
        store.delete_source(&source2.source_id, true).unwrap();
        assert_eq!(store.count_events(Some(&source2.source_id)).unwrap(), 0);
    }

    #[test]
    fn status_transitions_persist() {
        let (store, source) = setup();
        store
            .set_source_status(&source.source_id, SourceStatus::Error, Some("boom"))
            .unwrap();
        let row = store.get_source(&source.source_id).unwrap().unwrap();
        assert_eq!(row.status, SourceStatus::Error);
        assert_eq!(row.error_message.as_deref(), Some("boom"));
    }
}
