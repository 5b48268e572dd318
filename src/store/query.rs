//! Query primitives: search, timeline, edits, file history, token rows
//!
//! All filters share the same vocabulary: inclusive UTC time bounds
//! (compared as datetimes, never as raw strings), a project input that is
//! either a wildcard pattern or resolved through a fallback chain, and
//! zero-based pagination that also reports the unpaginated total.

use anyhow::Result;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;

use super::Store;
use crate::adapter::{EDIT_TOOLS, READ_TOOLS, WRITE_TOOLS};

/// A read snapshot below this size, or one that stops mid-line, is
/// treated as truncated and unusable for reconstruction.
const SNAPSHOT_MIN_BYTES: usize = 1000;
const SNAPSHOT_TERMINATORS: &[char] = &['}', ')', '`', '\n'];

#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// Inclusive lower bound, canonical UTC string.
    pub since: Option<String>,
    /// Inclusive upper bound, canonical UTC string.
    pub until: Option<String>,
    /// Project id, name, path, or wildcard pattern.
    pub project: Option<String>,
    /// Session id or wildcard pattern.
    pub session: Option<String>,
    pub event_types: Vec<String>,
    pub tools: Vec<String>,
    /// `user` or `assistant`.
    pub role: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub event_id: String,
    pub source_id: String,
    pub source_seq: f64,
    pub device_id: String,
    pub project_id: Option<String>,
    pub session_id: Option<String>,
    pub event_ts: String,
    pub ingest_ts: String,
    pub source_kind: String,
    pub event_type: String,
    pub text_redacted: String,
    pub tool_name: Option<String>,
    pub tool_args_json: Option<String>,
    pub file_paths: Option<String>,
    pub meta_json: Option<String>,
    pub redaction_manifest_json: Option<String>,
    /// Higher-is-better relevance, present on search results only.
    pub score: Option<f64>,
}

impl EventRow {
    pub fn meta(&self) -> Option<Value> {
        self.meta_json.as_deref().and_then(|m| serde_json::from_str(m).ok())
    }

    pub fn paths(&self) -> Vec<String> {
        self.file_paths
            .as_deref()
            .and_then(|p| serde_json::from_str(p).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub rows: Vec<T>,
    /// Row count of the unpaginated query.
    pub total: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TimelineSummary {
    pub counts_by_type: HashMap<String, u64>,
    pub commit_count: u64,
    pub insertions: i64,
    pub deletions: i64,
}

#[derive(Debug, Clone, Default)]
pub struct EditFilter {
    pub since: Option<String>,
    pub until: Option<String>,
    pub project: Option<String>,
    pub session: Option<String>,
    /// Substring match against the edit's file path argument.
    pub file_path: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct EditRow {
    pub event_id: String,
    pub event_ts: String,
    pub session_id: Option<String>,
    pub tool_name: String,
    pub file_path: String,
    pub old_string: String,
    pub new_string: String,
    pub meta_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccessedFile {
    pub file_path: String,
    pub last_accessed: String,
    pub access_count: u64,
    pub tools_used: Vec<String>,
}

/// Raw material for the token-usage aggregator.
#[derive(Debug, Clone)]
pub struct TokenRow {
    pub source_id: String,
    pub session_id: Option<String>,
    pub event_ts: String,
    pub model: Option<String>,
    pub message_id: Option<String>,
    pub input: i64,
    pub output: i64,
    pub cache_read: i64,
    pub cache_write: i64,
}

const EVENT_COLS: &str = "e.event_id, e.source_id, e.source_seq, e.device_id, e.project_id, \
     e.session_id, e.event_ts, e.ingest_ts, e.source_kind, e.event_type, e.text_redacted, \
     e.tool_name, e.tool_args_json, e.file_paths, e.meta_json, e.redaction_manifest_json";

fn map_event(row: &rusqlite::Row, score_col: Option<usize>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        event_id: row.get(0)?,
        source_id: row.get(1)?,
        source_seq: row.get(2)?,
        device_id: row.get(3)?,
        project_id: row.get(4)?,
        session_id: row.get(5)?,
        event_ts: row.get(6)?,
        ingest_ts: row.get(7)?,
        source_kind: row.get(8)?,
        event_type: row.get(9)?,
        text_redacted: row.get(10)?,
        tool_name: row.get(11)?,
        tool_args_json: row.get(12)?,
        file_paths: row.get(13)?,
        meta_json: row.get(14)?,
        redaction_manifest_json: row.get(15)?,
        // BM25 is negated so the returned score is higher-is-better.
        score: match score_col {
            Some(idx) => Some(-row.get::<_, f64>(idx)?),
            None => None,
        },
    })
}

struct WhereBuilder {
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl WhereBuilder {
    fn new() -> Self {
        Self {
            clauses: Vec::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, clause: impl Into<String>, values: Vec<SqlValue>) {
        self.clauses.push(clause.into());
        self.params.extend(values);
    }

    fn sql(&self, prefix: &str) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("{}{}", prefix, self.clauses.join(" AND "))
        }
    }
}

fn has_wildcard(input: &str) -> bool {
    input.contains('*') || input.contains('%')
}

fn to_like_pattern(input: &str) -> String {
    input.replace('*', "%")
}

impl Store {
    /// Resolve a project input to a filter value.
    ///
    /// Wildcards short-circuit into a LIKE pattern. Otherwise the chain:
    /// exact id, exact display name, exact root path, id prefix, display
    /// name substring, longest root-path prefix containing the input.
    fn resolve_project(&self, input: &str) -> Result<ProjectMatch> {
        if has_wildcard(input) {
            return Ok(ProjectMatch::Pattern(to_like_pattern(input)));
        }

        let lookups: &[(&str, String)] = &[
            ("SELECT project_id FROM projects WHERE project_id = ?", input.to_string()),
            ("SELECT project_id FROM projects WHERE display_name = ?", input.to_string()),
            ("SELECT project_id FROM projects WHERE root_path = ?", input.to_string()),
            (
                "SELECT project_id FROM projects WHERE project_id LIKE ? ORDER BY project_id LIMIT 1",
                format!("{}%", input),
            ),
            (
                "SELECT project_id FROM projects WHERE display_name LIKE ? ORDER BY display_name LIMIT 1",
                format!("%{}%", input),
            ),
            (
                "SELECT project_id FROM projects WHERE ? LIKE root_path || '%' ORDER BY LENGTH(root_path) DESC LIMIT 1",
                input.to_string(),
            ),
        ];

        for (sql, param) in lookups {
            let found: Option<String> = self
                .conn()
                .query_row(sql, params![param], |row| row.get(0))
                .optional()?;
            if let Some(id) = found {
                return Ok(ProjectMatch::Id(id));
            }
        }

        // Unresolvable input filters to nothing rather than everything.
        Ok(ProjectMatch::Id(input.to_string()))
    }

    fn apply_filter(&self, filter: &QueryFilter, w: &mut WhereBuilder) -> Result<()> {
        if let Some(since) = &filter.since {
            w.push(
                "datetime(e.event_ts) >= datetime(?)",
                vec![SqlValue::from(since.clone())],
            );
        }
        if let Some(until) = &filter.until {
            w.push(
                "datetime(e.event_ts) <= datetime(?)",
                vec![SqlValue::from(until.clone())],
            );
        }

        if let Some(project) = &filter.project {
            match self.resolve_project(project)? {
                ProjectMatch::Id(id) => {
                    w.push("e.project_id = ?", vec![SqlValue::from(id)]);
                }
                ProjectMatch::Pattern(p) => {
                    w.push("e.project_id LIKE ?", vec![SqlValue::from(p)]);
                }
            }
        }

        if let Some(session) = &filter.session {
            if has_wildcard(session) {
                w.push(
                    "e.session_id LIKE ?",
                    vec![SqlValue::from(to_like_pattern(session))],
                );
            } else {
                w.push("e.session_id = ?", vec![SqlValue::from(session.clone())]);
            }
        }

        let mut types = filter.event_types.clone();
        match filter.role.as_deref() {
            Some("user") => types.push("user_message".to_string()),
            Some("assistant") => types.push("assistant_message".to_string()),
            _ => {}
        }
        if !types.is_empty() {
            let marks = vec!["?"; types.len()].join(", ");
            w.push(
                format!("e.event_type IN ({})", marks),
                types.into_iter().map(SqlValue::from).collect(),
            );
        }

        if !filter.tools.is_empty() {
            if filter.tools.iter().any(|t| has_wildcard(t)) {
                let ors = vec!["e.tool_name LIKE ?"; filter.tools.len()].join(" OR ");
                w.push(
                    format!("({})", ors),
                    filter
                        .tools
                        .iter()
                        .map(|t| SqlValue::from(to_like_pattern(t)))
                        .collect(),
                );
            } else {
                let marks = vec!["?"; filter.tools.len()].join(", ");
                w.push(
                    format!("e.tool_name IN ({})", marks),
                    filter
                        .tools
                        .iter()
                        .map(|t| SqlValue::from(t.clone()))
                        .collect(),
                );
            }
        }

        Ok(())
    }

    // ============================================
    // SEARCH
    // ============================================

    /// Full-text search with BM25 ranking (best first).
    pub fn search(&self, query: &str, filter: &QueryFilter) -> Result<Page<EventRow>> {
        let match_query = match fts_match_query(query) {
            Some(q) => q,
            None => return Ok(Page { rows: vec![], total: 0 }),
        };

        let mut w = WhereBuilder::new();
        w.push("events_fts MATCH ?", vec![SqlValue::from(match_query)]);
        self.apply_filter(filter, &mut w)?;

        let base = format!(
            "FROM events_fts JOIN events e ON e.rowid = events_fts.rowid {}",
            w.sql("WHERE ")
        );

        let total: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) {}", base),
            params_from_iter(w.params.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {}, bm25(events_fts) AS rank {} ORDER BY rank LIMIT ? OFFSET ?",
            EVENT_COLS, base
        );
        let mut all_params = w.params.clone();
        all_params.push(SqlValue::from(effective_limit(filter.limit)));
        all_params.push(SqlValue::from(filter.offset as i64));

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(all_params.iter()), |row| {
                map_event(row, Some(16))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            rows,
            total: total as u64,
        })
    }

    // ============================================
    // TIMELINE
    // ============================================

    /// Chronological page plus aggregates over the whole filtered set.
    pub fn timeline(&self, filter: &QueryFilter) -> Result<(Page<EventRow>, TimelineSummary)> {
        let mut w = WhereBuilder::new();
        self.apply_filter(filter, &mut w)?;
        let where_sql = w.sql("WHERE ");

        let total: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM events e {}", where_sql),
            params_from_iter(w.params.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM events e {} ORDER BY datetime(e.event_ts) ASC LIMIT ? OFFSET ?",
            EVENT_COLS, where_sql
        );
        let mut page_params = w.params.clone();
        page_params.push(SqlValue::from(effective_limit(filter.limit)));
        page_params.push(SqlValue::from(filter.offset as i64));

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(page_params.iter()), |row| {
                map_event(row, None)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut summary = TimelineSummary::default();

        let counts_sql = format!(
            "SELECT e.event_type, COUNT(*) FROM events e {} GROUP BY e.event_type",
            where_sql
        );
        let mut stmt = self.conn().prepare(&counts_sql)?;
        let counts = stmt.query_map(params_from_iter(w.params.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for entry in counts {
            let (event_type, count) = entry?;
            if event_type == "git_commit" {
                summary.commit_count = count as u64;
            }
            summary.counts_by_type.insert(event_type, count as u64);
        }

        let stats_where = if where_sql.is_empty() {
            "WHERE e.event_type = 'git_commit'".to_string()
        } else {
            format!("{} AND e.event_type = 'git_commit'", where_sql)
        };
        let (insertions, deletions): (i64, i64) = self.conn().query_row(
            &format!(
                "SELECT COALESCE(SUM(json_extract(e.meta_json, '$.insertions')), 0),
                        COALESCE(SUM(json_extract(e.meta_json, '$.deletions')), 0)
                 FROM events e {}",
                stats_where
            ),
            params_from_iter(w.params.iter()),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        summary.insertions = insertions;
        summary.deletions = deletions;

        Ok((
            Page {
                rows,
                total: total as u64,
            },
            summary,
        ))
    }

    // ============================================
    // EDITS & FILE CONTENT
    // ============================================

    /// Edit-tool calls with their parsed old/new strings.
    pub fn get_edits(&self, filter: &EditFilter) -> Result<Vec<EditRow>> {
        let mut w = WhereBuilder::new();
        self.apply_filter(
            &QueryFilter {
                since: filter.since.clone(),
                until: filter.until.clone(),
                project: filter.project.clone(),
                session: filter.session.clone(),
                ..Default::default()
            },
            &mut w,
        )?;

        let marks = vec!["?"; EDIT_TOOLS.len()].join(", ");
        w.push(
            format!("e.tool_name IN ({})", marks),
            EDIT_TOOLS.iter().map(|t| SqlValue::from(t.to_string())).collect(),
        );
        w.push("e.event_type = 'tool_call'", vec![]);

        let sql = format!(
            "SELECT e.event_id, e.event_ts, e.session_id, e.tool_name, e.tool_args_json, e.meta_json
             FROM events e {} ORDER BY datetime(e.event_ts) ASC, e.source_seq ASC",
            w.sql("WHERE ")
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(w.params.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut edits = Vec::new();
        for (event_id, event_ts, session_id, tool_name, args_json, meta_json) in raw {
            let args: Value = match args_json.as_deref().and_then(|a| serde_json::from_str(a).ok())
            {
                Some(v) => v,
                None => continue,
            };
            let file_path = match extract_arg(&args, &["file_path", "filePath", "path"]) {
                Some(p) => p,
                None => continue,
            };
            if let Some(needle) = &filter.file_path {
                if !file_path.contains(needle.as_str()) {
                    continue;
                }
            }
            edits.push(EditRow {
                event_id,
                event_ts,
                session_id,
                tool_name,
                file_path,
                old_string: extract_arg(&args, &["old_string", "oldString"]).unwrap_or_default(),
                new_string: extract_arg(&args, &["new_string", "newString"]).unwrap_or_default(),
                meta_json,
            });
            if filter.limit > 0 && edits.len() >= filter.limit {
                break;
            }
        }

        Ok(edits)
    }

    /// Most recent captured content for a file, via the result's own
    /// path list or the call/result pairing.
    pub fn get_latest_file_content(
        &self,
        file_path: &str,
        before: Option<&str>,
    ) -> Result<Option<EventRow>> {
        let rows = self.file_snapshots(file_path, None, before, "DESC", 1, read_write_tools())?;
        Ok(rows.into_iter().next())
    }

    /// Time-ordered read/write snapshots for a file.
    pub fn get_file_history(
        &self,
        file_path: &str,
        since: Option<&str>,
        until: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EventRow>> {
        self.file_snapshots(file_path, since, until, "ASC", limit, read_write_tools())
    }

    /// Most recent read result that is substantially complete: large
    /// enough and not cut mid-line.
    pub fn find_read_result(
        &self,
        file_path: &str,
        before: Option<&str>,
    ) -> Result<Option<EventRow>> {
        let candidates =
            self.file_snapshots(file_path, None, before, "DESC", 25, READ_TOOLS.to_vec())?;
        Ok(candidates.into_iter().find(|row| {
            let text = &row.text_redacted;
            text.len() >= SNAPSHOT_MIN_BYTES
                && text
                    .chars()
                    .last()
                    .map(|c| SNAPSHOT_TERMINATORS.contains(&c))
                    .unwrap_or(false)
        }))
    }

    fn file_snapshots(
        &self,
        file_path: &str,
        since: Option<&str>,
        until: Option<&str>,
        order: &str,
        limit: usize,
        tools: Vec<&str>,
    ) -> Result<Vec<EventRow>> {
        // Numbered placeholders: 1-4 are fixed, the IN-list follows.
        let marks = (0..tools.len())
            .map(|i| format!("?{}", i + 5))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {cols} FROM events e
             WHERE e.event_type = 'tool_result'
               AND e.tool_name IN ({marks})
               AND (e.file_paths LIKE '%' || ?1 || '%'
                    OR EXISTS (
                        SELECT 1 FROM events c
                        WHERE c.event_type = 'tool_call'
                          AND c.source_id = e.source_id
                          AND json_extract(c.meta_json, '$.tool_call_id') IS NOT NULL
                          AND json_extract(c.meta_json, '$.tool_call_id') =
                              json_extract(e.meta_json, '$.tool_call_id')
                          AND c.file_paths LIKE '%' || ?1 || '%'))
               AND (?2 IS NULL OR datetime(e.event_ts) >= datetime(?2))
               AND (?3 IS NULL OR datetime(e.event_ts) <= datetime(?3))
             ORDER BY datetime(e.event_ts) {order}
             LIMIT ?4",
            cols = EVENT_COLS,
            marks = marks,
            order = order,
        );

        let mut values: Vec<SqlValue> = vec![
            SqlValue::from(file_path.to_string()),
            since
                .map(|s| SqlValue::from(s.to_string()))
                .unwrap_or(SqlValue::Null),
            until
                .map(|s| SqlValue::from(s.to_string()))
                .unwrap_or(SqlValue::Null),
            SqlValue::from(effective_limit(limit)),
        ];
        values.extend(tools.iter().map(|t| SqlValue::from(t.to_string())));

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| map_event(row, None))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ============================================
    // ACCESSED FILES & TOKEN ROWS
    // ============================================

    /// Group tool calls by the file they touched.
    pub fn list_accessed_files(&self, filter: &QueryFilter) -> Result<Vec<AccessedFile>> {
        let mut w = WhereBuilder::new();
        self.apply_filter(filter, &mut w)?;
        w.push("e.event_type = 'tool_call'", vec![]);
        w.push("e.file_paths IS NOT NULL", vec![]);

        let sql = format!(
            "SELECT e.event_ts, e.tool_name, e.file_paths FROM events e {}",
            w.sql("WHERE ")
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(w.params.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut grouped: HashMap<String, AccessedFile> = HashMap::new();
        for (event_ts, tool_name, paths_json) in raw {
            let paths: Vec<String> = match serde_json::from_str(&paths_json) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let path = match paths.into_iter().next() {
                Some(p) => p,
                None => continue,
            };
            let entry = grouped.entry(path.clone()).or_insert_with(|| AccessedFile {
                file_path: path,
                last_accessed: event_ts.clone(),
                access_count: 0,
                tools_used: Vec::new(),
            });
            entry.access_count += 1;
            if event_ts > entry.last_accessed {
                entry.last_accessed = event_ts;
            }
            if let Some(tool) = tool_name {
                if !entry.tools_used.contains(&tool) {
                    entry.tools_used.push(tool);
                }
            }
        }

        let mut files: Vec<AccessedFile> = grouped.into_values().collect();
        files.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        Ok(files)
    }

    /// Events carrying model-reported token counts.
    pub fn token_usage_rows(&self, filter: &QueryFilter) -> Result<Vec<TokenRow>> {
        let mut w = WhereBuilder::new();
        self.apply_filter(filter, &mut w)?;
        w.push("json_extract(e.meta_json, '$.tokens') IS NOT NULL", vec![]);

        let sql = format!(
            "SELECT e.source_id, e.session_id, e.event_ts, e.meta_json FROM events e {}",
            w.sql("WHERE ")
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(w.params.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut rows = Vec::new();
        for (source_id, session_id, event_ts, meta_json) in raw {
            let meta: Value = match serde_json::from_str(&meta_json) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let tokens = &meta["tokens"];
            let grab = |key: &str| tokens.get(key).and_then(|v| v.as_i64()).unwrap_or(0);
            rows.push(TokenRow {
                source_id,
                session_id,
                event_ts,
                model: meta.get("model").and_then(|v| v.as_str()).map(String::from),
                message_id: meta
                    .get("message_id")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                input: grab("input"),
                output: grab("output"),
                cache_read: grab("cache_read"),
                cache_write: grab("cache_write"),
            });
        }
        Ok(rows)
    }
}

enum ProjectMatch {
    Id(String),
    Pattern(String),
}

/// `limit = 0` means unbounded.
fn effective_limit(limit: usize) -> i64 {
    if limit == 0 {
        i64::MAX
    } else {
        limit as i64
    }
}

fn read_write_tools() -> Vec<&'static str> {
    READ_TOOLS.iter().chain(WRITE_TOOLS.iter()).copied().collect()
}

fn extract_arg(args: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(v) = args.get(key).and_then(|v| v.as_str()) {
            return Some(v.to_string());
        }
    }
    None
}

/// Normalize a raw user query into an FTS5 MATCH expression.
///
/// Unescapes `\|`, flattens `(a|b|c)` groups, maps `|` to OR and literal
/// AND to whitespace, strips slashes and regex meta-characters, then
/// quotes any term that is not purely alphanumeric/underscore. Terms are
/// joined with OR.
pub fn fts_match_query(raw: &str) -> Option<String> {
    let mut s = raw.replace("\\|", "|");
    s = s.replace(['(', ')'], " ");
    s = s.replace('|', " OR ");

    // Literal AND between terms means plain conjunction of words.
    s = s
        .split_whitespace()
        .map(|t| if t == "AND" { "" } else { t })
        .collect::<Vec<_>>()
        .join(" ");

    // Strip forward slashes and regex metas; quotes survive for phrases.
    s = s
        .chars()
        .filter(|c| !matches!(c, '/' | '[' | ']' | '{' | '}' | '^' | '$' | '.' | '*' | '+' | '?' | '\\'))
        .collect();

    let mut terms: Vec<String> = Vec::new();
    for token in split_terms(&s) {
        if token == "OR" || token.is_empty() {
            continue;
        }
        if token.starts_with('"') && token.ends_with('"') && token.len() >= 2 {
            terms.push(token);
        } else if token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            terms.push(token);
        } else {
            terms.push(format!("\"{}\"", token.replace('"', "\"\"")));
        }
    }

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Whitespace split that keeps double-quoted phrases together.
fn split_terms(s: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in s.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    terms.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        terms.push(current);
    }
    terms
}
