//! Git repository adapter
//!
//! Uses the git CLI directly (no libgit2) for portability. Commits are
//! read with two log passes over the same range (numstat for counts,
//! name-status for change kinds) zipped by sha; branch switches come
//! from the HEAD reflog. Sequence numbers are commit timestamps, so a
//! re-read of an overlapping range regenerates identical event ids.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{
    seal_events, CursorState, EventType, IngestOutput, IngestReport, NewEvent, NormalizeContext,
    SourceAdapter, SourceCandidate, SourceKind,
};
use crate::timeparse::to_utc_string;

/// First-run lookback for a newly registered repository.
const INITIAL_LOOKBACK_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorScope {
    /// Only commits by the locally configured author identity.
    Me,
    /// Every commit in range.
    All,
}

pub struct GitAdapter {
    scope: AuthorScope,
}

#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub sha: String,
    pub short_sha: String,
    pub subject: String,
    pub author_name: String,
    pub author_email: String,
    pub ts: DateTime<Utc>,
    pub parents: Vec<String>,
    pub branch: Option<String>,
    pub files: Vec<FileChange>,
}

#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: String,
    pub status: String,
    pub insertions: i64,
    pub deletions: i64,
}

#[derive(Debug, Clone)]
pub struct BranchSwitch {
    pub from: String,
    pub to: String,
    pub from_sha: String,
    pub to_sha: String,
    pub ts: DateTime<Utc>,
}

/// Execute a git command in a repository and return the trimmed stdout.
fn git_at(repo: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(repo)
        .args(args)
        .output()
        .context("failed to invoke git")?;

    if !output.status.success() {
        anyhow::bail!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

impl GitAdapter {
    pub fn new(scope: AuthorScope) -> Self {
        Self { scope }
    }

    fn author_filter(&self, repo: &Path) -> Option<String> {
        if self.scope == AuthorScope::All {
            return None;
        }
        git_at(repo, &["config", "user.email"])
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| git_at(repo, &["config", "user.name"]).ok())
            .filter(|s| !s.is_empty())
    }

    /// Commits in `[since, now]`, restricted to the configured author
    /// scope, with per-file change stats.
    pub fn commits_since(&self, repo: &Path, since: &str) -> Result<Vec<CommitInfo>> {
        let since_arg = format!("--since={}", since);
        let format = "--format=\u{1}%H\u{1f}%h\u{1f}%s\u{1f}%an\u{1f}%ae\u{1f}%cI\u{1f}%P";

        let mut numstat_args = vec!["log", since_arg.as_str(), format, "--numstat"];
        let mut status_args = vec!["log", since_arg.as_str(), format, "--name-status"];
        let author_arg;
        if let Some(author) = self.author_filter(repo) {
            author_arg = format!("--author={}", author);
            numstat_args.insert(2, author_arg.as_str());
            status_args.insert(2, author_arg.as_str());
        }

        let numstat_out = match git_at(repo, &numstat_args) {
            Ok(out) => out,
            // A freshly initialized repository has no log yet.
            Err(e) if e.to_string().contains("does not have any commits") => {
                return Ok(vec![]);
            }
            Err(e) => return Err(e),
        };
        let mut commits = parse_log_numstat(&numstat_out)?;

        // Second pass fills in change kinds (A/M/D/R).
        let status_out = git_at(repo, &status_args)?;
        let statuses = parse_log_name_status(&status_out);
        for commit in &mut commits {
            if let Some(by_path) = statuses.get(&commit.sha) {
                for file in &mut commit.files {
                    if let Some(status) = by_path.get(&file.path) {
                        file.status = status.clone();
                    }
                }
            }
        }

        // Best-effort branch attribution.
        for commit in &mut commits {
            commit.branch = git_at(
                repo,
                &[
                    "branch",
                    "--contains",
                    &commit.sha,
                    "--format=%(refname:short)",
                ],
            )
            .ok()
            .and_then(|out| out.lines().next().map(|l| l.trim().to_string()))
            .filter(|b| !b.is_empty());
        }

        Ok(commits)
    }

    /// Branch switches parsed from the HEAD reflog.
    pub fn branch_switches_since(&self, repo: &Path, since: &str) -> Result<Vec<BranchSwitch>> {
        let since_ts = DateTime::parse_from_rfc3339(since)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now() - Duration::days(INITIAL_LOOKBACK_DAYS));

        let head_log = repo.join(".git/logs/HEAD");
        let content = match std::fs::read_to_string(&head_log) {
            Ok(c) => c,
            Err(_) => return Ok(vec![]),
        };

        let mut switches = vec![];
        for line in content.lines() {
            if let Some(switch) = parse_reflog_line(line) {
                if switch.ts >= since_ts {
                    switches.push(switch);
                }
            }
        }
        Ok(switches)
    }
}

impl SourceAdapter for GitAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Git
    }

    fn discover(&self) -> Result<Vec<SourceCandidate>> {
        // Repositories are registered from the working dirs the
        // transcript adapters report; nothing to scan globally.
        Ok(vec![])
    }

    fn working_dirs(&self) -> Result<Vec<PathBuf>> {
        Ok(vec![])
    }

    fn describe(&self, locator: &str) -> SourceCandidate {
        SourceCandidate {
            kind: SourceKind::Git,
            locator: locator.to_string(),
            working_dir: Some(PathBuf::from(locator)),
            session_id: None,
        }
    }

    fn ingest(
        &self,
        locator: &str,
        ctx: &NormalizeContext,
        cursor: Option<&CursorState>,
    ) -> Result<IngestOutput> {
        let repo = Path::new(locator);
        if !repo.join(".git").exists() {
            anyhow::bail!("Not a git repository: {}", locator);
        }

        let since = cursor
            .and_then(|c| c.file_mtime.clone())
            .unwrap_or_else(|| to_utc_string(Utc::now() - Duration::days(INITIAL_LOOKBACK_DAYS)));

        let mut report = IngestReport::default();
        let mut events: Vec<NewEvent> = Vec::new();

        for commit in self.commits_since(repo, &since)? {
            report.lines_read += 1;
            let ts = to_utc_string(commit.ts);
            let mut event = NewEvent::new(
                ctx,
                commit.ts.timestamp() as f64,
                &ts,
                EventType::GitCommit,
                &commit.subject,
            );
            event.file_paths = commit.files.iter().map(|f| f.path.clone()).collect();
            let insertions: i64 = commit.files.iter().map(|f| f.insertions).sum();
            let deletions: i64 = commit.files.iter().map(|f| f.deletions).sum();
            event.meta = Some(json!({
                "sha": commit.sha,
                "short_sha": commit.short_sha,
                "author": commit.author_name,
                "email": commit.author_email,
                "parents": commit.parents,
                "branch": commit.branch,
                "insertions": insertions,
                "deletions": deletions,
                "files": commit.files.iter().map(|f| json!({
                    "path": f.path,
                    "status": f.status,
                    "insertions": f.insertions,
                    "deletions": f.deletions,
                })).collect::<Vec<_>>(),
            }));
            events.push(event);
        }

        for switch in self.branch_switches_since(repo, &since)? {
            report.lines_read += 1;
            let ts = to_utc_string(switch.ts);
            let mut event = NewEvent::new(
                ctx,
                switch.ts.timestamp() as f64,
                &ts,
                EventType::GitBranch,
                format!("checkout: moving from {} to {}", switch.from, switch.to),
            );
            event.meta = Some(json!({
                "from": switch.from,
                "to": switch.to,
                "from_sha": switch.from_sha,
                "to_sha": switch.to_sha,
            }));
            events.push(event);
        }

        seal_events(&mut events);
        report.events_emitted = events.len();

        Ok(IngestOutput {
            events,
            cursor: CursorState {
                // The watermark for the next tick.
                file_mtime: Some(to_utc_string(Utc::now())),
                ..Default::default()
            },
            report,
        })
    }
}

fn parse_log_numstat(output: &str) -> Result<Vec<CommitInfo>> {
    let mut commits = vec![];

    for record in output.split('\u{1}') {
        if record.trim().is_empty() {
            continue;
        }
        let mut lines = record.lines();
        let header = match lines.next() {
            Some(h) => h,
            None => continue,
        };
        let fields: Vec<&str> = header.split('\u{1f}').collect();
        if fields.len() < 7 {
            continue;
        }

        let ts = DateTime::parse_from_rfc3339(fields[5])
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        let mut files = vec![];
        for line in lines {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() != 3 || parts[2].is_empty() {
                continue;
            }
            files.push(FileChange {
                path: parts[2].to_string(),
                status: "M".to_string(),
                insertions: parts[0].parse().unwrap_or(0),
                deletions: parts[1].parse().unwrap_or(0),
            });
        }

        commits.push(CommitInfo {
            sha: fields[0].to_string(),
            short_sha: fields[1].to_string(),
            subject: fields[2].to_string(),
            author_name: fields[3].to_string(),
            author_email: fields[4].to_string(),
            ts,
            parents: fields[6]
                .split_whitespace()
                .map(String::from)
                .collect(),
            branch: None,
            files,
        });
    }

    Ok(commits)
}

/// sha -> path -> status letter from a `--name-status` pass.
fn parse_log_name_status(output: &str) -> HashMap<String, HashMap<String, String>> {
    let mut by_sha = HashMap::new();

    for record in output.split('\u{1}') {
        if record.trim().is_empty() {
            continue;
        }
        let mut lines = record.lines();
        let header = match lines.next() {
            Some(h) => h,
            None => continue,
        };
        let sha = match header.split('\u{1f}').next() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => continue,
        };

        let mut by_path = HashMap::new();
        for line in lines {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 2 {
                continue;
            }
            // R100 old new: record under the new path, status R.
            let status = parts[0].chars().next().unwrap_or('M').to_string();
            let path = parts.last().unwrap_or(&"").to_string();
            if !path.is_empty() {
                by_path.insert(path, status);
            }
        }
        by_sha.insert(sha, by_path);
    }

    by_sha
}

/// `<old> <new> <ident> <epoch> <tz>\tcheckout: moving from A to B`
fn parse_reflog_line(line: &str) -> Option<BranchSwitch> {
    let (left, message) = line.split_once('\t')?;
    let rest = message.strip_prefix("checkout: moving from ")?;
    let (from, to) = rest.split_once(" to ")?;

    let tokens: Vec<&str> = left.split_whitespace().collect();
    if tokens.len() < 4 {
        return None;
    }
    let epoch: i64 = tokens[tokens.len() - 2].parse().ok()?;
    let ts = DateTime::from_timestamp(epoch, 0)?;

    Some(BranchSwitch {
        from: from.to_string(),
        to: to.trim().to_string(),
        from_sha: tokens[0].to_string(),
        to_sha: tokens[1].to_string(),
        ts,
    })
}
