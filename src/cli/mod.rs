//! CLI command implementations

pub mod file;
pub mod ingest;
pub mod search;
pub mod sources;
pub mod stats;
pub mod timeline;
pub mod watch;

use chrono::Utc;
use clap::Args;

use crate::store::QueryFilter;
use crate::timeparse::parse_to_utc_string;

/// Filter flags shared by the query commands.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Lower time bound (unix seconds, "7d", "3 days ago", or ISO-8601)
    #[arg(long)]
    pub since: Option<String>,

    /// Upper time bound (same forms as --since)
    #[arg(long)]
    pub until: Option<String>,

    /// Project id, name, path, or wildcard pattern
    #[arg(long)]
    pub project: Option<String>,

    /// Session id or wildcard pattern
    #[arg(long)]
    pub session: Option<String>,

    /// Event type filter (repeatable)
    #[arg(long = "type")]
    pub event_types: Vec<String>,

    /// Tool name filter (repeatable, wildcards allowed)
    #[arg(long = "tool")]
    pub tools: Vec<String>,

    /// Role shortcut: user or assistant
    #[arg(long)]
    pub role: Option<String>,

    /// Page size
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Zero-based page offset
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
}

impl FilterArgs {
    pub fn to_query(&self) -> QueryFilter {
        let now = Utc::now();
        QueryFilter {
            since: self.since.as_deref().and_then(|s| parse_to_utc_string(s, now)),
            until: self.until.as_deref().and_then(|s| parse_to_utc_string(s, now)),
            project: self.project.clone(),
            session: self.session.clone(),
            event_types: self.event_types.clone(),
            tools: self.tools.clone(),
            role: self.role.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// First line, capped for table output.
pub fn preview(text: &str, max: usize) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    if first_line.len() > max {
        let mut end = max.saturating_sub(3);
        while end > 0 && !first_line.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &first_line[..end])
    } else {
        first_line.to_string()
    }
}

/// "MM-DD HH:MM" out of a canonical timestamp.
pub fn short_ts(ts: &str) -> String {
    if ts.len() >= 16 {
        format!("{} {}", &ts[5..10], &ts[11..16])
    } else {
        ts.to_string()
    }
}
