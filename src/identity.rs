//! Device identity and project detection
//!
//! A device is a stable per-install identity persisted to a JSON file in
//! the user config dir. A project is derived from the directory an agent
//! worked in: prefer the normalized git remote (stable across clones on
//! different machines), fall back to the absolute root path.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use uuid::Uuid;

use crate::timeparse::now_utc_string;

pub const DEVICE_FILE: &str = "device.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub nickname: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub project_id: String,
    pub display_name: String,
    pub git_remote: Option<String>,
    pub root_path: String,
}

/// Load the persisted device identity, creating it on first call.
pub fn get_or_create_device(config_dir: &Path) -> Result<Device> {
    let path = config_dir.join(DEVICE_FILE);

    if path.exists() {
        let content = fs::read_to_string(&path).context("Failed to read device file")?;
        let device: Device =
            serde_json::from_str(&content).context("Failed to parse device file")?;
        return Ok(device);
    }

    let device = Device {
        device_id: Uuid::new_v4().to_string(),
        nickname: detect_nickname(),
        created_at: now_utc_string(),
    };

    fs::create_dir_all(config_dir)?;
    fs::write(&path, serde_json::to_string_pretty(&device)?)
        .context("Failed to persist device file")?;

    Ok(device)
}

/// Best-effort human-readable machine name.
fn detect_nickname() -> String {
    #[cfg(target_os = "macos")]
    {
        if let Ok(out) = Command::new("scutil").args(["--get", "ComputerName"]).output() {
            if out.status.success() {
                let name = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if !name.is_empty() {
                    return name;
                }
            }
        }
    }

    for var in ["COMPUTERNAME", "HOSTNAME"] {
        if let Ok(name) = std::env::var(var) {
            if !name.is_empty() {
                return name;
            }
        }
    }

    if let Ok(out) = Command::new("hostname").output() {
        if out.status.success() {
            let name = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    "unknown-device".to_string()
}

/// Map a working directory to a project identity.
///
/// Walks up to the repository root if there is one, otherwise treats the
/// directory itself as the project root.
pub fn detect_project(dir: &Path) -> Project {
    let root = find_repo_root(dir);

    match root {
        Some(root) => {
            let remote = read_origin_remote(&root).map(|r| normalize_remote(&r));
            let root_str = root.to_string_lossy().to_string();
            let display_name = match &remote {
                Some(r) => r
                    .rsplit('/')
                    .next()
                    .filter(|s| !s.is_empty())
                    .unwrap_or("project")
                    .to_string(),
                None => last_component(&root),
            };
            let identity = remote.as_deref().unwrap_or(&root_str);
            Project {
                project_id: derive_project_id(&display_name, identity),
                display_name,
                git_remote: remote,
                root_path: root_str,
            }
        }
        None => {
            let root_str = dir.to_string_lossy().to_string();
            let display_name = last_component(dir);
            Project {
                project_id: derive_project_id(&display_name, &root_str),
                display_name,
                git_remote: None,
                root_path: root_str,
            }
        }
    }
}

/// Walk up from `dir` looking for a `.git` entry.
pub fn find_repo_root(dir: &Path) -> Option<PathBuf> {
    let mut current = Some(dir);
    while let Some(candidate) = current {
        if candidate.join(".git").exists() {
            return Some(candidate.to_path_buf());
        }
        current = candidate.parent();
    }
    None
}

/// Read the origin URL from `.git/config` without spawning git.
fn read_origin_remote(root: &Path) -> Option<String> {
    let git_config = root.join(".git/config");
    let content = fs::read_to_string(git_config).ok()?;

    let mut in_origin = false;
    for line in content.lines() {
        if line.contains("[remote \"origin\"]") {
            in_origin = true;
        } else if in_origin && line.trim().starts_with("url = ") {
            return Some(line.trim().strip_prefix("url = ")?.to_string());
        } else if line.starts_with('[') {
            in_origin = false;
        }
    }
    None
}

/// Collapse SSH and HTTPS remote forms to `host/owner/name`.
pub fn normalize_remote(url: &str) -> String {
    let url = url.trim();
    let url = url.strip_suffix(".git").unwrap_or(url);

    // scp-like: git@host:owner/name
    if !url.contains("://") {
        if let Some((user_host, path)) = url.split_once(':') {
            let host = user_host.rsplit('@').next().unwrap_or(user_host);
            return format!("{}/{}", host, path.trim_start_matches('/'));
        }
        return url.to_string();
    }

    // scheme://[user[:pass]@]host/owner/name
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let rest = rest.rsplit('@').next().unwrap_or(rest);
    rest.trim_end_matches('/').to_string()
}

/// `slug(display_name)[:20] + "-" + sha256(remote_or_root)[:16]`
pub fn derive_project_id(display_name: &str, identity: &str) -> String {
    let slug = slug(display_name);
    let prefix: String = slug.chars().take(20).collect();
    let digest = Sha256::digest(identity.as_bytes());
    format!("{}-{}", prefix, &hex::encode(digest)[..16])
}

fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}

fn last_component(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn device_is_created_once() {
        let dir = TempDir::new().unwrap();
        let first = get_or_create_device(dir.path()).unwrap();
        let second = get_or_create_device(dir.path()).unwrap();
        assert_eq!(first.device_id, second.device_id);
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn remote_forms_collapse() {
        assert_eq!(
            normalize_remote("git@github.com:acme/widgets.git"),
            "github.com/acme/widgets"
        );
        assert_eq!(
            normalize_remote("https://github.com/acme/widgets.git"),
            "github.com/acme/widgets"
        );
        assert_eq!(
            normalize_remote("ssh://git@github.com/acme/widgets"),
            "github.com/acme/widgets"
        );
        assert_eq!(
            normalize_remote("https://user@github.com/acme/widgets"),
            "github.com/acme/widgets"
        );
    }

    #[test]
    fn project_ids_match_across_remote_forms() {
        let a = derive_project_id("widgets", &normalize_remote("git@github.com:acme/widgets.git"));
        let b = derive_project_id(
            "widgets",
            &normalize_remote("https://github.com/acme/widgets"),
        );
        assert_eq!(a, b);
        assert!(a.starts_with("widgets-"));
    }

    #[test]
    fn slug_truncates_and_normalizes() {
        let id = derive_project_id("My Very Long Project Name Overflows", "x");
        let (prefix, _) = id.rsplit_once('-').unwrap();
        assert!(prefix.len() <= 20);
        assert!(!prefix.contains(' '));
    }

    #[test]
    fn non_repo_dir_uses_path_identity() {
        let dir = TempDir::new().unwrap();
        let project = detect_project(dir.path());
        assert!(project.git_remote.is_none());
        assert_eq!(project.root_path, dir.path().to_string_lossy());
    }

    #[test]
    fn repo_root_found_from_subdir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::create_dir_all(dir.path().join("src/deep")).unwrap();
        let root = find_repo_root(&dir.path().join("src/deep")).unwrap();
        assert_eq!(root, dir.path());
    }
}
