//! Parsers for captured `git` output. Nothing in here spawns a process.
use std::{path::PathBuf, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

static BRANCH_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^## (?:No commits yet on |Initial commit on )?(?P<branch>.+?)(?:\.\.\.(?P<tracking>\S+))?(?: \[(?:ahead (?P<ahead>\d+))?(?:, )?(?:behind (?P<behind>\d+))?(?:gone)?\])?$",
    )
    .expect("branch header regex is valid")
});

static SHORTSTAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d+) files? changed(?:, (\d+) insertions?\(\+\))?(?:, (\d+) deletions?\(-\))?",
    )
    .expect("shortstat regex is valid")
});

const DETACHED_HEAD: &str = "HEAD (no branch)";

/// One path from `git status --porcelain=v1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFile {
    pub path: String,
    pub index: char,
    pub working_dir: char,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PorcelainStatus {
    pub current: Option<String>,
    pub tracking: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub files: Vec<StatusFile>,
}

/// Parse `git status --porcelain=v1 -b` output.
pub fn parse_porcelain_status(text: &str) -> PorcelainStatus {
    let mut status = PorcelainStatus::default();
    for line in text.lines() {
        if line.starts_with("## ") {
            if let Some(caps) = BRANCH_HEADER.captures(line) {
                let branch = &caps["branch"];
                if branch != DETACHED_HEAD {
                    status.current = Some(branch.to_string());
                }
                status.tracking = caps.name("tracking").map(|m| m.as_str().to_string());
                status.ahead = caps
                    .name("ahead")
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0);
                status.behind = caps
                    .name("behind")
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0);
            }
            continue;
        }
        if let Some(file) = parse_status_line(line) {
            status.files.push(file);
        }
    }
    status
}

fn parse_status_line(line: &str) -> Option<StatusFile> {
    let mut codes = line.chars();
    let index = codes.next()?;
    let working_dir = codes.next()?;
    let raw = line.get(3..).filter(|p| !p.is_empty())?;
    let path = if matches!(index, 'R' | 'C') || matches!(working_dir, 'R' | 'C') {
        raw.split_once(" -> ").map_or(raw, |(_, new)| new)
    } else {
        raw
    };
    Some(StatusFile {
        path: unquote_path(path),
        index,
        working_dir,
    })
}

/// Undo git's C-style quoting of unusual paths (`"a\tb"`, `"caf\303\251"`).
pub fn unquote_path(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) else {
        return raw.to_string();
    };
    let mut bytes = Vec::with_capacity(inner.len());
    let mut it = inner.bytes().peekable();
    while let Some(b) = it.next() {
        if b != b'\\' {
            bytes.push(b);
            continue;
        }
        match it.next() {
            Some(b'n') => bytes.push(b'\n'),
            Some(b't') => bytes.push(b'\t'),
            Some(b'r') => bytes.push(b'\r'),
            Some(b'a') => bytes.push(0x07),
            Some(b'b') => bytes.push(0x08),
            Some(b'f') => bytes.push(0x0c),
            Some(b'v') => bytes.push(0x0b),
            Some(d @ b'0'..=b'7') => {
                let mut value = u32::from(d - b'0');
                for _ in 0..2 {
                    if let Some(&(n @ b'0'..=b'7')) = it.peek() {
                        value = value * 8 + u32::from(n - b'0');
                        it.next();
                    }
                }
                bytes.push(value as u8);
            }
            Some(other) => bytes.push(other),
            None => bytes.push(b'\\'),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Paths left unmerged by a merge or rebase, from plain `status --porcelain` output.
pub fn conflict_files(status_text: &str) -> Vec<String> {
    status_text
        .lines()
        .filter(|line| matches!(line.get(..2), Some("UU" | "AA" | "DD")))
        .filter_map(|line| line.get(3..))
        .map(unquote_path)
        .collect()
}

pub fn contains_any_phrase(text: &str, phrases: &[&str]) -> bool {
    let lower = text.to_lowercase();
    phrases.iter().any(|p| lower.contains(p))
}

/// Entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub head: Option<String>,
    /// Full ref, e.g. `refs/heads/main`.
    pub branch: Option<String>,
    pub bare: bool,
    pub detached: bool,
}

pub fn parse_worktree_list(text: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;
    for line in text.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            entries.extend(current.take());
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                ..Default::default()
            });
            continue;
        }
        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(head) = line.strip_prefix("HEAD ") {
            entry.head = Some(head.to_string());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            entry.branch = Some(branch.to_string());
        } else if line == "bare" {
            entry.bare = true;
        } else if line == "detached" {
            entry.detached = true;
        }
    }
    entries.extend(current);
    entries
}

/// `<remote>/<branch>` split at the first separator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBranchRef {
    pub remote: String,
    pub branch: String,
}

impl RemoteBranchRef {
    pub fn canonical_ref(&self) -> String {
        format!("refs/remotes/{}/{}", self.remote, self.branch)
    }
}

impl std::fmt::Display for RemoteBranchRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.remote, self.branch)
    }
}

/// Parse `origin/feature/x` (or `refs/remotes/origin/feature/x`). Strings
/// without a separator, or with one at the start or end, are rejected.
pub fn parse_remote_branch(input: &str) -> Option<RemoteBranchRef> {
    let trimmed = input.trim();
    let s = trimmed.strip_prefix("refs/remotes/").unwrap_or(trimmed);
    let idx = s.find('/')?;
    if idx == 0 || s.ends_with('/') {
        return None;
    }
    Some(RemoteBranchRef {
        remote: s[..idx].to_string(),
        branch: s[idx + 1..].to_string(),
    })
}

/// Parsed change type from `--name-status` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
    TypeChanged,
    Unmerged,
    Unknown(String),
}

impl ChangeType {
    fn from_code(code: &str) -> Self {
        match code.chars().next() {
            Some('A') => ChangeType::Added,
            Some('M') => ChangeType::Modified,
            Some('D') => ChangeType::Deleted,
            Some('R') => ChangeType::Renamed,
            Some('C') => ChangeType::Copied,
            Some('T') => ChangeType::TypeChanged,
            Some('U') => ChangeType::Unmerged,
            _ => ChangeType::Unknown(code.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameStatusEntry {
    pub change: ChangeType,
    pub path: String,
    pub old_path: Option<String>,
}

/// Parse `--name-status -z` output.
pub fn parse_name_status_z(text: &str) -> Vec<NameStatusEntry> {
    let mut out = Vec::new();
    let mut tokens = text.split('\0');
    while let Some(code) = tokens.next() {
        let code = code.trim_start_matches('\n');
        if code.is_empty() {
            continue;
        }
        let change = ChangeType::from_code(code);
        let entry = if matches!(change, ChangeType::Renamed | ChangeType::Copied) {
            let old = tokens.next().unwrap_or_default();
            let new = tokens.next().unwrap_or_default();
            NameStatusEntry {
                change,
                path: new.to_string(),
                old_path: Some(old.to_string()),
            }
        } else {
            NameStatusEntry {
                change,
                path: tokens.next().unwrap_or_default().to_string(),
                old_path: None,
            }
        };
        out.push(entry);
    }
    out
}

/// One line of `--numstat`; counts are `None` for binary files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumstatEntry {
    pub path: String,
    pub old_path: Option<String>,
    pub insertions: Option<u32>,
    pub deletions: Option<u32>,
}

/// Parse `--numstat -z` output.
pub fn parse_numstat_z(text: &str) -> Vec<NumstatEntry> {
    let mut out = Vec::new();
    let mut tokens = text.split('\0');
    while let Some(token) = tokens.next() {
        let token = token.trim_start_matches('\n');
        if token.is_empty() {
            continue;
        }
        let mut fields = token.splitn(3, '\t');
        let (Some(ins), Some(del), Some(path)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let (path, old_path) = if path.is_empty() {
            let old = tokens.next().unwrap_or_default();
            let new = tokens.next().unwrap_or_default();
            (new.to_string(), Some(old.to_string()))
        } else {
            (path.to_string(), None)
        };
        out.push(NumstatEntry {
            path,
            old_path,
            insertions: ins.parse().ok(),
            deletions: del.parse().ok(),
        });
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub changes: u32,
    pub insertions: u32,
    pub deletions: u32,
}

impl DiffSummary {
    pub fn from_numstat(entries: &[NumstatEntry]) -> Self {
        Self {
            changes: entries.len() as u32,
            insertions: entries.iter().filter_map(|e| e.insertions).sum(),
            deletions: entries.iter().filter_map(|e| e.deletions).sum(),
        }
    }
}

/// `git log` format consumed by [`parse_log`]: records start with `\x1e`,
/// fields end with `\x1f`, and the `--shortstat` line trails each record.
pub const LOG_FORMAT: &str = "--format=%x1e%H%x1f%aI%x1f%s%x1f%D%x1f%b%x1f%an%x1f%ae%x1f";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub hash: String,
    pub date: String,
    pub message: String,
    pub refs: String,
    pub body: String,
    pub author_name: String,
    pub author_email: String,
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
}

pub fn parse_log(text: &str) -> Vec<LogEntry> {
    text.split('\x1e')
        .filter(|record| !record.trim().is_empty())
        .filter_map(|record| {
            let fields: Vec<&str> = record.splitn(8, '\x1f').collect();
            if fields.len() < 7 {
                return None;
            }
            let (files_changed, insertions, deletions) =
                parse_shortstat(fields.get(7).copied().unwrap_or_default());
            Some(LogEntry {
                hash: fields[0].trim().to_string(),
                date: fields[1].to_string(),
                message: fields[2].to_string(),
                refs: fields[3].to_string(),
                body: fields[4].trim().to_string(),
                author_name: fields[5].to_string(),
                author_email: fields[6].to_string(),
                files_changed,
                insertions,
                deletions,
            })
        })
        .collect()
}

/// `(files, insertions, deletions)` from a `--shortstat` line; zeros when absent.
pub fn parse_shortstat(text: &str) -> (u32, u32, u32) {
    let Some(caps) = SHORTSTAT.captures(text) else {
        return (0, 0, 0);
    };
    let num = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    (num(1), num(2), num(3))
}

/// `for-each-ref` format consumed by [`parse_branch_listing`].
pub const BRANCH_FORMAT: &str = "--format=%(HEAD)%00%(refname)%00%(objectname:short)%00%(upstream:short)%00%(contents:subject)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchLine {
    pub current: bool,
    pub refname: String,
    pub commit: String,
    pub upstream: Option<String>,
    pub subject: String,
}

pub fn parse_branch_listing(text: &str) -> Vec<BranchLine> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split('\0');
            let head = fields.next()?;
            let refname = fields.next()?.to_string();
            let commit = fields.next().unwrap_or_default().to_string();
            let upstream = fields
                .next()
                .filter(|u| !u.is_empty())
                .map(str::to_string);
            let subject = fields.next().unwrap_or_default().to_string();
            Some(BranchLine {
                current: head == "*",
                refname,
                commit,
                upstream,
                subject,
            })
        })
        .collect()
}

/// `(ahead, behind)` from `rev-list --left-right --count A...B`.
pub fn parse_ahead_behind(text: &str) -> Option<(u32, u32)> {
    let mut parts = text.split_whitespace();
    let ahead = parts.next()?.parse().ok()?;
    let behind = parts.next()?.parse().ok()?;
    Some((ahead, behind))
}
