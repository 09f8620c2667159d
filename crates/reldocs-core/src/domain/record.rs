//! Raw evidence records fetched from source systems.
//!
//! [`SourceRecord`] is a closed set of variants so classification can match
//! exhaustively; there is no "other" bucket that silently ignores a kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminant of a [`SourceRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Issue,
    PullRequest,
    Commit,
    Page,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Issue => "issue",
            RecordKind::PullRequest => "pull_request",
            RecordKind::Commit => "commit",
            RecordKind::Page => "page",
        }
    }
}

/// Issue-tracker ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub key: String,
    pub summary: String,
    pub issue_type: String,
    pub status: String,
    pub priority: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub fix_version: Option<String>,
    pub epic_key: Option<String>,
    /// Release-facing excerpt pulled out of the description.
    pub changelog: Option<String>,
    pub breaking_change: bool,
    pub assignee: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

/// Code-host pull request targeting the release branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: u64,
    pub title: String,
    pub description: Option<String>,
    pub author: String,
    pub source_branch: String,
    pub target_branch: String,
    pub state: String,
    pub url: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Issue keys mentioned in the description.
    #[serde(default)]
    pub linked_issues: Vec<String>,
    #[serde(default)]
    pub changed_files: Vec<String>,
    pub created_on: Option<DateTime<Utc>>,
    pub updated_on: Option<DateTime<Utc>>,
}

/// Code-host commit on the release branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub changed_files: Vec<String>,
}

/// Wiki page used as release context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub title: String,
    pub content: String,
    pub space_key: String,
    pub version: u32,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

/// One piece of gathered evidence. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRecord {
    Issue(Issue),
    PullRequest(PullRequest),
    Commit(Commit),
    Page(Page),
}

impl SourceRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            SourceRecord::Issue(_) => RecordKind::Issue,
            SourceRecord::PullRequest(_) => RecordKind::PullRequest,
            SourceRecord::Commit(_) => RecordKind::Commit,
            SourceRecord::Page(_) => RecordKind::Page,
        }
    }

    /// Identifier in the originating system, namespaced per kind where the
    /// raw id is numeric. Empty when the source did not provide one.
    pub fn external_id(&self) -> String {
        match self {
            SourceRecord::Issue(issue) => issue.key.trim().to_string(),
            SourceRecord::PullRequest(pr) if pr.id == 0 => String::new(),
            SourceRecord::PullRequest(pr) => format!("PR-{}", pr.id),
            SourceRecord::Commit(commit) => commit.hash.trim().to_string(),
            SourceRecord::Page(page) if page.id.trim().is_empty() => String::new(),
            SourceRecord::Page(page) => format!("page-{}", page.id.trim()),
        }
    }

    /// Human-facing one-liner: issue summary, PR title, first commit line, page title.
    pub fn title(&self) -> &str {
        match self {
            SourceRecord::Issue(issue) => issue.summary.trim(),
            SourceRecord::PullRequest(pr) => pr.title.trim(),
            SourceRecord::Commit(commit) => commit.message.lines().next().unwrap_or("").trim(),
            SourceRecord::Page(page) => page.title.trim(),
        }
    }

    /// Ordering timestamp: last update for issues, PRs and pages; author date for commits.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            SourceRecord::Issue(issue) => issue.updated.or(issue.created),
            SourceRecord::PullRequest(pr) => pr.updated_on.or(pr.created_on),
            SourceRecord::Commit(commit) => commit.date,
            SourceRecord::Page(page) => page.updated.or(page.created),
        }
    }

    /// Labels plus (for issues) components.
    pub fn labels(&self) -> Vec<&str> {
        match self {
            SourceRecord::Issue(issue) => issue
                .labels
                .iter()
                .chain(issue.components.iter())
                .map(String::as_str)
                .collect(),
            SourceRecord::PullRequest(pr) => pr.labels.iter().map(String::as_str).collect(),
            SourceRecord::Commit(_) => Vec::new(),
            SourceRecord::Page(page) => page.labels.iter().map(String::as_str).collect(),
        }
    }

    /// A record missing its id, title or timestamp cannot be classified reliably.
    pub fn is_well_formed(&self) -> bool {
        !self.external_id().is_empty() && !self.title().is_empty() && self.timestamp().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn commit(hash: &str, message: &str) -> SourceRecord {
        SourceRecord::Commit(Commit {
            hash: hash.to_string(),
            message: message.to_string(),
            author: "dev".to_string(),
            date: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            changed_files: vec![],
        })
    }

    #[test]
    fn commit_title_is_first_message_line() {
        let record = commit("abc123", "feat: add export\n\nLonger body");
        assert_eq!(record.title(), "feat: add export");
        assert_eq!(record.external_id(), "abc123");
        assert_eq!(record.kind(), RecordKind::Commit);
    }

    #[test]
    fn numeric_ids_are_namespaced() {
        let pr = SourceRecord::PullRequest(PullRequest {
            id: 42,
            title: "Add thing".to_string(),
            description: None,
            author: "a".to_string(),
            source_branch: "feature/x".to_string(),
            target_branch: "release/1.0.0".to_string(),
            state: "MERGED".to_string(),
            url: None,
            labels: vec![],
            linked_issues: vec![],
            changed_files: vec![],
            created_on: None,
            updated_on: None,
        });
        assert_eq!(pr.external_id(), "PR-42");
        assert!(!pr.is_well_formed(), "missing timestamp makes it malformed");
    }

    #[test]
    fn empty_hash_is_malformed() {
        assert!(!commit("", "fix: thing").is_well_formed());
        assert!(!commit("abc", "   ").is_well_formed());
        assert!(commit("abc", "fix: thing").is_well_formed());
    }

    #[test]
    fn record_serde_is_tagged_by_kind() {
        let json = serde_json::to_value(commit("abc", "msg")).unwrap();
        assert_eq!(json["kind"], "commit");
    }
}
