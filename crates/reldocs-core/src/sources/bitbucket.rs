//! Code-host adapters (Bitbucket Cloud REST 2.0): pull requests and commits.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::http::{build_client, ensure_not_cancelled, get_json, parse_timestamp};
use super::SourceAdapter;
use crate::config::{env_var, env_var_opt};
use crate::domain::{
    Commit, ConfigError, PullRequest, ReleaseDescriptor, SourceError, SourceRecord,
};

pub const DEFAULT_API_URL: &str = "https://api.bitbucket.org/2.0";

/// Bitbucket connection settings shared by both adapters.
#[derive(Debug, Clone)]
pub struct BitbucketConfig {
    pub api_url: String,
    pub workspace: String,
    pub repo_slug: String,
    pub username: String,
    pub app_password: String,
    /// Page size requested from paged endpoints.
    pub page_len: u32,
    /// Upper bound on followed `next` links per listing.
    pub max_pages: u32,
}

impl BitbucketConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_url: env_var_opt("BITBUCKET_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            workspace: env_var("BITBUCKET_WORKSPACE")?,
            repo_slug: env_var("BITBUCKET_REPO_SLUG")?,
            username: env_var("BITBUCKET_USERNAME")?,
            app_password: env_var("BITBUCKET_APP_PASSWORD")?,
            page_len: 50,
            max_pages: 20,
        })
    }

    pub(crate) fn repo_url(&self) -> String {
        format!(
            "{}/repositories/{}/{}",
            self.api_url.trim_end_matches('/'),
            self.workspace,
            self.repo_slug
        )
    }
}

/// Issue keys like `PROJ-123` mentioned in free text, in order of first appearance.
pub fn linked_issue_keys(text: &str) -> Vec<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(pattern) = PATTERN
        .get_or_init(|| Regex::new(r"\b[A-Z][A-Z0-9]+-\d+\b").ok())
        .as_ref()
    else {
        return Vec::new();
    };

    let mut keys: Vec<String> = Vec::new();
    for m in pattern.find_iter(text) {
        if !keys.iter().any(|k| k == m.as_str()) {
            keys.push(m.as_str().to_string());
        }
    }
    keys
}

#[derive(Debug, Deserialize)]
struct Paged<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
    next: Option<String>,
}

/// Follow `next` links until exhausted or `max_pages` is reached.
async fn fetch_all<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    config: &BitbucketConfig,
    first: reqwest::RequestBuilder,
    context: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<T>, SourceError> {
    let mut items = Vec::new();
    let mut page: Paged<T> = get_json(first, context, cancel).await?;
    let mut pages = 1;

    loop {
        items.append(&mut page.values);
        let Some(next) = page.next.take() else { break };
        if pages >= config.max_pages {
            debug!(context = %context, pages, "page limit reached, truncating listing");
            break;
        }
        ensure_not_cancelled(cancel, context)?;
        let request = client
            .get(next)
            .basic_auth(&config.username, Some(&config.app_password))
            .timeout(timeout);
        page = get_json(request, context, cancel).await?;
        pages += 1;
    }

    Ok(items)
}

/// Pull requests whose destination is the release branch.
pub struct BitbucketPullRequestSource {
    config: BitbucketConfig,
    client: reqwest::Client,
}

impl BitbucketPullRequestSource {
    pub const NAME: &'static str = "bitbucket-prs";

    pub fn new(config: BitbucketConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            config,
            client: build_client(Duration::from_secs(30))?,
        })
    }

    async fn changed_files(
        &self,
        id: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, SourceError> {
        let url = format!("{}/pullrequests/{id}/diffstat", self.config.repo_url());
        let request = self
            .client
            .get(url)
            .basic_auth(&self.config.username, Some(&self.config.app_password))
            .query(&[("pagelen", self.config.page_len)])
            .timeout(timeout);

        let entries: Vec<RawDiffStat> =
            fetch_all(&self.client, &self.config, request, "bitbucket diffstat", timeout, cancel)
                .await?;
        Ok(entries.into_iter().filter_map(RawDiffStat::path).collect())
    }
}

#[async_trait]
impl SourceAdapter for BitbucketPullRequestSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(
        &self,
        release: &ReleaseDescriptor,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let url = format!("{}/pullrequests", self.config.repo_url());
        let query = format!("destination.branch.name=\"{}\"", release.branch());
        let request = self
            .client
            .get(url)
            .basic_auth(&self.config.username, Some(&self.config.app_password))
            .query(&[
                ("q", query.as_str()),
                ("state", "MERGED"),
                ("state", "OPEN"),
            ])
            .query(&[("pagelen", self.config.page_len)])
            .timeout(timeout);

        let raw: Vec<RawPullRequest> = fetch_all(
            &self.client,
            &self.config,
            request,
            "bitbucket pullrequests",
            timeout,
            cancel,
        )
        .await?;

        let mut records = Vec::with_capacity(raw.len());
        for pr in raw {
            ensure_not_cancelled(cancel, "bitbucket diffstat")?;
            let changed_files = self.changed_files(pr.id, timeout, cancel).await?;
            records.push(SourceRecord::PullRequest(pr.into_pull_request(changed_files)));
        }
        Ok(records)
    }
}

/// Commits on the release branch, excluding those reachable from the base tag.
pub struct BitbucketCommitSource {
    config: BitbucketConfig,
    client: reqwest::Client,
}

impl BitbucketCommitSource {
    pub const NAME: &'static str = "bitbucket-commits";

    pub fn new(config: BitbucketConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            config,
            client: build_client(Duration::from_secs(30))?,
        })
    }
}

#[async_trait]
impl SourceAdapter for BitbucketCommitSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(
        &self,
        release: &ReleaseDescriptor,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let url = format!("{}/commits", self.config.repo_url());
        let mut params = vec![("include", release.branch().to_string())];
        if let Some(tag) = release.base_tag() {
            params.push(("exclude", tag.to_string()));
        }
        let request = self
            .client
            .get(url)
            .basic_auth(&self.config.username, Some(&self.config.app_password))
            .query(&params)
            .query(&[("pagelen", self.config.page_len)])
            .timeout(timeout);

        let raw: Vec<RawCommit> =
            fetch_all(&self.client, &self.config, request, "bitbucket commits", timeout, cancel)
                .await?;
        Ok(raw
            .into_iter()
            .map(|c| SourceRecord::Commit(c.into_commit()))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    title: String,
    description: Option<String>,
    author: Option<RawUser>,
    source: Option<RawEndpoint>,
    destination: Option<RawEndpoint>,
    #[serde(default)]
    state: String,
    links: Option<RawLinks>,
    created_on: Option<String>,
    updated_on: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    display_name: Option<String>,
    nickname: Option<String>,
}

impl RawUser {
    fn name(self) -> String {
        self.display_name.or(self.nickname).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct RawEndpoint {
    branch: Option<RawBranch>,
}

#[derive(Debug, Deserialize)]
struct RawBranch {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLinks {
    html: Option<RawHref>,
}

#[derive(Debug, Deserialize)]
struct RawHref {
    href: Option<String>,
}

fn branch_name(endpoint: Option<RawEndpoint>) -> String {
    endpoint
        .and_then(|e| e.branch)
        .and_then(|b| b.name)
        .unwrap_or_default()
}

impl RawPullRequest {
    fn into_pull_request(self, changed_files: Vec<String>) -> PullRequest {
        let linked_issues = self
            .description
            .as_deref()
            .map(linked_issue_keys)
            .unwrap_or_default();
        PullRequest {
            id: self.id,
            title: self.title,
            author: self.author.map(RawUser::name).unwrap_or_default(),
            source_branch: branch_name(self.source),
            target_branch: branch_name(self.destination),
            state: self.state,
            url: self.links.and_then(|l| l.html).and_then(|h| h.href),
            labels: Vec::new(),
            linked_issues,
            changed_files,
            created_on: self.created_on.as_deref().and_then(parse_timestamp),
            updated_on: self.updated_on.as_deref().and_then(parse_timestamp),
            description: self.description,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDiffStat {
    new: Option<RawPath>,
    old: Option<RawPath>,
}

#[derive(Debug, Deserialize)]
struct RawPath {
    path: Option<String>,
}

impl RawDiffStat {
    fn path(self) -> Option<String> {
        self.new
            .and_then(|p| p.path)
            .or_else(|| self.old.and_then(|p| p.path))
    }
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    message: String,
    author: Option<RawCommitAuthor>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCommitAuthor {
    raw: Option<String>,
    user: Option<RawUser>,
}

impl RawCommit {
    fn into_commit(self) -> Commit {
        let author = self
            .author
            .map(|a| match a.user {
                Some(user) => user.name(),
                None => a.raw.unwrap_or_default(),
            })
            .unwrap_or_default();
        Commit {
            hash: self.hash,
            message: self.message,
            author,
            date: self.date.as_deref().and_then(parse_timestamp),
            changed_files: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linked_issue_keys_dedupes_in_order() {
        let keys = linked_issue_keys("Fixes PROJ-12 and OPS2-7; see also PROJ-12, not abc-1");
        assert_eq!(keys, vec!["PROJ-12", "OPS2-7"]);
        assert!(linked_issue_keys("nothing here").is_empty());
    }

    #[test]
    fn test_pull_request_conversion() {
        let raw: RawPullRequest = serde_json::from_value(serde_json::json!({
            "id": 42,
            "title": "feat(api): add export endpoint",
            "description": "Implements PROJ-101",
            "author": {"display_name": "Dana"},
            "source": {"branch": {"name": "feature/export"}},
            "destination": {"branch": {"name": "release/1.2.3"}},
            "state": "MERGED",
            "links": {"html": {"href": "https://bitbucket.org/acme/app/pull-requests/42"}},
            "created_on": "2024-01-10T09:00:00.000000+00:00",
            "updated_on": "2024-01-11T09:00:00.000000+00:00"
        }))
        .unwrap();

        let pr = raw.into_pull_request(vec!["api/export.rs".to_string()]);
        assert_eq!(pr.id, 42);
        assert_eq!(pr.author, "Dana");
        assert_eq!(pr.source_branch, "feature/export");
        assert_eq!(pr.target_branch, "release/1.2.3");
        assert_eq!(pr.linked_issues, vec!["PROJ-101"]);
        assert_eq!(pr.changed_files, vec!["api/export.rs"]);
        assert!(pr.url.is_some());
        assert!(pr.updated_on.is_some());
    }

    #[test]
    fn test_commit_author_falls_back_to_raw() {
        let raw: RawCommit = serde_json::from_value(serde_json::json!({
            "hash": "abc123",
            "message": "Tidy imports\n",
            "author": {"raw": "Dev <dev@example.com>"},
            "date": "2024-01-12T10:00:00+00:00"
        }))
        .unwrap();
        let commit = raw.into_commit();
        assert_eq!(commit.author, "Dev <dev@example.com>");
        assert!(commit.date.is_some());
    }

    #[test]
    fn test_diffstat_prefers_new_path() {
        let renamed: RawDiffStat = serde_json::from_value(serde_json::json!({
            "new": {"path": "ui/new.ts"}, "old": {"path": "ui/old.ts"}
        }))
        .unwrap();
        assert_eq!(renamed.path().as_deref(), Some("ui/new.ts"));

        let removed: RawDiffStat =
            serde_json::from_value(serde_json::json!({"new": null, "old": {"path": "gone.rs"}}))
                .unwrap();
        assert_eq!(removed.path().as_deref(), Some("gone.rs"));
    }
}
