//! [`RepositoryHost`] over the Bitbucket Cloud REST 2.0 API.

use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{BranchHead, ChangeRequestSpec, RepositoryHost};
use crate::config::env_var_opt;
use crate::domain::{ChangeRequestRef, ConfigError, HostError};
use crate::sources::bitbucket::DEFAULT_API_URL;
use crate::sources::http::{build_client, is_transient_status};
use crate::sources::BitbucketConfig;

/// Characters escaped in branch names and file paths placed in a URL path.
/// `/` is kept: Bitbucket takes slashed branch names and nested paths as-is.
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode_path(raw: &str) -> String {
    utf8_percent_encode(raw, PATH_ENCODE_SET).to_string()
}

/// Where the generated documents are published.
#[derive(Debug, Clone)]
pub struct DocsRepoConfig {
    pub api_url: String,
    pub workspace: String,
    pub repo_slug: String,
    pub username: String,
    pub app_password: String,
}

impl DocsRepoConfig {
    /// `DOCS_WORKSPACE` / `DOCS_REPO_SLUG`, falling back to the code
    /// repository's workspace and slug. Credentials are shared.
    pub fn from_env(code_repo: &BitbucketConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            api_url: env_var_opt("BITBUCKET_API_URL").unwrap_or_else(|| {
                if code_repo.api_url.is_empty() {
                    DEFAULT_API_URL.to_string()
                } else {
                    code_repo.api_url.clone()
                }
            }),
            workspace: env_var_opt("DOCS_WORKSPACE").unwrap_or_else(|| code_repo.workspace.clone()),
            repo_slug: env_var_opt("DOCS_REPO_SLUG").unwrap_or_else(|| code_repo.repo_slug.clone()),
            username: code_repo.username.clone(),
            app_password: code_repo.app_password.clone(),
        })
    }

    fn repo_url(&self) -> String {
        format!(
            "{}/repositories/{}/{}",
            self.api_url.trim_end_matches('/'),
            self.workspace,
            self.repo_slug
        )
    }
}

pub struct BitbucketRepositoryHost {
    config: DocsRepoConfig,
    client: reqwest::Client,
}

impl BitbucketRepositoryHost {
    pub fn new(config: DocsRepoConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            config,
            client: build_client(Duration::from_secs(60))?,
        })
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .basic_auth(&self.config.username, Some(&self.config.app_password))
    }

    fn post(&self, url: String) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .basic_auth(&self.config.username, Some(&self.config.app_password))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<Response, HostError> {
        request.send().await.map_err(|e| {
            if e.is_builder() {
                HostError::Permanent(format!("{context}: {e}"))
            } else {
                HostError::Transient(format!("{context}: {e}"))
            }
        })
    }

    /// `Ok(None)` on 404.
    async fn get_optional_json<T: DeserializeOwned>(
        &self,
        url: String,
        context: &str,
    ) -> Result<Option<T>, HostError> {
        let response = self.send(self.get(url), context).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, context).await?;
        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| HostError::Permanent(format!("{context}: {e}")))
    }
}

async fn check_status(response: Response, context: &str) -> Result<Response, HostError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = format!("{context}: HTTP {status}: {}", truncate(&body, 300));
    Err(match status {
        StatusCode::NOT_FOUND => HostError::NotFound(detail),
        StatusCode::CONFLICT => HostError::Conflict(detail),
        s if is_transient_status(s) => HostError::Transient(detail),
        _ => HostError::Permanent(detail),
    })
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Description with the labels and assignees Bitbucket has no API field for.
fn request_description(spec: &ChangeRequestSpec) -> String {
    let mut description = spec.description.clone();
    if !spec.labels.is_empty() {
        description.push_str(&format!("\n\nLabels: {}", spec.labels.join(", ")));
    }
    if !spec.assignees.is_empty() {
        let mentions: Vec<String> = spec.assignees.iter().map(|a| format!("@{a}")).collect();
        description.push_str(&format!("\nAssignees: {}", mentions.join(" ")));
    }
    description
}

#[async_trait]
impl RepositoryHost for BitbucketRepositoryHost {
    async fn default_branch(&self) -> Result<String, HostError> {
        let repo: Option<RawRepository> = self
            .get_optional_json(self.config.repo_url(), "docs repository")
            .await?;
        let repo = repo.ok_or_else(|| {
            HostError::NotFound(format!(
                "repository {}/{}",
                self.config.workspace, self.config.repo_slug
            ))
        })?;
        Ok(repo
            .mainbranch
            .and_then(|b| b.name)
            .unwrap_or_else(|| "main".to_string()))
    }

    async fn branch_head(&self, branch: &str) -> Result<Option<BranchHead>, HostError> {
        let url = format!(
            "{}/refs/branches/{}",
            self.config.repo_url(),
            encode_path(branch)
        );
        let raw: Option<RawBranchRef> = self.get_optional_json(url, "branch lookup").await?;
        Ok(raw.and_then(|b| b.target).map(|t| BranchHead {
            commit: t.hash,
            message: t.message.unwrap_or_default(),
        }))
    }

    async fn read_file(&self, revision: &str, path: &str) -> Result<Option<String>, HostError> {
        let url = format!(
            "{}/src/{}/{}",
            self.config.repo_url(),
            encode_path(revision),
            encode_path(path)
        );
        let response = self.send(self.get(url), "file read").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, "file read").await?;
        response
            .text()
            .await
            .map(Some)
            .map_err(|e| HostError::Transient(format!("file read: {e}")))
    }

    async fn create_branch(&self, branch: &str, from_commit: &str) -> Result<(), HostError> {
        let url = format!("{}/refs/branches", self.config.repo_url());
        let body = json!({ "name": branch, "target": { "hash": from_commit } });
        let response = self.send(self.post(url).json(&body), "branch create").await?;
        check_status(response, "branch create").await?;
        debug!(branch = %branch, from = %from_commit, "created branch");
        Ok(())
    }

    async fn commit_files(
        &self,
        branch: &str,
        expected_parent: &str,
        message: &str,
        files: &[(String, String)],
    ) -> Result<String, HostError> {
        let url = format!("{}/src", self.config.repo_url());
        let mut form: Vec<(String, String)> = files.to_vec();
        form.push(("message".to_string(), message.to_string()));
        form.push(("branch".to_string(), branch.to_string()));
        form.push(("parents".to_string(), expected_parent.to_string()));

        let response = self.send(self.post(url).form(&form), "commit").await?;
        let response = check_status(response, "commit").await?;

        let from_location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|loc| loc.trim_end_matches('/').rsplit('/').next())
            .map(str::to_string);
        if let Some(commit) = from_location {
            return Ok(commit);
        }

        self.branch_head(branch)
            .await?
            .map(|h| h.commit)
            .ok_or_else(|| HostError::NotFound(format!("branch {branch} after commit")))
    }

    async fn find_open_request(
        &self,
        source_branch: &str,
    ) -> Result<Option<ChangeRequestRef>, HostError> {
        let url = format!("{}/pullrequests", self.config.repo_url());
        let query = format!("source.branch.name=\"{source_branch}\" AND state=\"OPEN\"");
        let request = self.get(url).query(&[("q", query.as_str())]);
        let response = self.send(request, "pull request lookup").await?;
        let response = check_status(response, "pull request lookup").await?;
        let page: RawPullRequestPage = response
            .json()
            .await
            .map_err(|e| HostError::Permanent(format!("pull request lookup: {e}")))?;
        Ok(page
            .values
            .into_iter()
            .map(RawPullRequest::into_ref)
            .find(|r| r.source_branch == source_branch))
    }

    async fn create_request(
        &self,
        spec: &ChangeRequestSpec,
    ) -> Result<ChangeRequestRef, HostError> {
        let url = format!("{}/pullrequests", self.config.repo_url());
        let body = json!({
            "title": spec.title,
            "description": request_description(spec),
            "source": { "branch": { "name": spec.source_branch } },
            "destination": { "branch": { "name": spec.destination_branch } },
            "close_source_branch": true,
        });
        let response = self.send(self.post(url).json(&body), "pull request create").await?;

        // Bitbucket answers 400 when an open request for the branch exists.
        if response.status() == StatusCode::BAD_REQUEST {
            let text = response.text().await.unwrap_or_default();
            if text.to_lowercase().contains("already") {
                return Err(HostError::AlreadyExists(truncate(&text, 300).to_string()));
            }
            return Err(HostError::Permanent(format!(
                "pull request create: HTTP 400: {}",
                truncate(&text, 300)
            )));
        }
        let response = check_status(response, "pull request create").await?;
        let raw: RawPullRequest = response
            .json()
            .await
            .map_err(|e| HostError::Permanent(format!("pull request create: {e}")))?;
        Ok(raw.into_ref())
    }
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    mainbranch: Option<RawName>,
}

#[derive(Debug, Deserialize)]
struct RawName {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBranchRef {
    target: Option<RawCommitTarget>,
}

#[derive(Debug, Deserialize)]
struct RawCommitTarget {
    hash: String,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequestPage {
    #[serde(default)]
    values: Vec<RawPullRequest>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    id: u64,
    #[serde(default)]
    title: String,
    source: Option<RawEndpoint>,
    destination: Option<RawEndpoint>,
    links: Option<RawLinks>,
}

#[derive(Debug, Deserialize)]
struct RawEndpoint {
    branch: Option<RawName>,
}

#[derive(Debug, Deserialize)]
struct RawLinks {
    html: Option<RawHref>,
}

#[derive(Debug, Deserialize)]
struct RawHref {
    href: Option<String>,
}

impl RawPullRequest {
    fn into_ref(self) -> ChangeRequestRef {
        let branch = |e: Option<RawEndpoint>| {
            e.and_then(|e| e.branch)
                .and_then(|b| b.name)
                .unwrap_or_default()
        };
        ChangeRequestRef {
            id: self.id,
            url: self.links.and_then(|l| l.html).and_then(|h| h.href),
            title: self.title,
            source_branch: branch(self.source),
            destination_branch: branch(self.destination),
        }
    }
}
