//! Issue tracker adapter (Jira REST v2).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::http::{build_client, get_json, parse_timestamp};
use super::SourceAdapter;
use crate::config::{env_var, env_var_opt};
use crate::domain::{ConfigError, Issue, ReleaseDescriptor, SourceError, SourceRecord};

/// Labels that flag an issue as a breaking change.
const BREAKING_LABELS: [&str; 3] = ["breaking", "breaking-change", "breaking_change"];

/// Lines in a description that open a changelog excerpt.
const CHANGELOG_MARKERS: [&str; 3] = ["changelog", "what's new", "changes"];

/// Jira connection settings.
#[derive(Debug, Clone)]
pub struct JiraConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub max_results: u32,
}

impl JiraConfig {
    /// Read `JIRA_BASE_URL`, `JIRA_EMAIL`, `JIRA_API_TOKEN` and the optional
    /// `JIRA_MAX_RESULTS` (default 100).
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_results = match env_var_opt("JIRA_MAX_RESULTS") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "JIRA_MAX_RESULTS".to_string(),
                reason: format!("not a number: {raw}"),
            })?,
            None => 100,
        };
        Ok(Self {
            base_url: env_var("JIRA_BASE_URL")?,
            email: env_var("JIRA_EMAIL")?,
            api_token: env_var("JIRA_API_TOKEN")?,
            max_results,
        })
    }
}

/// Fetches issues whose fix version is the release version, falling back to
/// issues that mention the release branch when none are tagged.
pub struct JiraSource {
    config: JiraConfig,
    client: reqwest::Client,
}

impl JiraSource {
    pub const NAME: &'static str = "jira";

    pub fn new(config: JiraConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            config,
            client: build_client(Duration::from_secs(30))?,
        })
    }

    async fn search(
        &self,
        jql: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Issue>, SourceError> {
        let url = format!("{}/rest/api/2/search", self.config.base_url.trim_end_matches('/'));
        let request = self
            .client
            .get(url)
            .basic_auth(&self.config.email, Some(&self.config.api_token))
            .query(&[
                ("jql", jql.to_string()),
                ("maxResults", self.config.max_results.to_string()),
            ])
            .timeout(timeout);

        let response: SearchResponse = get_json(request, "jira search", cancel).await?;
        debug!(jql = %jql, count = response.issues.len(), "jira search returned");
        Ok(response.issues.into_iter().map(RawIssue::into_issue).collect())
    }
}

#[async_trait]
impl SourceAdapter for JiraSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(
        &self,
        release: &ReleaseDescriptor,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let version = release.version_string();
        let mut issues = self
            .search(&fix_version_jql(&version), timeout, cancel)
            .await?;

        if issues.is_empty() {
            info!(
                branch = %release.branch(),
                "no issues tagged with fix version, searching by branch"
            );
            issues = self
                .search(&branch_jql(release.branch()), timeout, cancel)
                .await?;
        }

        Ok(issues.into_iter().map(SourceRecord::Issue).collect())
    }
}

fn fix_version_jql(version: &str) -> String {
    format!("fixVersion = \"{version}\" ORDER BY priority DESC, updated DESC")
}

fn branch_jql(branch: &str) -> String {
    format!("text ~ \"{branch}\" ORDER BY updated DESC")
}

/// Pull the lines following a changelog marker, up to the next heading.
pub fn extract_changelog(description: &str) -> Option<String> {
    let mut lines = Vec::new();
    let mut in_changelog = false;

    for line in description.lines().map(str::trim) {
        if !in_changelog {
            let lower = line.to_lowercase();
            if CHANGELOG_MARKERS.iter().any(|m| lower.contains(m)) {
                in_changelog = true;
            }
            continue;
        }
        if line.starts_with('#') || line.starts_with("h1.") || line.starts_with("h2.") {
            break;
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    #[serde(default)]
    key: String,
    #[serde(default)]
    fields: RawFields,
}

#[derive(Debug, Default, Deserialize)]
struct RawFields {
    summary: Option<String>,
    issuetype: Option<Named>,
    status: Option<Named>,
    priority: Option<Named>,
    #[serde(default)]
    components: Option<Vec<Named>>,
    #[serde(default)]
    labels: Option<Vec<String>>,
    #[serde(rename = "fixVersions", default)]
    fix_versions: Option<Vec<Named>>,
    parent: Option<Keyed>,
    description: Option<String>,
    assignee: Option<Person>,
    created: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Named {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Keyed {
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Person {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

impl RawIssue {
    fn into_issue(self) -> Issue {
        let f = self.fields;
        let labels = f.labels.unwrap_or_default();
        let breaking_change = labels
            .iter()
            .any(|l| BREAKING_LABELS.contains(&l.to_lowercase().as_str()));
        let name = |n: Option<Named>| n.map(|n| n.name).unwrap_or_default();

        Issue {
            key: self.key,
            summary: f.summary.unwrap_or_default(),
            issue_type: name(f.issuetype),
            status: name(f.status),
            priority: name(f.priority),
            components: f
                .components
                .unwrap_or_default()
                .into_iter()
                .map(|c| c.name)
                .filter(|c| !c.is_empty())
                .collect(),
            fix_version: f
                .fix_versions
                .unwrap_or_default()
                .into_iter()
                .map(|v| v.name)
                .next(),
            epic_key: f.parent.and_then(|p| p.key),
            changelog: f.description.as_deref().and_then(extract_changelog),
            breaking_change,
            assignee: f.assignee.and_then(|a| a.display_name),
            created: f.created.as_deref().and_then(parse_timestamp),
            updated: f.updated.as_deref().and_then(parse_timestamp),
            labels,
        }
    }
}
