//! Wiki adapter (Confluence REST content search).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::http::{build_client, ensure_not_cancelled, get_json, parse_timestamp};
use super::SourceAdapter;
use crate::config::{env_var, env_var_opt, parse_list};
use crate::domain::{ConfigError, Page, ReleaseDescriptor, SourceError, SourceRecord};

const EXPAND: &str = "body.storage,version,space,metadata.labels,history";

#[derive(Debug, Clone)]
pub struct ConfluenceConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub space_key: String,
    /// Pages carrying any of these labels are included as release context.
    pub labels: Vec<String>,
    pub limit: u32,
}

impl ConfluenceConfig {
    /// Read `CONFLUENCE_*` variables. `CONFLUENCE_SPACE_KEY` defaults to `DOCS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: env_var("CONFLUENCE_BASE_URL")?,
            email: env_var("CONFLUENCE_EMAIL")?,
            api_token: env_var("CONFLUENCE_API_TOKEN")?,
            space_key: env_var_opt("CONFLUENCE_SPACE_KEY").unwrap_or_else(|| "DOCS".to_string()),
            labels: env_var_opt("CONFLUENCE_LABELS")
                .map(|raw| parse_list(&raw))
                .unwrap_or_default(),
            limit: 25,
        })
    }
}

/// Latest release-notes page in the docs space, plus labelled context pages.
pub struct ConfluenceSource {
    config: ConfluenceConfig,
    client: reqwest::Client,
}

impl ConfluenceSource {
    pub const NAME: &'static str = "confluence";

    pub fn new(config: ConfluenceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            config,
            client: build_client(Duration::from_secs(30))?,
        })
    }

    async fn search(
        &self,
        cql: &str,
        limit: u32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Page>, SourceError> {
        let url = format!(
            "{}/rest/api/content/search",
            self.config.base_url.trim_end_matches('/')
        );
        let request = self
            .client
            .get(url)
            .basic_auth(&self.config.email, Some(&self.config.api_token))
            .query(&[
                ("cql", cql.to_string()),
                ("expand", EXPAND.to_string()),
                ("limit", limit.to_string()),
            ])
            .timeout(timeout);

        let response: SearchResponse = get_json(request, "confluence search", cancel).await?;
        debug!(cql = %cql, count = response.results.len(), "confluence search returned");
        Ok(response
            .results
            .into_iter()
            .map(|raw| raw.into_page(&self.config.space_key))
            .collect())
    }
}

#[async_trait]
impl SourceAdapter for ConfluenceSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(
        &self,
        _release: &ReleaseDescriptor,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let mut pages = self
            .search(&release_notes_cql(&self.config.space_key), 1, timeout, cancel)
            .await?;

        if let Some(cql) = labelled_cql(&self.config.space_key, &self.config.labels) {
            ensure_not_cancelled(cancel, "confluence search")?;
            for page in self.search(&cql, self.config.limit, timeout, cancel).await? {
                if !pages.iter().any(|p| p.id == page.id) {
                    pages.push(page);
                }
            }
        }

        Ok(pages.into_iter().map(SourceRecord::Page).collect())
    }
}

fn release_notes_cql(space_key: &str) -> String {
    format!(
        "space = \"{space_key}\" AND type = page AND (title ~ \"release notes\" OR title ~ \"changelog\") ORDER BY lastmodified DESC"
    )
}

fn labelled_cql(space_key: &str, labels: &[String]) -> Option<String> {
    if labels.is_empty() {
        return None;
    }
    let quoted: Vec<String> = labels.iter().map(|l| format!("\"{l}\"")).collect();
    Some(format!(
        "space = \"{space_key}\" AND type = page AND label in ({}) ORDER BY lastmodified DESC",
        quoted.join(", ")
    ))
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RawPage>,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    body: Option<RawBody>,
    space: Option<RawSpace>,
    version: Option<RawVersion>,
    metadata: Option<RawMetadata>,
    history: Option<RawHistory>,
}

#[derive(Debug, Deserialize)]
struct RawBody {
    storage: Option<RawStorage>,
}

#[derive(Debug, Deserialize)]
struct RawStorage {
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSpace {
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVersion {
    number: Option<u32>,
    when: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    labels: Option<RawLabels>,
}

#[derive(Debug, Deserialize)]
struct RawLabels {
    #[serde(default)]
    results: Vec<RawLabel>,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawHistory {
    #[serde(rename = "createdDate")]
    created_date: Option<String>,
}

impl RawPage {
    fn into_page(self, default_space: &str) -> Page {
        let (version, updated) = match self.version {
            Some(v) => (v.number.unwrap_or(1), v.when),
            None => (1, None),
        };
        Page {
            id: self.id,
            title: self.title,
            content: self
                .body
                .and_then(|b| b.storage)
                .and_then(|s| s.value)
                .unwrap_or_default(),
            space_key: self
                .space
                .and_then(|s| s.key)
                .unwrap_or_else(|| default_space.to_string()),
            version,
            labels: self
                .metadata
                .and_then(|m| m.labels)
                .map(|l| l.results.into_iter().map(|l| l.name).collect())
                .unwrap_or_default(),
            created: self
                .history
                .and_then(|h| h.created_date)
                .as_deref()
                .and_then(parse_timestamp),
            updated: updated.as_deref().and_then(parse_timestamp),
        }
    }
}
