//! Source adapters: one capability per external evidence system.
//!
//! - [`jira::JiraSource`]: issues by fix version (branch-text fallback)
//! - [`bitbucket::BitbucketPullRequestSource`]: PRs into the release branch
//! - [`bitbucket::BitbucketCommitSource`]: commits since the base tag
//! - [`confluence::ConfluenceSource`]: release-notes and labelled wiki pages
//!
//! Adapters hold no mutable state and may run concurrently. Timeouts and
//! retries belong to the gatherer; adapters only classify their failures.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{ReleaseDescriptor, SourceError, SourceRecord};

pub mod bitbucket;
pub mod confluence;
pub mod http;
pub mod jira;

pub use bitbucket::{BitbucketCommitSource, BitbucketConfig, BitbucketPullRequestSource};
pub use confluence::{ConfluenceConfig, ConfluenceSource};
pub use jira::{JiraConfig, JiraSource};

/// Fetches raw records for a release window from one external system.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable adapter name, used for required-source policy and reporting.
    fn name(&self) -> &str;

    /// Fetch every record relevant to `release`.
    ///
    /// `timeout` is the budget for the whole call; the gatherer enforces it,
    /// adapters may use it to bound individual requests. On cancellation the
    /// adapter must return promptly with a transient error.
    async fn fetch(
        &self,
        release: &ReleaseDescriptor,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<SourceRecord>, SourceError>;
}
