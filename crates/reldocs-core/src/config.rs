//! Run-wide configuration.
//!
//! [`RunConfig`] is built once at startup and passed by reference into every
//! component call; nothing in the crate reads configuration from globals.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ConfigError, ReleaseDescriptor};

/// Retry schedule for transient source failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,
    /// Upper bound for a single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

/// Per-source policy resolved from [`RunConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePolicy {
    pub required: bool,
    pub timeout: Duration,
}

/// Label / keyword rules used by the categorizer. All comparisons are
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRules {
    pub breaking_labels: Vec<String>,
    pub feature_labels: Vec<String>,
    pub fix_labels: Vec<String>,
    pub feature_issue_types: Vec<String>,
    pub fix_issue_types: Vec<String>,
    /// Conventional-commit types treated as features (`feat: ...`).
    pub feature_prefixes: Vec<String>,
    /// Conventional-commit types treated as fixes (`fix: ...`).
    pub fix_prefixes: Vec<String>,
    /// Substrings that mark a commit or PR as breaking.
    pub breaking_markers: Vec<String>,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            breaking_labels: list(&["breaking", "breaking-change", "breaking_change"]),
            feature_labels: list(&["feature", "enhancement"]),
            fix_labels: list(&["bug", "bugfix", "fix"]),
            feature_issue_types: list(&["story", "feature", "epic"]),
            fix_issue_types: list(&["bug", "defect"]),
            feature_prefixes: list(&["feat"]),
            fix_prefixes: list(&["fix"]),
            breaking_markers: list(&["BREAKING CHANGE", "BREAKING-CHANGE"]),
        }
    }
}

/// Metadata applied verbatim to a newly opened change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequestTemplate {
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    /// `{version}` is substituted.
    pub title: String,
    /// `{version}` and `{branch}` are substituted.
    pub description: String,
}

impl Default for ChangeRequestTemplate {
    fn default() -> Self {
        Self {
            labels: parse_list("breaking,docs"),
            assignees: parse_list("team-docs"),
            title: "Docs: Release {version}".to_string(),
            description: "Automated documentation updates for release {version} ({branch})."
                .to_string(),
        }
    }
}

impl ChangeRequestTemplate {
    pub fn render_title(&self, release: &ReleaseDescriptor) -> String {
        self.title.replace("{version}", &release.version_string())
    }

    pub fn render_description(&self, release: &ReleaseDescriptor) -> String {
        self.description
            .replace("{version}", &release.version_string())
            .replace("{branch}", release.branch())
    }
}

/// Where generated documents land in the docs repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLayout {
    /// `{version}` is substituted.
    pub release_notes_path: String,
    pub changelog_path: String,
    /// Lower-cased component name → guide file.
    pub component_guides: BTreeMap<String, String>,
    /// Working branch is `{working_branch_prefix}{version}`.
    pub working_branch_prefix: String,
}

impl Default for DocumentLayout {
    fn default() -> Self {
        let component_guides = [
            ("api", "docs/api-guide.md"),
            ("ui", "docs/ui-guide.md"),
            ("sdk", "docs/sdk-guide.md"),
            ("config", "docs/configuration.md"),
            ("migrations", "docs/migrations.md"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            release_notes_path: "docs/releases/{version}.md".to_string(),
            changelog_path: "docs/CHANGELOG.md".to_string(),
            component_guides,
            working_branch_prefix: "docs/release-".to_string(),
        }
    }
}

impl DocumentLayout {
    pub fn release_notes_path(&self, release: &ReleaseDescriptor) -> String {
        self.release_notes_path
            .replace("{version}", &release.version_string())
    }

    pub fn working_branch(&self, release: &ReleaseDescriptor) -> String {
        format!("{}{}", self.working_branch_prefix, release.version_string())
    }

    pub fn guide_for(&self, component: &str) -> Option<&str> {
        self.component_guides
            .get(&component.to_lowercase())
            .map(String::as_str)
    }
}

/// Immutable configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub retry: RetryPolicy,
    pub default_source_timeout: Duration,
    /// Per-source timeout overrides by adapter name.
    pub source_timeouts: BTreeMap<String, Duration>,
    /// Adapter names whose success is necessary for a usable run.
    pub required_sources: BTreeSet<String>,
    pub classification: ClassificationRules,
    pub change_request: ChangeRequestTemplate,
    pub layout: DocumentLayout,
    /// Compute the write plan without mutating the remote repository.
    pub dry_run: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            default_source_timeout: Duration::from_secs(30),
            source_timeouts: BTreeMap::new(),
            required_sources: ["jira".to_string()].into_iter().collect(),
            classification: ClassificationRules::default(),
            change_request: ChangeRequestTemplate::default(),
            layout: DocumentLayout::default(),
            dry_run: false,
        }
    }
}

impl RunConfig {
    pub fn policy_for(&self, source: &str) -> SourcePolicy {
        SourcePolicy {
            required: self.required_sources.contains(source),
            timeout: self
                .source_timeouts
                .get(source)
                .copied()
                .unwrap_or(self.default_source_timeout),
        }
    }

    /// Check the configuration against the adapters registered for this run.
    pub fn validate<'a>(
        &self,
        registered: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retry.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.default_source_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "default_source_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let mut names = BTreeSet::new();
        for name in registered {
            if !names.insert(name) {
                return Err(ConfigError::DuplicateSource(name.to_string()));
            }
        }
        for required in &self.required_sources {
            if !names.contains(required.as_str()) {
                return Err(ConfigError::UnknownRequiredSource(required.clone()));
            }
        }
        Ok(())
    }
}

/// Split a comma-separated list, trimming entries and dropping blanks.
pub fn parse_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read a required environment variable.
pub fn env_var(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(name.to_string())),
    }
}

/// Read an optional environment variable, treating blanks as unset.
pub fn env_var_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(350));
        assert_eq!(policy.delay_after(40), Duration::from_millis(350));
    }

    #[test]
    fn test_parse_list_trims_and_drops_blanks() {
        assert_eq!(parse_list(" breaking, docs ,,"), vec!["breaking", "docs"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_policy_for_uses_overrides() {
        let mut config = RunConfig::default();
        config
            .source_timeouts
            .insert("confluence".to_string(), Duration::from_secs(5));

        let jira = config.policy_for("jira");
        assert!(jira.required);
        assert_eq!(jira.timeout, Duration::from_secs(30));

        let confluence = config.policy_for("confluence");
        assert!(!confluence.required);
        assert_eq!(confluence.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_unknown_required_source() {
        let config = RunConfig::default();
        let err = config.validate(["bitbucket-prs"]).unwrap_err();
        assert_eq!(err, ConfigError::UnknownRequiredSource("jira".to_string()));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_zero_attempts() {
        let config = RunConfig::default();
        let err = config.validate(["jira", "jira"]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSource(_)));

        let mut config = RunConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate(["jira"]).is_err());
    }

    #[test]
    fn test_layout_paths() {
        let release = ReleaseDescriptor::parse("release/1.4.0", None).unwrap();
        let layout = DocumentLayout::default();
        assert_eq!(layout.release_notes_path(&release), "docs/releases/1.4.0.md");
        assert_eq!(layout.working_branch(&release), "docs/release-1.4.0");
        assert_eq!(layout.guide_for("API"), Some("docs/api-guide.md"));
        assert_eq!(layout.guide_for("billing"), None);
    }

    #[test]
    fn test_change_request_template_rendering() {
        let release = ReleaseDescriptor::parse("release/1.4.0", None).unwrap();
        let template = ChangeRequestTemplate::default();
        assert_eq!(template.render_title(&release), "Docs: Release 1.4.0");
        assert!(template
            .render_description(&release)
            .contains("release/1.4.0"));
        assert_eq!(template.labels, vec!["breaking", "docs"]);
    }
}
