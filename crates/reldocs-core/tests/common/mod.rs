//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use reldocs_core::domain::{Commit, Issue, Page, PullRequest};
use reldocs_core::fakes::{MemoryRepositoryHost, ScriptedSource};
use reldocs_core::{
    ContentGenerator, Orchestrator, RetryPolicy, RunConfig, SourceAdapter, SourceRecord,
    TemplateGenerator,
};

pub const RELEASE: &str = "release/1.2.3";

pub fn at(day: u32, hour: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

pub fn issue(key: &str, summary: &str, issue_type: &str, components: &[&str]) -> SourceRecord {
    SourceRecord::Issue(Issue {
        key: key.to_string(),
        summary: summary.to_string(),
        issue_type: issue_type.to_string(),
        status: "Done".to_string(),
        priority: "Medium".to_string(),
        components: components.iter().map(|c| c.to_string()).collect(),
        labels: vec![],
        fix_version: Some("1.2.3".to_string()),
        epic_key: None,
        changelog: None,
        breaking_change: false,
        assignee: None,
        created: Some(at(1, 9)),
        updated: Some(at(2, 9)),
    })
}

pub fn pull_request(id: u64, title: &str, files: &[&str]) -> SourceRecord {
    SourceRecord::PullRequest(PullRequest {
        id,
        title: title.to_string(),
        description: None,
        author: "dev".to_string(),
        source_branch: format!("feature/{id}"),
        target_branch: RELEASE.to_string(),
        state: "MERGED".to_string(),
        url: Some(format!("https://bitbucket.org/acme/app/pull-requests/{id}")),
        labels: vec![],
        linked_issues: vec![],
        changed_files: files.iter().map(|f| f.to_string()).collect(),
        created_on: Some(at(3, 9)),
        updated_on: Some(at(3, 10)),
    })
}

pub fn commit(hash: &str, message: &str, hour: u32) -> SourceRecord {
    SourceRecord::Commit(Commit {
        hash: hash.to_string(),
        message: message.to_string(),
        author: "dev".to_string(),
        date: Some(at(4, hour)),
        changed_files: vec![],
    })
}

pub fn page(id: &str, title: &str) -> SourceRecord {
    SourceRecord::Page(Page {
        id: id.to_string(),
        title: title.to_string(),
        content: "<p>context</p>".to_string(),
        space_key: "DOCS".to_string(),
        version: 1,
        labels: vec!["release-notes".to_string()],
        created: Some(at(1, 8)),
        updated: Some(at(1, 8)),
    })
}

/// Two issues (one feature, one fix).
pub fn jira_records() -> Vec<SourceRecord> {
    vec![
        issue("APP-1", "Export reports as CSV", "Story", &["api"]),
        issue("APP-2", "Crash when saving empty profile", "Bug", &[]),
    ]
}

/// Five commits without a conventional prefix.
pub fn commit_records() -> Vec<SourceRecord> {
    vec![
        commit("a1b2c3d4e5", "Bump version to 1.2.3", 1),
        commit("b2c3d4e5f6", "Update dependencies", 2),
        commit("c3d4e5f6a7", "Merge branch 'develop' into release/1.2.3", 3),
        commit("d4e5f6a7b8", "Tidy build scripts", 4),
        commit("e5f6a7b8c9", "Regenerate lockfile", 5),
    ]
}

pub fn confluence_records() -> Vec<SourceRecord> {
    vec![page("98765", "Release 1.2.2 notes")]
}

/// Jira required, short backoff, short timeouts.
pub fn config() -> RunConfig {
    RunConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        },
        default_source_timeout: Duration::from_secs(5),
        ..RunConfig::default()
    }
}

pub fn dry_run_config() -> RunConfig {
    RunConfig {
        dry_run: true,
        ..config()
    }
}

/// The four standard sources, all healthy.
pub fn healthy_sources() -> Vec<Arc<ScriptedSource>> {
    vec![
        Arc::new(ScriptedSource::records("jira", jira_records())),
        Arc::new(ScriptedSource::records("bitbucket-prs", vec![])),
        Arc::new(ScriptedSource::records("bitbucket-commits", commit_records())),
        Arc::new(ScriptedSource::records("confluence", confluence_records())),
    ]
}

pub fn orchestrator(
    config: RunConfig,
    sources: &[Arc<ScriptedSource>],
    host: Arc<MemoryRepositoryHost>,
) -> Orchestrator {
    let generator: Arc<dyn ContentGenerator> =
        Arc::new(TemplateGenerator::new(config.layout.clone()));
    orchestrator_with_generator(config, sources, generator, host)
}

pub fn orchestrator_with_generator(
    config: RunConfig,
    sources: &[Arc<ScriptedSource>],
    generator: Arc<dyn ContentGenerator>,
    host: Arc<MemoryRepositoryHost>,
) -> Orchestrator {
    let adapters: Vec<Arc<dyn SourceAdapter>> = sources
        .iter()
        .map(|s| Arc::clone(s) as Arc<dyn SourceAdapter>)
        .collect();
    Orchestrator::new(config, adapters, generator, host).unwrap()
}
