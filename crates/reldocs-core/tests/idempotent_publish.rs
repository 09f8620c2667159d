//! Write-back convergence: re-runs, concurrent edits and request races.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use reldocs_core::fakes::{MemoryRepositoryHost, ScriptedSource};
use reldocs_core::writer::plan::trailer_digest;
use reldocs_core::{
    ChangeSet, ContentGenerator, GeneratedDocument, GenerationError, Publication,
    ReleaseDescriptor, RepositoryHost, RunRequest, RunResult, RunState, RunStatus,
};
use tokio_util::sync::CancellationToken;

const BRANCH: &str = "docs/release-1.2.3";

async fn run_once(host: &Arc<MemoryRepositoryHost>, sources: &[Arc<ScriptedSource>]) -> RunResult {
    orchestrator(config(), sources, host.clone())
        .run(&RunRequest::new(RELEASE), &CancellationToken::new())
        .await
}

/// Generator with a fixed changelog section body, standing in for an
/// external writer whose output shape the core does not control.
struct FixedSectionGenerator {
    changelog_body: &'static str,
}

#[async_trait]
impl ContentGenerator for FixedSectionGenerator {
    async fn generate(
        &self,
        _change_set: &ChangeSet,
        release: &ReleaseDescriptor,
    ) -> Result<Vec<GeneratedDocument>, GenerationError> {
        let anchor = format!("## [{}]", release.version_string());
        Ok(vec![
            GeneratedDocument::new_file("docs/releases/1.2.3.md", "# Release 1.2.3\n"),
            GeneratedDocument::section(
                "docs/CHANGELOG.md",
                anchor.clone(),
                format!("{anchor}\n{}", self.changelog_body),
            ),
            GeneratedDocument::section(
                "docs/api-guide.md",
                "## Updates in 1.2.3",
                "## Updates in 1.2.3\n### Breaking\n- a\n#### Migration\n- b\n",
            ),
        ])
    }
}

async fn run_with_generator(
    host: &Arc<MemoryRepositoryHost>,
    generator: FixedSectionGenerator,
) -> RunResult {
    orchestrator_with_generator(config(), &healthy_sources(), Arc::new(generator), host.clone())
        .run(&RunRequest::new(RELEASE), &CancellationToken::new())
        .await
}

#[tokio::test]
async fn second_run_with_same_evidence_is_a_no_op() {
    let host = Arc::new(MemoryRepositoryHost::new());

    let first = run_once(&host, &healthy_sources()).await;
    assert_eq!(first.status, RunStatus::Succeeded);
    assert_eq!(host.commits_made(), 1);
    assert_eq!(host.requests_opened(), 1);

    let second = run_once(&host, &healthy_sources()).await;
    assert_eq!(second.status, RunStatus::Succeeded);
    match &second.publication {
        Publication::Published { opened, commit, plan, request } => {
            assert!(!opened);
            assert!(commit.is_none());
            assert!(!plan.has_changes());
            assert_eq!(Some(request), first.publication.request());
        }
        other => panic!("expected publication, got {other:?}"),
    }

    assert_eq!(host.commits_made(), 1);
    assert_eq!(host.requests_opened(), 1);
    assert_eq!(host.open_requests().len(), 1);
}

#[tokio::test]
async fn new_evidence_updates_the_existing_branch_and_request() {
    let host = Arc::new(MemoryRepositoryHost::new());
    run_once(&host, &healthy_sources()).await;

    let mut records = jira_records();
    records.push(issue("APP-3", "Dark mode for dashboards", "Story", &["ui"]));
    let sources = vec![
        Arc::new(ScriptedSource::records("jira", records)),
        Arc::new(ScriptedSource::records("bitbucket-commits", commit_records())),
    ];
    let result = run_once(&host, &sources).await;

    assert_eq!(result.status, RunStatus::Succeeded);
    assert!(matches!(
        result.publication,
        Publication::Published { opened: false, commit: Some(_), .. }
    ));
    assert_eq!(host.commits_made(), 2);
    assert_eq!(host.requests_opened(), 1);

    let notes = host.file(BRANCH, "docs/releases/1.2.3.md").unwrap();
    assert!(notes.contains("Dark mode for dashboards (APP-3)"));
    assert!(host.file(BRANCH, "docs/ui-guide.md").is_some());

    let head = host.branch_head(BRANCH).await.unwrap().unwrap();
    let plan = result.publication.plan().unwrap();
    assert_eq!(trailer_digest(&head.message), Some(plan.content_digest.as_str()));
}

#[tokio::test]
async fn manual_edit_on_working_branch_is_a_write_conflict() {
    let host = Arc::new(MemoryRepositoryHost::new());
    run_once(&host, &healthy_sources()).await;
    host.push_external_commit(BRANCH, "docs/releases/1.2.3.md", "# Hand-edited\n")
        .unwrap();

    let result = run_once(&host, &healthy_sources()).await;

    assert_eq!(result.status, RunStatus::Failed);
    let failure = result.error.unwrap();
    assert_eq!(failure.kind, "write_conflict_error");
    assert_eq!(failure.stage, RunState::Writing);
    assert!(failure.message.contains(BRANCH));
    assert_eq!(host.commits_made(), 1);
    assert_eq!(
        host.file(BRANCH, "docs/releases/1.2.3.md").as_deref(),
        Some("# Hand-edited\n")
    );
}

#[tokio::test]
async fn request_creation_race_converges_onto_existing_request() {
    let host = Arc::new(MemoryRepositoryHost::new());
    host.simulate_request_race();

    let result = run_once(&host, &healthy_sources()).await;

    assert_eq!(result.status, RunStatus::Succeeded);
    assert!(matches!(
        result.publication,
        Publication::Published { opened: false, commit: Some(_), .. }
    ));
    assert_eq!(host.open_requests().len(), 1);
    assert_eq!(host.requests_opened(), 0);
}

#[tokio::test]
async fn changelog_section_is_spliced_above_previous_releases() {
    let existing = "# Changelog\n\n## [1.2.2] - release/1.2.2\n\n### Fixed\n- Old fix (APP-0)\n";
    let host = Arc::new(MemoryRepositoryHost::new().with_file("docs/CHANGELOG.md", existing));

    run_once(&host, &healthy_sources()).await;

    let changelog = host.file(BRANCH, "docs/CHANGELOG.md").unwrap();
    assert!(changelog.starts_with("# Changelog\n"));
    let new = changelog.find("## [1.2.3] - release/1.2.3").unwrap();
    let old = changelog.find("## [1.2.2] - release/1.2.2").unwrap();
    assert!(new < old);
    assert!(changelog.contains("- Old fix (APP-0)"));
    assert_eq!(changelog.matches("## [1.2.3]").count(), 1);
}

#[tokio::test]
async fn base_branch_already_holding_the_content_publishes_nothing() {
    let preview_host = Arc::new(MemoryRepositoryHost::new());
    let preview = orchestrator(dry_run_config(), &healthy_sources(), preview_host)
        .run(&RunRequest::new(RELEASE), &CancellationToken::new())
        .await;
    let plan = preview.publication.plan().unwrap();

    let mut seeded = MemoryRepositoryHost::new();
    for change in &plan.changes {
        seeded = seeded.with_file(&change.path, &change.content);
    }
    let host = Arc::new(seeded);

    let result = run_once(&host, &healthy_sources()).await;

    assert_eq!(result.status, RunStatus::Succeeded);
    assert!(matches!(result.publication, Publication::NoChanges { .. }));
    assert_eq!(host.mutations(), 0);
    assert!(!host.branch_exists(BRANCH));
}

#[tokio::test]
async fn branch_left_at_base_by_an_interrupted_run_is_reused() {
    let host = Arc::new(MemoryRepositoryHost::new());
    let base = host.branch_head("main").await.unwrap().unwrap().commit;
    host.create_branch(BRANCH, &base).await.unwrap();

    let result = run_once(&host, &healthy_sources()).await;

    assert_eq!(result.status, RunStatus::Succeeded);
    assert!(matches!(
        result.publication,
        Publication::Published { opened: true, commit: Some(_), .. }
    ));
    assert_eq!(host.commits_made(), 1);
}

#[tokio::test]
async fn external_generator_with_nested_headings_converges() {
    let existing = "# Changelog\n\n## [1.2.2]\n- Old fix\n";
    let host = Arc::new(MemoryRepositoryHost::new().with_file("docs/CHANGELOG.md", existing));
    let body = "- a\n### Migration\n- b\n#### Notes\n- c\n";

    for _ in 0..3 {
        let generator = FixedSectionGenerator { changelog_body: body };
        let result = run_with_generator(&host, generator).await;
        assert_eq!(result.status, RunStatus::Succeeded);
    }

    assert_eq!(host.commits_made(), 1);
    assert_eq!(host.requests_opened(), 1);
    let changelog = host.file(BRANCH, "docs/CHANGELOG.md").unwrap();
    assert_eq!(changelog.matches("### Migration").count(), 1);
    assert_eq!(changelog.matches("#### Notes").count(), 1);
    assert!(changelog.find("## [1.2.3]").unwrap() < changelog.find("## [1.2.2]").unwrap());
    let guide = host.file(BRANCH, "docs/api-guide.md").unwrap();
    assert_eq!(guide.matches("#### Migration").count(), 1);
}

#[tokio::test]
async fn section_that_would_not_splice_back_fails_before_writing() {
    let host = Arc::new(MemoryRepositoryHost::new());
    let body = "- a\n## Migration\n- b\n";

    let generator = FixedSectionGenerator { changelog_body: body };
    let result = run_with_generator(&host, generator).await;

    assert_eq!(result.status, RunStatus::Failed);
    let failure = result.error.unwrap();
    assert_eq!(failure.kind, "generation_error");
    assert_eq!(failure.stage, RunState::Generating);
    assert!(failure.message.contains("## Migration"));
    assert_eq!(host.mutations(), 0);
}
