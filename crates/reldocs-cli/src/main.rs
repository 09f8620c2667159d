//! reldocs - release documentation orchestrator CLI
//!
//! Gathers the evidence for one release branch from Jira, Bitbucket and
//! Confluence, classifies it, renders release notes, changelog and guide
//! updates, and publishes them to the docs repository as a branch plus
//! pull request. Re-running for the same release converges on the same
//! branch and pull request.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use reldocs_core::config::{env_var_opt, parse_list};
use reldocs_core::domain::SourceStatus;
use reldocs_core::telemetry::init_tracing;
use reldocs_core::{
    BitbucketCommitSource, BitbucketConfig, BitbucketPullRequestSource, BitbucketRepositoryHost,
    ConfluenceConfig, ConfluenceSource, ContentGenerator, DocsRepoConfig, JiraConfig, JiraSource,
    Orchestrator, Publication, RepositoryHost, RunConfig, RunRequest, RunResult, RunStatus,
    SourceAdapter, TemplateGenerator,
};

#[derive(Parser, Debug)]
#[command(name = "reldocs")]
#[command(author = "Stevedores Org")]
#[command(version = reldocs_core::VERSION)]
#[command(about = "Generate and publish release documentation", long_about = None)]
struct Cli {
    /// Release branch to document, e.g. release/1.2.3
    #[arg(long, env = "RELEASE_BRANCH")]
    release: String,

    /// Tag to compare against when gathering commits
    #[arg(long, env = "BASE_TAG")]
    base_tag: Option<String>,

    /// Compute the documents and the write plan without touching the docs repository
    #[arg(long, env = "DRY_RUN", value_parser = BoolishValueParser::new())]
    dry_run: bool,

    /// Comma-separated labels for the pull request
    #[arg(long, env = "RELEASE_LABELS", default_value = "breaking,docs")]
    labels: String,

    /// Comma-separated assignees for the pull request
    #[arg(long, env = "PR_ASSIGNEES", default_value = "team-docs")]
    assignees: String,

    /// Attempts per source, including the first
    #[arg(long, env = "RELDOCS_RETRY_ATTEMPTS", default_value_t = 3)]
    retry_attempts: u32,

    /// Backoff before the second attempt, doubled afterwards
    #[arg(long, env = "RELDOCS_BACKOFF_BASE_MS", default_value_t = 500)]
    backoff_base_ms: u64,

    /// Time budget per source attempt
    #[arg(long, env = "RELDOCS_SOURCE_TIMEOUT_SECS", default_value_t = 30)]
    source_timeout_secs: u64,

    /// Comma-separated sources of which at least one must succeed
    #[arg(long, env = "RELDOCS_REQUIRED_SOURCES", default_value = "jira")]
    required_sources: String,

    /// Where dry runs write the materialized documents
    #[arg(long, env = "RELDOCS_OUT_DIR", default_value = "out")]
    out_dir: PathBuf,

    /// Result format on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // A missing .env file is fine; everything can come from the real environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let config = run_config(&cli);
    let sources = build_sources().context("Failed to configure source adapters")?;
    let host = build_host().context("Failed to configure the docs repository")?;
    let generator: Arc<dyn ContentGenerator> =
        Arc::new(TemplateGenerator::new(config.layout.clone()));
    let orchestrator = Orchestrator::new(config, sources, generator, host)
        .context("Invalid run configuration")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let mut request = RunRequest::new(&cli.release);
    if let Some(tag) = &cli.base_tag {
        request = request.with_base_tag(tag);
    }
    let result = orchestrator.run(&request, &cancel).await;

    if let Publication::DryRun { .. } = &result.publication {
        let written = write_dry_run_output(&result, &cli.out_dir).with_context(|| {
            format!("Failed to write dry-run output to {}", cli.out_dir.display())
        })?;
        info!(files = written, out_dir = %cli.out_dir.display(), "dry-run documents written");
    }

    match cli.output {
        OutputFormat::Json => {
            let json =
                serde_json::to_string_pretty(&result).context("Failed to encode run result")?;
            println!("{json}");
        }
        OutputFormat::Text => print!("{}", render_summary(&result)),
    }

    Ok(ExitCode::from(exit_status(&result)))
}

/// Tunables from flags and environment on top of the library defaults.
fn run_config(cli: &Cli) -> RunConfig {
    let mut config = RunConfig {
        dry_run: cli.dry_run,
        default_source_timeout: Duration::from_secs(cli.source_timeout_secs),
        required_sources: parse_list(&cli.required_sources).into_iter().collect(),
        ..RunConfig::default()
    };
    config.retry.max_attempts = cli.retry_attempts;
    config.retry.base_delay = Duration::from_millis(cli.backoff_base_ms);
    config.change_request.labels = parse_list(&cli.labels);
    config.change_request.assignees = parse_list(&cli.assignees);
    config
}

/// Jira and Bitbucket are always registered. Confluence only when
/// `CONFLUENCE_BASE_URL` is set.
fn build_sources() -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let jira = JiraConfig::from_env().context("Jira settings")?;
    let bitbucket = BitbucketConfig::from_env().context("Bitbucket settings")?;

    let mut sources: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(JiraSource::new(jira)?),
        Arc::new(BitbucketPullRequestSource::new(bitbucket.clone())?),
        Arc::new(BitbucketCommitSource::new(bitbucket)?),
    ];

    if env_var_opt("CONFLUENCE_BASE_URL").is_some() {
        let confluence = ConfluenceConfig::from_env().context("Confluence settings")?;
        sources.push(Arc::new(ConfluenceSource::new(confluence)?));
    } else {
        info!("CONFLUENCE_BASE_URL not set, skipping the confluence source");
    }

    Ok(sources)
}

fn build_host() -> Result<Arc<dyn RepositoryHost>> {
    let bitbucket = BitbucketConfig::from_env().context("Bitbucket settings")?;
    let docs = DocsRepoConfig::from_env(&bitbucket)?;
    Ok(Arc::new(BitbucketRepositoryHost::new(docs)?))
}

/// Write every planned file under `out_dir`. Returns the number of files.
fn write_dry_run_output(result: &RunResult, out_dir: &Path) -> Result<usize> {
    let Some(plan) = result.publication.plan() else {
        return Ok(0);
    };
    for change in &plan.changes {
        let target = out_dir.join(&change.path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&target, &change.content)
            .with_context(|| format!("Failed to write {}", target.display()))?;
    }
    Ok(plan.changes.len())
}

/// 0 on success or partial success, 130 when cancelled, 1 otherwise.
fn exit_status(result: &RunResult) -> u8 {
    match result.status {
        RunStatus::Succeeded | RunStatus::PartialSuccess => 0,
        RunStatus::Failed if result.was_cancelled() => 130,
        RunStatus::Failed => 1,
    }
}

fn render_summary(result: &RunResult) -> String {
    let mut out = String::new();
    let status = match result.status {
        RunStatus::Succeeded => "succeeded",
        RunStatus::PartialSuccess => "partially succeeded",
        RunStatus::Failed => "failed",
    };
    let release = result
        .release
        .as_ref()
        .map(|r| r.branch().to_string())
        .unwrap_or_else(|| "(invalid release)".to_string());
    let _ = writeln!(
        out,
        "Run {} for {release} {status} in {}ms",
        result.run_id, result.duration_ms
    );

    if let Some(change_set) = &result.change_set {
        let _ = writeln!(
            out,
            "  Changes: {} features, {} fixes, {} breaking, {} unclassified",
            change_set.features.len(),
            change_set.fixes.len(),
            change_set.breaking.len(),
            change_set.unclassified.len()
        );
    }

    for source in &result.sources {
        let line = match &source.status {
            SourceStatus::Succeeded { records } => format!("{records} records"),
            SourceStatus::Failed { kind, error, .. } => format!("FAILED ({kind}): {error}"),
        };
        let required = if source.required { " [required]" } else { "" };
        let _ = writeln!(
            out,
            "  Source {}{required}: {line} after {} attempt(s)",
            source.source, source.attempts
        );
    }

    for path in &result.documents {
        let _ = writeln!(out, "  Document: {path}");
    }

    match &result.publication {
        Publication::NotAttempted => {}
        Publication::DryRun { plan } => {
            let _ = writeln!(
                out,
                "  Dry run: {} of {} files would change on {}",
                plan.changed_paths().len(),
                plan.changes.len(),
                plan.branch
            );
        }
        Publication::NoChanges { plan } => {
            let _ = writeln!(out, "  {} already holds these documents", plan.base_branch);
        }
        Publication::Published { request, opened, commit, .. } => {
            let verb = if *opened { "Opened" } else { "Updated" };
            let url = request.url.as_deref().unwrap_or("-");
            let _ = writeln!(out, "  {verb} pull request #{} ({url})", request.id);
            if let Some(commit) = commit {
                let _ = writeln!(out, "  Commit: {commit}");
            }
        }
    }

    if let Some(error) = &result.error {
        let _ = writeln!(out, "  Error [{}] during {}: {}", error.kind, error.stage, error.message);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reldocs_core::domain::{Issue, SourceError, SourceRecord};
    use reldocs_core::fakes::{MemoryRepositoryHost, ScriptedSource};

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["reldocs"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn issue() -> SourceRecord {
        SourceRecord::Issue(Issue {
            key: "APP-1".to_string(),
            summary: "Export reports".to_string(),
            issue_type: "Story".to_string(),
            status: "Done".to_string(),
            priority: "High".to_string(),
            components: vec![],
            labels: vec![],
            fix_version: Some("1.2.3".to_string()),
            epic_key: None,
            changelog: None,
            breaking_change: false,
            assignee: None,
            created: Some(Utc::now()),
            updated: Some(Utc::now()),
        })
    }

    async fn run(sources: Vec<Arc<dyn SourceAdapter>>, config: RunConfig) -> RunResult {
        let generator: Arc<dyn ContentGenerator> = Arc::new(TemplateGenerator::default());
        Orchestrator::new(config, sources, generator, Arc::new(MemoryRepositoryHost::new()))
            .unwrap()
            .run(&RunRequest::new("release/1.2.3"), &CancellationToken::new())
            .await
    }

    #[test]
    fn test_flags_map_onto_run_config() {
        let cli = parse(&[
            "--release",
            "release/1.2.3",
            "--dry-run",
            "--labels",
            "docs, release ,",
            "--assignees",
            "alice,bob",
            "--retry-attempts",
            "5",
            "--backoff-base-ms",
            "250",
            "--source-timeout-secs",
            "12",
            "--required-sources",
            "jira,bitbucket-prs",
        ]);
        let config = run_config(&cli);

        assert!(config.dry_run);
        assert_eq!(config.change_request.labels, vec!["docs", "release"]);
        assert_eq!(config.change_request.assignees, vec!["alice", "bob"]);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.default_source_timeout, Duration::from_secs(12));
        assert!(config.required_sources.contains("bitbucket-prs"));
        assert_eq!(config.required_sources.len(), 2);
    }

    #[test]
    fn test_dry_run_env_accepts_boolish_values() {
        for (value, expected) in [
            ("1", true),
            ("yes", true),
            ("true", true),
            ("on", true),
            ("0", false),
            ("no", false),
            ("false", false),
        ] {
            std::env::set_var("DRY_RUN", value);
            let cli = Cli::try_parse_from(["reldocs", "--release", "release/1.2.3"]);
            std::env::remove_var("DRY_RUN");
            let cli = cli.unwrap_or_else(|e| panic!("DRY_RUN={value} rejected: {e}"));
            assert_eq!(cli.dry_run, expected, "DRY_RUN={value}");
        }
    }

    #[test]
    fn test_output_format_values() {
        let cli = parse(&["--release", "release/1.0.0", "--output", "json"]);
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(Cli::try_parse_from(["reldocs", "--release", "r", "--output", "yaml"]).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_writes_planned_files() {
        let config = RunConfig {
            dry_run: true,
            ..RunConfig::default()
        };
        let sources: Vec<Arc<dyn SourceAdapter>> =
            vec![Arc::new(ScriptedSource::records("jira", vec![issue()]))];
        let result = run(sources, config).await;
        let out = tempfile::tempdir().unwrap();

        let written = write_dry_run_output(&result, out.path()).unwrap();

        assert_eq!(written, 2);
        let notes = std::fs::read_to_string(out.path().join("docs/releases/1.2.3.md")).unwrap();
        assert!(notes.contains("Export reports (APP-1)"));
        assert!(out.path().join("docs/CHANGELOG.md").exists());
        assert_eq!(exit_status(&result), 0);
        assert!(render_summary(&result).contains("Dry run: 2 of 2 files would change"));
    }

    #[tokio::test]
    async fn test_failed_run_exits_non_zero() {
        let sources: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(ScriptedSource::failing(
            "jira",
            SourceError::permanent("HTTP 401"),
        ))];
        let result = run(sources, RunConfig::default()).await;

        assert_eq!(exit_status(&result), 1);
        let summary = render_summary(&result);
        assert!(summary.contains("failed"));
        assert!(summary.contains("no_required_source"));
        assert!(summary.contains("Source jira [required]: FAILED"));

        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(write_dry_run_output(&result, tmp.path()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_exits_130() {
        let generator: Arc<dyn ContentGenerator> = Arc::new(TemplateGenerator::default());
        let sources: Vec<Arc<dyn SourceAdapter>> =
            vec![Arc::new(ScriptedSource::records("jira", vec![issue()]))];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = Orchestrator::new(
            RunConfig::default(),
            sources,
            generator,
            Arc::new(MemoryRepositoryHost::new()),
        )
        .unwrap()
        .run(&RunRequest::new("release/1.2.3"), &cancel)
        .await;

        assert_eq!(exit_status(&result), 130);
    }
}
