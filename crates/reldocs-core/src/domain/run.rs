//! Run lifecycle: states, per-source outcomes, write plans and the terminal result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::change_set::ChangeSet;
use super::descriptor::ReleaseDescriptor;
use super::error::SourceErrorKind;
use super::record::SourceRecord;

/// Orchestrator state machine.
///
/// `Idle → Validating → Gathering → Categorizing → Generating → Writing → Completed`,
/// with `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Validating,
    Gathering,
    Categorizing,
    Generating,
    Writing,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    /// The only forward transition allowed out of this state.
    pub fn next(&self) -> Option<RunState> {
        match self {
            RunState::Idle => Some(RunState::Validating),
            RunState::Validating => Some(RunState::Gathering),
            RunState::Gathering => Some(RunState::Categorizing),
            RunState::Categorizing => Some(RunState::Generating),
            RunState::Generating => Some(RunState::Writing),
            RunState::Writing => Some(RunState::Completed),
            RunState::Completed | RunState::Failed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Validating => "validating",
            RunState::Gathering => "gathering",
            RunState::Categorizing => "categorizing",
            RunState::Generating => "generating",
            RunState::Writing => "writing",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    PartialSuccess,
    Failed,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, RunStatus::Failed)
    }
}

/// Terminal result of one source adapter within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GatherResult {
    Records(Vec<SourceRecord>),
    Failed {
        kind: SourceErrorKind,
        last_error: String,
        /// The failure was caused by run cancellation rather than the source.
        cancelled: bool,
    },
}

/// Exactly one per registered source adapter per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatherOutcome {
    pub source: String,
    pub required: bool,
    pub attempts: u32,
    pub result: GatherResult,
}

impl GatherOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.result, GatherResult::Records(_))
    }

    pub fn records(&self) -> &[SourceRecord] {
        match &self.result {
            GatherResult::Records(records) => records,
            GatherResult::Failed { .. } => &[],
        }
    }

    pub fn report(&self) -> SourceReport {
        let status = match &self.result {
            GatherResult::Records(records) => SourceStatus::Succeeded {
                records: records.len(),
            },
            GatherResult::Failed {
                kind,
                last_error,
                cancelled,
            } => SourceStatus::Failed {
                kind: *kind,
                error: last_error.clone(),
                cancelled: *cancelled,
            },
        };
        SourceReport {
            source: self.source.clone(),
            required: self.required,
            attempts: self.attempts,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Succeeded {
        records: usize,
    },
    Failed {
        kind: SourceErrorKind,
        error: String,
        cancelled: bool,
    },
}

/// Record-free summary of a [`GatherOutcome`], carried in the run result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: String,
    pub required: bool,
    pub attempts: u32,
    #[serde(flatten)]
    pub status: SourceStatus,
}

impl SourceReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, SourceStatus::Failed { .. })
    }
}

/// The remote branch + review request for a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequestRef {
    pub id: u64,
    pub url: Option<String>,
    pub title: String,
    pub source_branch: String,
    pub destination_branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Added,
    Modified,
    Unchanged,
}

/// Planned write of one file on the working branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub change: FileChangeKind,
    /// sha256 of the current content, when the file exists.
    pub before_digest: Option<String>,
    pub after_digest: String,
    /// Full materialized content to write.
    pub content: String,
}

/// The intended diff against the remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritePlan {
    pub branch: String,
    pub base_branch: String,
    /// Head of the base branch when the plan was computed.
    pub base_commit: String,
    pub branch_exists: bool,
    /// Revision the current file contents were read from; the commit's
    /// expected parent.
    pub parent_commit: String,
    /// Digest over the full materialized file set; recorded in commit trailers.
    pub content_digest: String,
    pub changes: Vec<FileChange>,
    pub existing_request: Option<ChangeRequestRef>,
}

impl WritePlan {
    pub fn has_changes(&self) -> bool {
        self.changes
            .iter()
            .any(|c| c.change != FileChangeKind::Unchanged)
    }

    pub fn changed_paths(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.change != FileChangeKind::Unchanged)
            .map(|c| c.path.as_str())
            .collect()
    }
}

/// What the write stage did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Publication {
    /// The run ended before the writer.
    NotAttempted,
    /// Dry run: intended diff only, no remote mutation.
    DryRun { plan: WritePlan },
    /// The base branch already holds the generated content; nothing to publish.
    NoChanges { plan: WritePlan },
    Published {
        request: ChangeRequestRef,
        /// Whether the request was opened by this run (vs. reused).
        opened: bool,
        /// Commit pushed by this run; `None` when the branch already converged.
        commit: Option<String>,
        plan: WritePlan,
    },
}

impl Publication {
    pub fn plan(&self) -> Option<&WritePlan> {
        match self {
            Publication::NotAttempted => None,
            Publication::DryRun { plan }
            | Publication::NoChanges { plan }
            | Publication::Published { plan, .. } => Some(plan),
        }
    }

    pub fn request(&self) -> Option<&ChangeRequestRef> {
        match self {
            Publication::Published { request, .. } => Some(request),
            _ => None,
        }
    }
}

/// Serializable description of the fatal error of a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: String,
    pub stage: RunState,
    pub message: String,
}

/// Terminal artifact of a run. Built once by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub release: Option<ReleaseDescriptor>,
    pub status: RunStatus,
    pub final_state: RunState,
    pub transitions: Vec<RunState>,
    pub change_set: Option<ChangeSet>,
    /// One entry per registered source, successes included.
    pub sources: Vec<SourceReport>,
    pub documents: Vec<String>,
    pub publication: Publication,
    pub error: Option<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunResult {
    pub fn source_failures(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| s.is_failure())
    }

    pub fn was_cancelled(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.kind == "cancellation_error")
    }
}
