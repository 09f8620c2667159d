//! Idempotent write-back of generated documents to the docs repository.
//!
//! [`RepositoryWriter::plan`] computes the intended diff without mutating
//! anything. [`RepositoryWriter::apply`] then converges the remote:
//!
//! 1. Fail with a write conflict if the working branch moved since planning
//!    or its head was not produced by a previous run (no digest trailer).
//! 2. Create the working branch from the base head when it is missing.
//! 3. Commit the changed files with the planned parent as the expected
//!    parent (compare-and-swap), unless the branch already holds them.
//! 4. Re-check for an open change request right before opening one, and
//!    treat a creation race as convergence onto the existing request.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::RunConfig;
use crate::domain::{
    ChangeRequestRef, FileChange, FileChangeKind, GeneratedDocument, HostError, Publication,
    ReleaseDescriptor, RunError, WritePlan,
};
use crate::obs;

pub mod bitbucket;
pub mod plan;

pub use bitbucket::{BitbucketRepositoryHost, DocsRepoConfig};

/// Tip of a branch on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchHead {
    pub commit: String,
    pub message: String,
}

/// Everything needed to open a change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequestSpec {
    pub title: String,
    pub description: String,
    pub source_branch: String,
    pub destination_branch: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
}

/// Remote repository host operations used by the writer.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    async fn default_branch(&self) -> Result<String, HostError>;

    /// `None` when the branch does not exist.
    async fn branch_head(&self, branch: &str) -> Result<Option<BranchHead>, HostError>;

    /// `None` when the file does not exist at `revision`.
    async fn read_file(&self, revision: &str, path: &str) -> Result<Option<String>, HostError>;

    async fn create_branch(&self, branch: &str, from_commit: &str) -> Result<(), HostError>;

    /// Commit `files` (path, content) on `branch`. Fails with
    /// [`HostError::Conflict`] when the branch head is not `expected_parent`.
    /// Returns the new commit id.
    async fn commit_files(
        &self,
        branch: &str,
        expected_parent: &str,
        message: &str,
        files: &[(String, String)],
    ) -> Result<String, HostError>;

    async fn find_open_request(
        &self,
        source_branch: &str,
    ) -> Result<Option<ChangeRequestRef>, HostError>;

    /// Fails with [`HostError::AlreadyExists`] when an open request for the
    /// same source branch exists.
    async fn create_request(&self, spec: &ChangeRequestSpec) -> Result<ChangeRequestRef, HostError>;
}

/// Applies generated documents to the docs repository through a [`RepositoryHost`].
pub struct RepositoryWriter {
    host: Arc<dyn RepositoryHost>,
}

impl RepositoryWriter {
    pub fn new(host: Arc<dyn RepositoryHost>) -> Self {
        Self { host }
    }

    /// Plan, then apply unless the run is a dry run.
    pub async fn publish(
        &self,
        release: &ReleaseDescriptor,
        documents: &[GeneratedDocument],
        config: &RunConfig,
    ) -> Result<Publication, RunError> {
        let plan = self.plan(release, documents, config).await?;
        if config.dry_run {
            info!(
                branch = %plan.branch,
                changed = plan.changed_paths().len(),
                "dry run: skipping remote writes"
            );
            return Ok(Publication::DryRun { plan });
        }
        self.apply(plan, release, config).await
    }

    /// Compute the intended diff. Read-only.
    pub async fn plan(
        &self,
        release: &ReleaseDescriptor,
        documents: &[GeneratedDocument],
        config: &RunConfig,
    ) -> Result<WritePlan, RunError> {
        let branch = config.layout.working_branch(release);
        let existing_request = self
            .host
            .find_open_request(&branch)
            .await
            .map_err(|e| host_error(&branch, e))?;

        let base_branch = self
            .host
            .default_branch()
            .await
            .map_err(|e| host_error(&branch, e))?;
        let base_head = self
            .host
            .branch_head(&base_branch)
            .await
            .map_err(|e| host_error(&branch, e))?
            .ok_or_else(|| {
                RunError::Write(HostError::NotFound(format!("base branch {base_branch}")))
            })?;
        let head = self
            .host
            .branch_head(&branch)
            .await
            .map_err(|e| host_error(&branch, e))?;

        let parent_commit = head
            .as_ref()
            .map(|h| h.commit.clone())
            .unwrap_or_else(|| base_head.commit.clone());

        let mut changes = Vec::with_capacity(documents.len());
        for doc in documents {
            let current = self
                .host
                .read_file(&parent_commit, &doc.path)
                .await
                .map_err(|e| host_error(&branch, e))?;
            let content = plan::materialize(doc, current.as_deref());
            let after_digest = plan::sha256_hex(&content);
            let before_digest = current.as_deref().map(plan::sha256_hex);
            let change = match &before_digest {
                None => FileChangeKind::Added,
                Some(before) if *before == after_digest => FileChangeKind::Unchanged,
                Some(_) => FileChangeKind::Modified,
            };
            changes.push(FileChange {
                path: doc.path.clone(),
                change,
                before_digest,
                after_digest,
                content,
            });
        }

        let content_digest = plan::content_digest(
            changes
                .iter()
                .map(|c| (c.path.as_str(), c.content.as_str())),
        );
        debug!(
            branch = %branch,
            digest = %content_digest,
            changed = changes.iter().filter(|c| c.change != FileChangeKind::Unchanged).count(),
            "write plan computed"
        );

        Ok(WritePlan {
            branch,
            base_branch,
            base_commit: base_head.commit,
            branch_exists: head.is_some(),
            parent_commit,
            content_digest,
            changes,
            existing_request,
        })
    }

    /// Converge the remote onto `plan`.
    pub async fn apply(
        &self,
        plan: WritePlan,
        release: &ReleaseDescriptor,
        config: &RunConfig,
    ) -> Result<Publication, RunError> {
        let branch = plan.branch.clone();
        let conflict = |reason: String| RunError::WriteConflict {
            branch: branch.clone(),
            reason,
        };

        let head = self
            .host
            .branch_head(&branch)
            .await
            .map_err(|e| host_error(&branch, e))?;

        let commit_needed = match &head {
            Some(head) => {
                if head.commit != plan.parent_commit {
                    return Err(conflict(format!(
                        "head moved from {} to {} while planning",
                        plan.parent_commit, head.commit
                    )));
                }
                let fresh = head.commit == plan.base_commit;
                if !fresh && plan::trailer_digest(&head.message).is_none() {
                    return Err(conflict(format!(
                        "head {} was not produced by reldocs",
                        head.commit
                    )));
                }
                plan.has_changes()
            }
            None => {
                if plan.branch_exists {
                    return Err(conflict("branch was deleted while planning".to_string()));
                }
                if !plan.has_changes() {
                    info!(branch = %branch, "base branch already up to date, nothing to publish");
                    return Ok(Publication::NoChanges { plan });
                }
                self.host
                    .create_branch(&branch, &plan.base_commit)
                    .await
                    .map_err(|e| host_error(&branch, e))?;
                true
            }
        };

        let commit = if commit_needed {
            let files: Vec<(String, String)> = plan
                .changes
                .iter()
                .filter(|c| c.change != FileChangeKind::Unchanged)
                .map(|c| (c.path.clone(), c.content.clone()))
                .collect();
            let message = plan::commit_message(&release.version_string(), &plan.content_digest);
            let id = self
                .host
                .commit_files(&branch, &plan.parent_commit, &message, &files)
                .await
                .map_err(|e| host_error(&branch, e))?;
            Some(id)
        } else {
            debug!(branch = %branch, "branch already holds the generated content");
            None
        };

        let (request, opened) = self.ensure_request(release, &plan, config).await?;
        obs::emit_write_applied(
            &branch,
            plan.changed_paths().len(),
            commit.as_deref(),
            opened,
        );

        Ok(Publication::Published {
            request,
            opened,
            commit,
            plan,
        })
    }

    /// Reuse the open request for the working branch or open one.
    async fn ensure_request(
        &self,
        release: &ReleaseDescriptor,
        plan: &WritePlan,
        config: &RunConfig,
    ) -> Result<(ChangeRequestRef, bool), RunError> {
        let branch = &plan.branch;
        if let Some(existing) = self
            .host
            .find_open_request(branch)
            .await
            .map_err(|e| host_error(branch, e))?
        {
            debug!(request = existing.id, "reusing open change request");
            return Ok((existing, false));
        }

        let spec = ChangeRequestSpec {
            title: config.change_request.render_title(release),
            description: config.change_request.render_description(release),
            source_branch: branch.clone(),
            destination_branch: plan.base_branch.clone(),
            labels: config.change_request.labels.clone(),
            assignees: config.change_request.assignees.clone(),
        };

        match self.host.create_request(&spec).await {
            Ok(created) => {
                info!(request = created.id, branch = %branch, "opened change request");
                Ok((created, true))
            }
            Err(HostError::AlreadyExists(detail)) => {
                debug!(detail = %detail, "change request created concurrently, converging");
                self.host
                    .find_open_request(branch)
                    .await
                    .map_err(|e| host_error(branch, e))?
                    .map(|existing| (existing, false))
                    .ok_or_else(|| {
                        RunError::Write(HostError::AlreadyExists(format!(
                            "request for {branch} reported as existing but not found"
                        )))
                    })
            }
            Err(err) => Err(host_error(branch, err)),
        }
    }
}

fn host_error(branch: &str, err: HostError) -> RunError {
    match err {
        HostError::Conflict(reason) => RunError::WriteConflict {
            branch: branch.to_string(),
            reason,
        },
        other => RunError::Write(other),
    }
}
