//! Run state machine.
//!
//! `Idle → Validating → Gathering → Categorizing → Generating → Writing → Completed`,
//! with `Failed` reachable from any non-terminal state. The orchestrator is
//! the only place that decides between `Succeeded`, `PartialSuccess` and
//! `Failed`, and it always returns a [`RunResult`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{warn, Instrument};

use crate::categorize::categorize;
use crate::config::RunConfig;
use crate::context::RunContext;
use crate::domain::{
    ConfigError, ReleaseDescriptor, RunError, RunFailure, RunResult, RunState, RunStatus,
    SourceStatus,
};
use crate::gather::{self, GatherVerdict, Gatherer};
use crate::generate::{generate_documents, ContentGenerator};
use crate::obs;
use crate::sources::SourceAdapter;
use crate::writer::{RepositoryHost, RepositoryWriter};

/// Input of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Release branch, e.g. `release/1.2.3`.
    pub release: String,
    pub base_tag: Option<String>,
}

impl RunRequest {
    pub fn new(release: impl Into<String>) -> Self {
        Self {
            release: release.into(),
            base_tag: None,
        }
    }

    pub fn with_base_tag(mut self, base_tag: impl Into<String>) -> Self {
        self.base_tag = Some(base_tag.into());
        self
    }
}

/// Drives a run across gatherer, categorizer, generator and writer.
pub struct Orchestrator {
    config: RunConfig,
    gatherer: Gatherer,
    generator: Arc<dyn ContentGenerator>,
    writer: RepositoryWriter,
}

impl Orchestrator {
    /// Fails when the configuration does not fit the registered adapters.
    pub fn new(
        config: RunConfig,
        sources: Vec<Arc<dyn SourceAdapter>>,
        generator: Arc<dyn ContentGenerator>,
        host: Arc<dyn RepositoryHost>,
    ) -> Result<Self, ConfigError> {
        let gatherer = Gatherer::new(sources);
        config.validate(gatherer.source_names())?;
        Ok(Self {
            config,
            gatherer,
            generator,
            writer: RepositoryWriter::new(host),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute one run to a terminal state.
    ///
    /// Cancelling `cancel` moves the current stage straight to `Failed`;
    /// the call still waits for in-flight adapter calls to wind down.
    pub async fn run(&self, request: &RunRequest, cancel: &CancellationToken) -> RunResult {
        let ctx = RunContext::new();
        let span = obs::run_span(ctx.run_id(), &request.release);
        self.execute(ctx, request, cancel).instrument(span).await
    }

    async fn execute(
        &self,
        mut ctx: RunContext,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> RunResult {
        obs::emit_run_started(ctx.run_id(), &request.release, self.config.dry_run);

        let (status, failure) = match self.drive(&mut ctx, request, cancel).await {
            Ok(verdict) => match ctx.advance() {
                Ok(_) => {
                    let status = match verdict {
                        GatherVerdict::Complete => RunStatus::Succeeded,
                        GatherVerdict::Degraded => RunStatus::PartialSuccess,
                    };
                    (status, None)
                }
                Err(err) => (RunStatus::Failed, Some(self.record_failure(&mut ctx, err))),
            },
            Err(err) => (RunStatus::Failed, Some(self.record_failure(&mut ctx, err))),
        };

        let run_id = ctx.run_id().to_string();
        let result = ctx.into_result(status, failure);
        obs::emit_run_finished(
            &run_id,
            result.status,
            result.duration_ms,
            result.source_failures().count(),
        );
        result
    }

    fn record_failure(&self, ctx: &mut RunContext, err: RunError) -> RunFailure {
        let stage = ctx.fail();
        obs::emit_run_failed(ctx.run_id(), stage, err.kind(), &err);
        RunFailure {
            kind: err.kind().to_string(),
            stage,
            message: err.to_string(),
        }
    }

    /// Every stage up to and including `Writing`. The caller moves the
    /// context to its terminal state.
    async fn drive(
        &self,
        ctx: &mut RunContext,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<GatherVerdict, RunError> {
        ctx.advance()?;
        check_cancelled(cancel, RunState::Validating)?;
        let release = ReleaseDescriptor::parse(&request.release, request.base_tag.as_deref())?;
        ctx.set_release(release.clone())?;

        ctx.advance()?;
        check_cancelled(cancel, RunState::Gathering)?;
        let outcomes = self.gatherer.gather(&release, &self.config, cancel).await;
        ctx.merge_outcomes(outcomes)?;
        check_cancelled(cancel, RunState::Gathering)?;

        for outcome in ctx.outcomes() {
            if let SourceStatus::Failed { kind, error, .. } = outcome.report().status {
                warn!(
                    source = %outcome.source,
                    required = outcome.required,
                    kind = ?kind,
                    error = %error,
                    "source degraded"
                );
            }
        }
        let verdict = gather::evaluate(ctx.outcomes())?;

        ctx.advance()?;
        let change_set = categorize(ctx.outcomes(), &self.config.classification);
        ctx.set_change_set(change_set)?;

        ctx.advance()?;
        let documents = {
            let change_set = ctx
                .change_set()
                .ok_or_else(|| RunError::Internal("change set missing".to_string()))?;
            generate_documents(self.generator.as_ref(), change_set, &release, cancel).await?
        };
        ctx.set_documents(documents)?;

        ctx.advance()?;
        check_cancelled(cancel, RunState::Writing)?;
        let publication = self
            .writer
            .publish(&release, ctx.documents(), &self.config)
            .await?;
        ctx.set_publication(publication)?;

        Ok(verdict)
    }
}

fn check_cancelled(cancel: &CancellationToken, stage: RunState) -> Result<(), RunError> {
    if cancel.is_cancelled() {
        Err(RunError::Cancelled { stage })
    } else {
        Ok(())
    }
}
