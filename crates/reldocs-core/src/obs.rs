//! Structured lifecycle events for a documentation run.
//!
//! - `run_span` tagging everything inside a run with its id
//! - `emit_*` functions, one per lifecycle event
//!
//! Events are emitted at `info!`; degradations at `warn!`. Filter with `RUST_LOG`.

use tracing::{info, warn};

use crate::domain::{RunState, RunStatus, SourceErrorKind};

/// The span a run executes in, for instrumenting futures.
pub fn run_span(run_id: &str, release: &str) -> tracing::Span {
    tracing::info_span!("reldocs.run", run_id = %run_id, release = %release)
}

pub fn emit_run_started(run_id: &str, release: &str, dry_run: bool) {
    info!(event = "run.started", run_id = %run_id, release = %release, dry_run = dry_run);
}

pub fn emit_state_changed(run_id: &str, from: RunState, to: RunState) {
    info!(
        event = "run.state_changed",
        run_id = %run_id,
        from = %from,
        to = %to,
    );
}

/// A single adapter attempt failed; the gatherer may still retry.
pub fn emit_source_attempt_failed(
    source: &str,
    attempt: u32,
    kind: SourceErrorKind,
    error: &dyn std::fmt::Display,
    will_retry: bool,
) {
    warn!(
        event = "source.attempt_failed",
        source = %source,
        attempt = attempt,
        kind = ?kind,
        error = %error,
        will_retry = will_retry,
    );
}

pub fn emit_source_finished(source: &str, attempts: u32, records: Option<usize>, required: bool) {
    match records {
        Some(count) => info!(
            event = "source.finished",
            source = %source,
            attempts = attempts,
            records = count,
            required = required,
            success = true,
        ),
        None => warn!(
            event = "source.finished",
            source = %source,
            attempts = attempts,
            required = required,
            success = false,
        ),
    }
}

pub fn emit_write_applied(branch: &str, changed_files: usize, commit: Option<&str>, opened: bool) {
    info!(
        event = "write.applied",
        branch = %branch,
        changed_files = changed_files,
        commit = commit.unwrap_or("-"),
        request_opened = opened,
    );
}

pub fn emit_run_finished(
    run_id: &str,
    status: RunStatus,
    duration_ms: u64,
    degraded_sources: usize,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = ?status,
        duration_ms = duration_ms,
        degraded_sources = degraded_sources,
    );
}

/// Fatal run error (warning level; the run result carries the details).
pub fn emit_run_failed(run_id: &str, stage: RunState, kind: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "run.failed",
        run_id = %run_id,
        stage = %stage,
        kind = %kind,
        error = %error,
    );
}
