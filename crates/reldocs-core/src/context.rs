//! Mutable state of one run.
//!
//! A [`RunContext`] is owned by the orchestrator and mutated by one stage at a
//! time through `&mut` access; downstream stages only ever see shared
//! borrows. Each derived artifact can be set exactly once, and only while the
//! run is in the stage that produces it.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    ChangeSet, GatherOutcome, GeneratedDocument, Publication, ReleaseDescriptor, RunError,
    RunFailure, RunResult, RunState, RunStatus,
};
use crate::obs;

#[derive(Debug)]
pub struct RunContext {
    run_id: String,
    started_at: DateTime<Utc>,
    state: RunState,
    transitions: Vec<RunState>,
    release: Option<ReleaseDescriptor>,
    outcomes: Option<Vec<GatherOutcome>>,
    change_set: Option<ChangeSet>,
    documents: Option<Vec<GeneratedDocument>>,
    publication: Publication,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self::with_run_id(Uuid::new_v4().to_string())
    }

    pub fn with_run_id(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            state: RunState::Idle,
            transitions: vec![RunState::Idle],
            release: None,
            outcomes: None,
            change_set: None,
            documents: None,
            publication: Publication::NotAttempted,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transitions(&self) -> &[RunState] {
        &self.transitions
    }

    /// Move to the next state of the forward chain.
    pub fn advance(&mut self) -> Result<RunState, RunError> {
        let next = self.state.next().ok_or_else(|| {
            RunError::Internal(format!("no transition out of terminal state {}", self.state))
        })?;
        self.transition(next);
        Ok(next)
    }

    /// Move to `Failed` from any non-terminal state. Returns the state the
    /// run was in when it failed.
    pub fn fail(&mut self) -> RunState {
        let stage = self.state;
        if !stage.is_terminal() {
            self.transition(RunState::Failed);
        }
        stage
    }

    fn expect_stage(&self, stage: RunState, what: &str) -> Result<(), RunError> {
        if self.state == stage {
            Ok(())
        } else {
            Err(RunError::Internal(format!(
                "{what} can only be recorded while {stage}, run is {}",
                self.state
            )))
        }
    }

    fn transition(&mut self, to: RunState) {
        obs::emit_state_changed(&self.run_id, self.state, to);
        self.state = to;
        self.transitions.push(to);
    }

    pub fn set_release(&mut self, release: ReleaseDescriptor) -> Result<(), RunError> {
        self.expect_stage(RunState::Validating, "release")?;
        set_once(&mut self.release, release, "release")
    }

    pub fn release(&self) -> Option<&ReleaseDescriptor> {
        self.release.as_ref()
    }

    /// Single-writer merge of every adapter's terminal outcome.
    pub fn merge_outcomes(&mut self, outcomes: Vec<GatherOutcome>) -> Result<(), RunError> {
        self.expect_stage(RunState::Gathering, "gather outcomes")?;
        set_once(&mut self.outcomes, outcomes, "gather outcomes")
    }

    pub fn outcomes(&self) -> &[GatherOutcome] {
        self.outcomes.as_deref().unwrap_or(&[])
    }

    pub fn set_change_set(&mut self, change_set: ChangeSet) -> Result<(), RunError> {
        self.expect_stage(RunState::Categorizing, "change set")?;
        set_once(&mut self.change_set, change_set, "change set")
    }

    pub fn change_set(&self) -> Option<&ChangeSet> {
        self.change_set.as_ref()
    }

    pub fn set_documents(&mut self, documents: Vec<GeneratedDocument>) -> Result<(), RunError> {
        self.expect_stage(RunState::Generating, "documents")?;
        set_once(&mut self.documents, documents, "documents")
    }

    pub fn documents(&self) -> &[GeneratedDocument] {
        self.documents.as_deref().unwrap_or(&[])
    }

    pub fn set_publication(&mut self, publication: Publication) -> Result<(), RunError> {
        self.expect_stage(RunState::Writing, "publication")?;
        if !matches!(self.publication, Publication::NotAttempted) {
            return Err(RunError::Internal("publication already recorded".to_string()));
        }
        self.publication = publication;
        Ok(())
    }

    /// Freeze the context into the terminal run result.
    pub fn into_result(self, status: RunStatus, error: Option<RunFailure>) -> RunResult {
        let finished_at = Utc::now();
        let duration_ms = (finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        RunResult {
            run_id: self.run_id,
            release: self.release,
            status,
            final_state: self.state,
            transitions: self.transitions,
            change_set: self.change_set,
            sources: self
                .outcomes
                .unwrap_or_default()
                .iter()
                .map(GatherOutcome::report)
                .collect(),
            documents: self
                .documents
                .unwrap_or_default()
                .into_iter()
                .map(|d| d.path)
                .collect(),
            publication: self.publication,
            error,
            started_at: self.started_at,
            finished_at,
            duration_ms,
        }
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, what: &str) -> Result<(), RunError> {
    if slot.is_some() {
        return Err(RunError::Internal(format!("{what} already recorded")));
    }
    *slot = Some(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_records_transitions() {
        let mut ctx = RunContext::with_run_id("run-1");
        assert_eq!(ctx.advance().unwrap(), RunState::Validating);
        assert_eq!(ctx.advance().unwrap(), RunState::Gathering);
        assert_eq!(ctx.fail(), RunState::Gathering);
        assert_eq!(ctx.state(), RunState::Failed);
        assert!(ctx.advance().is_err());
        assert_eq!(
            ctx.transitions(),
            &[RunState::Idle, RunState::Validating, RunState::Gathering, RunState::Failed]
        );
    }

    /// Advance a fresh context until it sits in `stage`.
    fn context_at(run_id: &str, stage: RunState) -> RunContext {
        let mut ctx = RunContext::with_run_id(run_id);
        while ctx.state() != stage {
            ctx.advance().unwrap();
        }
        ctx
    }

    #[test]
    fn test_artifacts_are_set_once() {
        let mut ctx = context_at("run-1", RunState::Gathering);
        ctx.merge_outcomes(vec![]).unwrap();
        assert!(ctx.merge_outcomes(vec![]).is_err());
        ctx.advance().unwrap();
        ctx.set_change_set(ChangeSet::default()).unwrap();
        assert!(ctx.set_change_set(ChangeSet::default()).is_err());
    }

    #[test]
    fn test_artifacts_are_rejected_outside_their_stage() {
        let mut ctx = context_at("run-3", RunState::Gathering);
        let err = ctx.set_change_set(ChangeSet::default()).unwrap_err();
        assert!(err.to_string().contains("while categorizing"), "{err}");
        assert!(ctx.set_documents(vec![]).is_err());
        assert!(ctx.set_publication(Publication::NotAttempted).is_err());
        assert!(ctx.change_set().is_none());

        ctx.advance().unwrap();
        assert!(ctx.merge_outcomes(vec![]).is_err(), "gathering is over");
        assert!(ctx.outcomes().is_empty());

        ctx.fail();
        assert!(ctx.set_change_set(ChangeSet::default()).is_err());
    }

    #[test]
    fn test_into_result_reports_every_source() {
        use crate::domain::{GatherResult, SourceErrorKind};

        let mut ctx = context_at("run-2", RunState::Gathering);
        ctx.merge_outcomes(vec![
            GatherOutcome {
                source: "jira".to_string(),
                required: true,
                attempts: 1,
                result: GatherResult::Records(vec![]),
            },
            GatherOutcome {
                source: "confluence".to_string(),
                required: false,
                attempts: 1,
                result: GatherResult::Failed {
                    kind: SourceErrorKind::Permanent,
                    last_error: "HTTP 403".to_string(),
                    cancelled: false,
                },
            },
        ])
        .unwrap();
        let result = ctx.into_result(RunStatus::PartialSuccess, None);
        assert_eq!(result.run_id, "run-2");
        assert_eq!(result.sources.len(), 2);
        assert_eq!(result.source_failures().count(), 1);
        assert!(matches!(result.publication, Publication::NotAttempted));
    }
}
