//! Concurrent fan-out / fan-in over the registered source adapters.
//!
//! [`Gatherer::gather`] spawns one task per adapter into a [`JoinSet`], bounds
//! each attempt by the adapter's timeout, retries transient failures with
//! exponential backoff and returns exactly one [`GatherOutcome`] per adapter,
//! in registration order. It returns only once every task has been joined.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

use crate::config::{RetryPolicy, RunConfig, SourcePolicy};
use crate::domain::{
    GatherOutcome, GatherResult, ReleaseDescriptor, RunError, SourceError, SourceErrorKind,
};
use crate::obs;
use crate::sources::SourceAdapter;

/// Whether the gathered evidence is good enough to continue the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherVerdict {
    /// Every adapter succeeded.
    Complete,
    /// Some adapters failed but the required-source policy is satisfied.
    Degraded,
}

/// Runs all registered adapters for one release.
pub struct Gatherer {
    sources: Vec<Arc<dyn SourceAdapter>>,
}

impl Gatherer {
    pub fn new(sources: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self { sources }
    }

    /// Adapter names in registration order.
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Fetch from every adapter concurrently.
    ///
    /// Never fails: adapter errors, timeouts, panics and cancellation are all
    /// recorded as failed outcomes. Whether the run may proceed is decided by
    /// [`evaluate`].
    pub async fn gather(
        &self,
        release: &ReleaseDescriptor,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> Vec<GatherOutcome> {
        let mut join_set = JoinSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            let release = release.clone();
            let retry = config.retry.clone();
            let policy = config.policy_for(source.name());
            let cancel = cancel.clone();
            let span = tracing::info_span!("source", source = %source.name());
            join_set.spawn(
                async move {
                    let outcome =
                        fetch_with_retry(source.as_ref(), &release, &retry, policy, &cancel).await;
                    (idx, outcome)
                }
                .instrument(span),
            );
        }

        let mut ordered: Vec<Option<GatherOutcome>> = vec![None; self.sources.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, outcome)) => ordered[idx] = Some(outcome),
                // The index is lost with a panicked task; the slot is filled below.
                Err(err) => debug!(error = %err, "source task did not complete"),
            }
        }

        self.sources
            .iter()
            .zip(ordered)
            .map(|(source, slot)| {
                slot.unwrap_or_else(|| GatherOutcome {
                    source: source.name().to_string(),
                    required: config.policy_for(source.name()).required,
                    attempts: 0,
                    result: GatherResult::Failed {
                        kind: SourceErrorKind::Permanent,
                        last_error: "source task panicked".to_string(),
                        cancelled: false,
                    },
                })
            })
            .collect()
    }
}

/// Apply the required-source policy to the gathered outcomes.
///
/// With no required sources configured, any single success is enough.
pub fn evaluate(outcomes: &[GatherOutcome]) -> Result<GatherVerdict, RunError> {
    let required: Vec<&GatherOutcome> = outcomes.iter().filter(|o| o.required).collect();
    let satisfied = if required.is_empty() {
        outcomes.iter().any(GatherOutcome::succeeded)
    } else {
        required.iter().any(|o| o.succeeded())
    };

    if !satisfied {
        let pool: Vec<&GatherOutcome> = if required.is_empty() {
            outcomes.iter().collect()
        } else {
            required
        };
        return Err(RunError::NoRequiredSource {
            failed: pool.iter().map(|o| o.source.clone()).collect(),
        });
    }

    if outcomes.iter().all(GatherOutcome::succeeded) {
        Ok(GatherVerdict::Complete)
    } else {
        Ok(GatherVerdict::Degraded)
    }
}

fn cancelled_error() -> SourceError {
    SourceError::transient("cancelled")
}

/// Run one adapter to a terminal state: success, permanent failure,
/// exhausted retries or cancellation.
async fn fetch_with_retry(
    source: &dyn SourceAdapter,
    release: &ReleaseDescriptor,
    retry: &RetryPolicy,
    policy: SourcePolicy,
    cancel: &CancellationToken,
) -> GatherOutcome {
    let name = source.name().to_string();
    let finish = |attempts: u32, result: GatherResult| {
        let records = match &result {
            GatherResult::Records(r) => Some(r.len()),
            GatherResult::Failed { .. } => None,
        };
        obs::emit_source_finished(&name, attempts, records, policy.required);
        GatherOutcome {
            source: name.clone(),
            required: policy.required,
            attempts,
            result,
        }
    };
    let failed = |err: SourceError, cancelled: bool| GatherResult::Failed {
        kind: err.kind,
        last_error: err.message,
        cancelled,
    };

    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return finish(attempt, failed(cancelled_error(), true));
        }
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled_error()),
            fetched = tokio::time::timeout(
                policy.timeout,
                source.fetch(release, policy.timeout, cancel),
            ) => {
                match fetched {
                    Ok(result) => result,
                    Err(_elapsed) => Err(SourceError::transient(format!(
                        "timed out after {}ms",
                        policy.timeout.as_millis()
                    ))),
                }
            }
        };

        let err = match result {
            Ok(records) => return finish(attempt, GatherResult::Records(records)),
            Err(err) => err,
        };

        let cancelled = cancel.is_cancelled();
        let will_retry = err.is_transient() && attempt < retry.max_attempts && !cancelled;
        obs::emit_source_attempt_failed(&name, attempt, err.kind, &err.message, will_retry);
        if !will_retry {
            return finish(attempt, failed(err, cancelled));
        }

        let delay = retry.delay_after(attempt);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return finish(attempt, failed(cancelled_error(), true)),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(source: &str, required: bool, ok: bool) -> GatherOutcome {
        GatherOutcome {
            source: source.to_string(),
            required,
            attempts: 1,
            result: if ok {
                GatherResult::Records(vec![])
            } else {
                GatherResult::Failed {
                    kind: SourceErrorKind::Permanent,
                    last_error: "HTTP 401".to_string(),
                    cancelled: false,
                }
            },
        }
    }

    #[test]
    fn test_evaluate_all_succeeded() {
        let outcomes = vec![outcome("jira", true, true), outcome("confluence", false, true)];
        assert_eq!(evaluate(&outcomes).unwrap(), GatherVerdict::Complete);
    }

    #[test]
    fn test_evaluate_optional_failure_degrades() {
        let outcomes = vec![outcome("jira", true, true), outcome("confluence", false, false)];
        assert_eq!(evaluate(&outcomes).unwrap(), GatherVerdict::Degraded);
    }

    #[test]
    fn test_evaluate_one_of_several_required_is_enough() {
        let outcomes = vec![
            outcome("jira", true, false),
            outcome("bitbucket-prs", true, true),
        ];
        assert_eq!(evaluate(&outcomes).unwrap(), GatherVerdict::Degraded);
    }

    #[test]
    fn test_evaluate_all_required_failed() {
        let outcomes = vec![
            outcome("jira", true, false),
            outcome("bitbucket-commits", false, true),
        ];
        match evaluate(&outcomes).unwrap_err() {
            RunError::NoRequiredSource { failed } => assert_eq!(failed, vec!["jira"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_evaluate_without_required_sources() {
        let outcomes = vec![outcome("a", false, false), outcome("b", false, true)];
        assert_eq!(evaluate(&outcomes).unwrap(), GatherVerdict::Degraded);

        let outcomes = vec![outcome("a", false, false), outcome("b", false, false)];
        assert!(matches!(
            evaluate(&outcomes),
            Err(RunError::NoRequiredSource { failed }) if failed.len() == 2
        ));
    }
}
