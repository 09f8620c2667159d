//! Content generation boundary.
//!
//! The core treats a [`ContentGenerator`] as an opaque, possibly slow and
//! possibly failing call. [`generate_documents`] wraps it with one retry on
//! transient failure, cancellation, and all-or-nothing validation of the
//! returned document set.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::{
    ChangeSet, DocumentKind, GeneratedDocument, GenerationError, ReleaseDescriptor, RunError,
    RunState,
};
use crate::writer::plan::heading_level;

pub mod template;

pub use template::TemplateGenerator;

/// Produces documents from a classified change set.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        change_set: &ChangeSet,
        release: &ReleaseDescriptor,
    ) -> Result<Vec<GeneratedDocument>, GenerationError>;
}

/// Invoke the generator, retrying once on a transient failure.
///
/// Either the full validated document set is returned or an error; a run
/// never proceeds with a partial set.
pub async fn generate_documents(
    generator: &dyn ContentGenerator,
    change_set: &ChangeSet,
    release: &ReleaseDescriptor,
    cancel: &CancellationToken,
) -> Result<Vec<GeneratedDocument>, RunError> {
    let mut attempt = 1;
    let documents = loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RunError::Cancelled { stage: RunState::Generating });
            }
            result = generator.generate(change_set, release) => result,
        };

        match result {
            Ok(documents) => break documents,
            Err(err) if err.is_transient() && attempt == 1 => {
                warn!(error = %err, "content generation failed, retrying once");
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    };

    validate_documents(&documents)?;
    Ok(documents)
}

/// Reject empty sets, duplicate or escaping paths, and section documents
/// that could not be spliced back in place on a later run.
pub fn validate_documents(documents: &[GeneratedDocument]) -> Result<(), GenerationError> {
    if documents.is_empty() {
        return Err(GenerationError::Incomplete(
            "generator returned no documents".to_string(),
        ));
    }

    let mut paths = BTreeSet::new();
    for doc in documents {
        let path = doc.path.trim();
        if path.is_empty() || path.starts_with('/') || path.split('/').any(|p| p == "..") {
            return Err(GenerationError::Incomplete(format!(
                "invalid document path: {:?}",
                doc.path
            )));
        }
        if !paths.insert(path) {
            return Err(GenerationError::Incomplete(format!(
                "duplicate document path: {path}"
            )));
        }
        if let DocumentKind::Section { anchor } = &doc.kind {
            validate_section(path, anchor, &doc.content)?;
        }
    }
    Ok(())
}

/// A section must open with its heading anchor and contain no later heading
/// at or above the anchor's level; such a heading would end the section on
/// the next splice and leave the rest of the body behind.
fn validate_section(path: &str, anchor: &str, content: &str) -> Result<(), GenerationError> {
    let Some(level) = heading_level(anchor.trim_end()) else {
        return Err(GenerationError::Incomplete(format!(
            "section anchor for {path} is not a markdown heading: {anchor:?}"
        )));
    };

    let mut lines = content.lines();
    if lines.next().map(str::trim_end) != Some(anchor.trim_end()) {
        return Err(GenerationError::Incomplete(format!(
            "section for {path} does not start with its anchor {anchor:?}"
        )));
    }
    if let Some(heading) = lines.find(|l| heading_level(l).is_some_and(|found| found <= level)) {
        return Err(GenerationError::Incomplete(format!(
            "section {anchor:?} for {path} contains {heading:?} at or above its level"
        )));
    }
    Ok(())
}
