//! Domain models for reldocs.
//!
//! Canonical definitions for the core entities:
//! - `ReleaseDescriptor`: validated release identity
//! - `SourceRecord`: raw evidence from an external system
//! - `ChangeSet`: classified, deduplicated evidence
//! - `GeneratedDocument`: content to publish
//! - `RunResult`: terminal artifact of a run

pub mod change_set;
pub mod descriptor;
pub mod document;
pub mod error;
pub mod record;
pub mod run;

pub use change_set::{Category, ChangeSet, ClassifiedEntry};
pub use descriptor::{ReleaseDescriptor, ReleaseVersion, RELEASE_BRANCH_PREFIX};
pub use document::{DocumentKind, GeneratedDocument};
pub use error::{
    ConfigError, GenerationError, HostError, Result, RunError, SourceError, SourceErrorKind,
    ValidationError,
};
pub use record::{Commit, Issue, Page, PullRequest, RecordKind, SourceRecord};
pub use run::{
    ChangeRequestRef, FileChange, FileChangeKind, GatherOutcome, GatherResult, Publication,
    RunFailure, RunResult, RunState, RunStatus, SourceReport, SourceStatus, WritePlan,
};
