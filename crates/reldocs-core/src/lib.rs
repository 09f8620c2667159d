//! reldocs Core Library
//!
//! Gathers release evidence from issue trackers, code hosts and wikis,
//! classifies it, generates documentation and publishes it idempotently as a
//! branch plus change request in the docs repository.

pub mod categorize;
pub mod config;
pub mod context;
pub mod domain;
pub mod fakes;
pub mod gather;
pub mod generate;
pub mod obs;
pub mod orchestrator;
pub mod sources;
pub mod telemetry;
pub mod writer;

pub use domain::{
    Category, ChangeRequestRef, ChangeSet, ClassifiedEntry, ConfigError, DocumentKind,
    GatherOutcome, GeneratedDocument, GenerationError, HostError, Publication, ReleaseDescriptor,
    Result, RunError, RunFailure, RunResult, RunState, RunStatus, SourceError, SourceErrorKind,
    SourceRecord, SourceReport, ValidationError, WritePlan,
};

pub use categorize::{categorize, classify};
pub use config::{
    ChangeRequestTemplate, ClassificationRules, DocumentLayout, RetryPolicy, RunConfig,
};
pub use context::RunContext;
pub use gather::{evaluate, GatherVerdict, Gatherer};
pub use generate::{generate_documents, ContentGenerator, TemplateGenerator};
pub use orchestrator::{Orchestrator, RunRequest};
pub use sources::{
    BitbucketCommitSource, BitbucketConfig, BitbucketPullRequestSource, ConfluenceConfig,
    ConfluenceSource, JiraConfig, JiraSource, SourceAdapter,
};
pub use writer::{
    BitbucketRepositoryHost, BranchHead, ChangeRequestSpec, DocsRepoConfig, RepositoryHost,
    RepositoryWriter,
};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
