//! In-memory fakes for the adapter, generator and host traits (testing only).
//!
//! Provides `ScriptedSource`, `ScriptedGenerator` and `MemoryRepositoryHost`,
//! which satisfy the trait contracts without any network access.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    ChangeRequestRef, ChangeSet, GeneratedDocument, GenerationError, HostError,
    ReleaseDescriptor, SourceError, SourceRecord,
};
use crate::generate::{ContentGenerator, TemplateGenerator};
use crate::sources::SourceAdapter;
use crate::writer::{BranchHead, ChangeRequestSpec, RepositoryHost};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

/// One scripted answer of a [`ScriptedSource`].
#[derive(Debug, Clone)]
pub enum FakeResponse {
    Records(Vec<SourceRecord>),
    Fail(SourceError),
    /// Answer after a delay (tokio time, so paused clocks apply).
    Delayed(Duration, Box<FakeResponse>),
    /// Never answer; only cancellation or the gatherer's timeout ends the call.
    Hang,
}

/// Source adapter that replays a script of responses. The last response
/// repeats once the script is exhausted.
#[derive(Debug)]
pub struct ScriptedSource {
    name: String,
    script: Mutex<VecDeque<FakeResponse>>,
    last: FakeResponse,
    calls: AtomicU32,
}

impl ScriptedSource {
    pub fn sequence(name: impl Into<String>, responses: Vec<FakeResponse>) -> Self {
        let mut script: VecDeque<FakeResponse> = responses.into();
        let last = script.pop_back().unwrap_or(FakeResponse::Records(Vec::new()));
        script.push_back(last.clone());
        Self {
            name: name.into(),
            script: Mutex::new(script),
            last,
            calls: AtomicU32::new(0),
        }
    }

    pub fn records(name: impl Into<String>, records: Vec<SourceRecord>) -> Self {
        Self::sequence(name, vec![FakeResponse::Records(records)])
    }

    pub fn failing(name: impl Into<String>, error: SourceError) -> Self {
        Self::sequence(name, vec![FakeResponse::Fail(error)])
    }

    pub fn hanging(name: impl Into<String>) -> Self {
        Self::sequence(name, vec![FakeResponse::Hang])
    }

    /// Number of `fetch` calls so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> FakeResponse {
        let mut script = lock(&self.script);
        if script.len() > 1 {
            script.pop_front().unwrap_or_else(|| self.last.clone())
        } else {
            self.last.clone()
        }
    }
}

async fn play(
    mut response: FakeResponse,
    cancel: &CancellationToken,
) -> Result<Vec<SourceRecord>, SourceError> {
    loop {
        match response {
            FakeResponse::Records(records) => return Ok(records),
            FakeResponse::Fail(err) => return Err(err),
            FakeResponse::Delayed(delay, inner) => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SourceError::transient("cancelled")),
                    _ = tokio::time::sleep(delay) => response = *inner,
                }
            }
            FakeResponse::Hang => {
                cancel.cancelled().await;
                return Err(SourceError::transient("cancelled"));
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        _release: &ReleaseDescriptor,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self.next_response();
        play(response, cancel).await
    }
}

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

/// Generator that fails with the scripted errors first, then delegates to a
/// [`TemplateGenerator`].
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    failures: Mutex<VecDeque<GenerationError>>,
    inner: TemplateGenerator,
    calls: AtomicU32,
}

impl ScriptedGenerator {
    pub fn failing_with(failures: Vec<GenerationError>) -> Self {
        Self {
            failures: Mutex::new(failures.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        change_set: &ChangeSet,
        release: &ReleaseDescriptor,
    ) -> Result<Vec<GeneratedDocument>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.failures).pop_front() {
            return Err(err);
        }
        self.inner.generate(change_set, release).await
    }
}

// ---------------------------------------------------------------------------
// MemoryRepositoryHost
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemoryCommit {
    message: String,
    files: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct MemoryRequest {
    request: ChangeRequestRef,
    labels: Vec<String>,
    assignees: Vec<String>,
    open: bool,
}

#[derive(Debug)]
struct HostState {
    default_branch: String,
    branches: HashMap<String, String>,
    commits: HashMap<String, MemoryCommit>,
    requests: Vec<MemoryRequest>,
    next_commit: u32,
    race_on_create: bool,
}

impl HostState {
    fn new_commit_id(&mut self) -> String {
        self.next_commit += 1;
        format!("c{:04}", self.next_commit)
    }

    fn head_files(&self, branch: &str) -> Option<BTreeMap<String, String>> {
        let commit = self.branches.get(branch)?;
        self.commits.get(commit).map(|c| c.files.clone())
    }

    fn insert_request(&mut self, spec: &ChangeRequestSpec) -> ChangeRequestRef {
        let id = self.requests.len() as u64 + 1;
        let request = ChangeRequestRef {
            id,
            url: Some(format!("memory://pull-requests/{id}")),
            title: spec.title.clone(),
            source_branch: spec.source_branch.clone(),
            destination_branch: spec.destination_branch.clone(),
        };
        self.requests.push(MemoryRequest {
            request: request.clone(),
            labels: spec.labels.clone(),
            assignees: spec.assignees.clone(),
            open: true,
        });
        request
    }
}

/// In-memory repository host with a single default branch seeded by
/// [`MemoryRepositoryHost::new`]. Counts every mutating call.
#[derive(Debug)]
pub struct MemoryRepositoryHost {
    state: Mutex<HostState>,
    mutations: AtomicU32,
    commits_made: AtomicU32,
    requests_opened: AtomicU32,
}

impl Default for MemoryRepositoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepositoryHost {
    /// Host whose `main` branch holds one initial commit with no files.
    pub fn new() -> Self {
        let mut commits = HashMap::new();
        commits.insert(
            "c0000".to_string(),
            MemoryCommit {
                message: "Initial commit".to_string(),
                files: BTreeMap::new(),
            },
        );
        let mut branches = HashMap::new();
        branches.insert("main".to_string(), "c0000".to_string());
        Self {
            state: Mutex::new(HostState {
                default_branch: "main".to_string(),
                branches,
                commits,
                requests: Vec::new(),
                next_commit: 0,
                race_on_create: false,
            }),
            mutations: AtomicU32::new(0),
            commits_made: AtomicU32::new(0),
            requests_opened: AtomicU32::new(0),
        }
    }

    /// Seed a file on the default branch (not counted as a mutation).
    pub fn with_file(self, path: &str, content: &str) -> Self {
        {
            let mut state = lock(&self.state);
            let branch = state.default_branch.clone();
            let mut files = state.head_files(&branch).unwrap_or_default();
            files.insert(path.to_string(), content.to_string());
            let id = state.new_commit_id();
            state.commits.insert(
                id.clone(),
                MemoryCommit {
                    message: format!("Add {path}"),
                    files,
                },
            );
            state.branches.insert(branch, id);
        }
        self
    }

    /// Make the next `create_request` lose a race against a concurrent creator.
    pub fn simulate_request_race(&self) {
        lock(&self.state).race_on_create = true;
    }

    /// Simulate a human pushing to `branch` (not counted as a mutation).
    pub fn push_external_commit(&self, branch: &str, path: &str, content: &str) -> Option<String> {
        let mut state = lock(&self.state);
        let mut files = state.head_files(branch)?;
        files.insert(path.to_string(), content.to_string());
        let id = state.new_commit_id();
        state.commits.insert(
            id.clone(),
            MemoryCommit {
                message: "Manual edit".to_string(),
                files,
            },
        );
        state.branches.insert(branch.to_string(), id.clone());
        Some(id)
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        lock(&self.state).head_files(branch)?.get(path).cloned()
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        lock(&self.state).branches.contains_key(branch)
    }

    pub fn open_requests(&self) -> Vec<ChangeRequestRef> {
        lock(&self.state)
            .requests
            .iter()
            .filter(|r| r.open)
            .map(|r| r.request.clone())
            .collect()
    }

    /// Labels and assignees a request was opened with.
    pub fn request_metadata(&self, id: u64) -> Option<(Vec<String>, Vec<String>)> {
        lock(&self.state)
            .requests
            .iter()
            .find(|r| r.request.id == id)
            .map(|r| (r.labels.clone(), r.assignees.clone()))
    }

    /// Total mutating calls (branch creation, commits, request creation).
    pub fn mutations(&self) -> u32 {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn commits_made(&self) -> u32 {
        self.commits_made.load(Ordering::SeqCst)
    }

    pub fn requests_opened(&self) -> u32 {
        self.requests_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepositoryHost for MemoryRepositoryHost {
    async fn default_branch(&self) -> Result<String, HostError> {
        Ok(lock(&self.state).default_branch.clone())
    }

    async fn branch_head(&self, branch: &str) -> Result<Option<BranchHead>, HostError> {
        let state = lock(&self.state);
        Ok(state.branches.get(branch).and_then(|commit| {
            state.commits.get(commit).map(|c| BranchHead {
                commit: commit.clone(),
                message: c.message.clone(),
            })
        }))
    }

    async fn read_file(&self, revision: &str, path: &str) -> Result<Option<String>, HostError> {
        let state = lock(&self.state);
        let commit = state
            .commits
            .get(revision)
            .ok_or_else(|| HostError::NotFound(format!("revision {revision}")))?;
        Ok(commit.files.get(path).cloned())
    }

    async fn create_branch(&self, branch: &str, from_commit: &str) -> Result<(), HostError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        if state.branches.contains_key(branch) {
            return Err(HostError::AlreadyExists(format!("branch {branch}")));
        }
        if !state.commits.contains_key(from_commit) {
            return Err(HostError::NotFound(format!("revision {from_commit}")));
        }
        state
            .branches
            .insert(branch.to_string(), from_commit.to_string());
        Ok(())
    }

    async fn commit_files(
        &self,
        branch: &str,
        expected_parent: &str,
        message: &str,
        files: &[(String, String)],
    ) -> Result<String, HostError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        let head = state
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("branch {branch}")))?;
        if head != expected_parent {
            return Err(HostError::Conflict(format!(
                "branch {branch} is at {head}, expected {expected_parent}"
            )));
        }
        let mut tree = state.head_files(branch).unwrap_or_default();
        for (path, content) in files {
            tree.insert(path.clone(), content.clone());
        }
        let id = state.new_commit_id();
        state.commits.insert(
            id.clone(),
            MemoryCommit {
                message: message.to_string(),
                files: tree,
            },
        );
        state.branches.insert(branch.to_string(), id.clone());
        self.commits_made.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn find_open_request(
        &self,
        source_branch: &str,
    ) -> Result<Option<ChangeRequestRef>, HostError> {
        Ok(lock(&self.state)
            .requests
            .iter()
            .find(|r| r.open && r.request.source_branch == source_branch)
            .map(|r| r.request.clone()))
    }

    async fn create_request(
        &self,
        spec: &ChangeRequestSpec,
    ) -> Result<ChangeRequestRef, HostError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        if state.race_on_create {
            state.race_on_create = false;
            state.insert_request(spec);
            return Err(HostError::AlreadyExists(format!(
                "open request for {}",
                spec.source_branch
            )));
        }
        if state
            .requests
            .iter()
            .any(|r| r.open && r.request.source_branch == spec.source_branch)
        {
            return Err(HostError::AlreadyExists(format!(
                "open request for {}",
                spec.source_branch
            )));
        }
        let request = state.insert_request(spec);
        self.requests_opened.fetch_add(1, Ordering::SeqCst);
        Ok(request)
    }
}
