//! The code-host collaborator and an in-memory implementation.
//!
//! [`CodeHost`] is the only path by which the reconciler touches remote
//! state. Calls must be idempotent where noted: a retried attempt re-issues
//! every call of its plan.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use armada_core::{
    types::RemoteChangeset, ChangesetEvent, ChangesetId, EventPayload, ExternalState, Repo, RepoId,
};

use crate::error::HostError;

/// Commit to push as the sole commit on `head_ref`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushRequest {
    pub base_ref: String,
    pub base_rev: String,
    pub head_ref: String,
    pub message: String,
    pub diff: String,
    pub author_name: String,
    pub author_email: String,
}

/// Title, body and refs of a changeset to create or edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangesetRequest {
    pub title: String,
    pub body: String,
    pub base_ref: String,
    pub head_ref: String,
    pub draft: bool,
}

/// One event as reported by the host, not yet tied to a stored changeset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEvent {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl HostEvent {
    pub fn into_changeset_event(self, changeset_id: ChangesetId) -> ChangesetEvent {
        ChangesetEvent {
            changeset_id,
            key: self.key,
            created_at: self.created_at,
            payload: self.payload,
        }
    }
}

#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Force-push a single commit; returns the new head revision.
    async fn push_branch(&self, repo: &Repo, push: &PushRequest) -> Result<String, HostError>;

    /// Open a changeset. Returns the existing one if `head_ref` already has one.
    async fn create_changeset(
        &self,
        repo: &Repo,
        request: &ChangesetRequest,
    ) -> Result<RemoteChangeset, HostError>;

    async fn update_changeset(
        &self,
        repo: &Repo,
        external_id: &str,
        request: &ChangesetRequest,
    ) -> Result<RemoteChangeset, HostError>;

    async fn undraft_changeset(
        &self,
        repo: &Repo,
        external_id: &str,
    ) -> Result<RemoteChangeset, HostError>;

    /// Closing a closed or merged changeset is a no-op.
    async fn close_changeset(
        &self,
        repo: &Repo,
        external_id: &str,
    ) -> Result<RemoteChangeset, HostError>;

    async fn load_changeset(
        &self,
        repo: &Repo,
        external_id: &str,
    ) -> Result<RemoteChangeset, HostError>;

    /// Events newer than `since`, or all of them.
    async fn list_events_since(
        &self,
        repo: &Repo,
        external_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<HostEvent>, HostError>;
}

// ---------------------------------------------------------------------------
// MemoryHost
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct HostState {
    next_number: u64,
    changesets: BTreeMap<(RepoId, String), RemoteChangeset>,
    branches: BTreeMap<(RepoId, String), String>,
    events: BTreeMap<(RepoId, String), Vec<HostEvent>>,
    calls: Vec<String>,
    failures: VecDeque<HostError>,
    fail_always: Option<HostError>,
    latency: Option<Duration>,
}

/// Code host kept in process, with failure injection for tests and
/// `--simulate` runs.
#[derive(Debug, Default)]
pub struct MemoryHost {
    state: Mutex<HostState>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a changeset that already exists on the host.
    pub fn seed(&self, repo_id: RepoId, changeset: RemoteChangeset) {
        let mut state = self.lock();
        if let Ok(n) = changeset.external_id.parse::<u64>() {
            state.next_number = state.next_number.max(n);
        }
        state
            .changesets
            .insert((repo_id, changeset.external_id.clone()), changeset);
    }

    pub fn push_event(&self, repo_id: RepoId, external_id: &str, event: HostEvent) {
        self.lock()
            .events
            .entry((repo_id, external_id.to_string()))
            .or_default()
            .push(event);
    }

    /// Fail the next call with `err`; queued failures are consumed in order.
    pub fn fail_next(&self, err: HostError) {
        self.lock().failures.push_back(err);
    }

    /// Fail every call with `err` until [`MemoryHost::recover`].
    pub fn fail_always(&self, err: HostError) {
        self.lock().fail_always = Some(err);
    }

    pub fn recover(&self) {
        let mut state = self.lock();
        state.fail_always = None;
        state.failures.clear();
    }

    /// Delay every call, to exercise request timeouts.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Names of the calls made so far, e.g. `push_branch`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn get(&self, repo_id: RepoId, external_id: &str) -> Option<RemoteChangeset> {
        self.lock()
            .changesets
            .get(&(repo_id, external_id.to_string()))
            .cloned()
    }

    /// Revision last pushed to `head_ref`.
    pub fn branch_head(&self, repo_id: RepoId, head_ref: &str) -> Option<String> {
        self.lock()
            .branches
            .get(&(repo_id, head_ref.to_string()))
            .cloned()
    }

    /// Change a changeset's state as if someone acted on it outside armada.
    pub fn set_state(&self, repo_id: RepoId, external_id: &str, new_state: ExternalState) {
        let mut state = self.lock();
        if let Some(cs) = state
            .changesets
            .get_mut(&(repo_id, external_id.to_string()))
        {
            cs.state = new_state;
            cs.updated_at = Utc::now();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call, then apply latency and any injected failure.
    async fn enter(&self, call: &str) -> Result<(), HostError> {
        let (latency, failure) = {
            let mut state = self.lock();
            state.calls.push(call.to_string());
            let failure = match state.failures.pop_front() {
                Some(err) => Some(err),
                None => state.fail_always.clone(),
            };
            (state.latency, failure)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn with_changeset<T>(
        &self,
        repo: &Repo,
        external_id: &str,
        f: impl FnOnce(&mut RemoteChangeset) -> T,
    ) -> Result<T, HostError> {
        let mut state = self.lock();
        let cs = state
            .changesets
            .get_mut(&(repo.id, external_id.to_string()))
            .ok_or_else(|| {
                HostError::Permanent(format!("{} has no changeset #{external_id}", repo.name))
            })?;
        Ok(f(cs))
    }
}

#[async_trait]
impl CodeHost for MemoryHost {
    async fn push_branch(&self, repo: &Repo, push: &PushRequest) -> Result<String, HostError> {
        self.enter("push_branch").await?;
        let rev = armada_diff::diff_hash(&format!(
            "{}\n{}\n{}",
            push.base_rev, push.message, push.diff
        ));
        self.lock()
            .branches
            .insert((repo.id, push.head_ref.clone()), rev.clone());
        Ok(rev)
    }

    async fn create_changeset(
        &self,
        repo: &Repo,
        request: &ChangesetRequest,
    ) -> Result<RemoteChangeset, HostError> {
        self.enter("create_changeset").await?;
        let mut state = self.lock();
        if !state
            .branches
            .contains_key(&(repo.id, request.head_ref.clone()))
        {
            return Err(HostError::Permanent(format!(
                "branch {} does not exist in {}",
                request.head_ref, repo.name
            )));
        }
        let existing = state
            .changesets
            .iter()
            .find(|((repo_id, _), cs)| *repo_id == repo.id && cs.head_ref == request.head_ref)
            .map(|(_, cs)| cs.clone());
        if let Some(existing) = existing {
            return Ok(existing);
        }

        state.next_number += 1;
        let changeset = RemoteChangeset {
            external_id: state.next_number.to_string(),
            title: request.title.clone(),
            body: request.body.clone(),
            base_ref: request.base_ref.clone(),
            head_ref: request.head_ref.clone(),
            state: if request.draft {
                ExternalState::Draft
            } else {
                ExternalState::Open
            },
            labels: Vec::new(),
            checks: BTreeMap::new(),
            updated_at: Utc::now(),
        };
        state.changesets.insert(
            (repo.id, changeset.external_id.clone()),
            changeset.clone(),
        );
        Ok(changeset)
    }

    async fn update_changeset(
        &self,
        repo: &Repo,
        external_id: &str,
        request: &ChangesetRequest,
    ) -> Result<RemoteChangeset, HostError> {
        self.enter("update_changeset").await?;
        self.with_changeset(repo, external_id, |cs| {
            cs.title = request.title.clone();
            cs.body = request.body.clone();
            cs.base_ref = request.base_ref.clone();
            cs.updated_at = Utc::now();
            cs.clone()
        })
    }

    async fn undraft_changeset(
        &self,
        repo: &Repo,
        external_id: &str,
    ) -> Result<RemoteChangeset, HostError> {
        self.enter("undraft_changeset").await?;
        self.with_changeset(repo, external_id, |cs| {
            if cs.state == ExternalState::Draft {
                cs.state = ExternalState::Open;
                cs.updated_at = Utc::now();
            }
            cs.clone()
        })
    }

    async fn close_changeset(
        &self,
        repo: &Repo,
        external_id: &str,
    ) -> Result<RemoteChangeset, HostError> {
        self.enter("close_changeset").await?;
        self.with_changeset(repo, external_id, |cs| {
            if matches!(cs.state, ExternalState::Open | ExternalState::Draft) {
                cs.state = ExternalState::Closed;
                cs.updated_at = Utc::now();
            }
            cs.clone()
        })
    }

    async fn load_changeset(
        &self,
        repo: &Repo,
        external_id: &str,
    ) -> Result<RemoteChangeset, HostError> {
        self.enter("load_changeset").await?;
        self.with_changeset(repo, external_id, |cs| cs.clone())
    }

    async fn list_events_since(
        &self,
        repo: &Repo,
        external_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<HostEvent>, HostError> {
        self.enter("list_events_since").await?;
        let state = self.lock();
        let mut events: Vec<HostEvent> = state
            .events
            .get(&(repo.id, external_id.to_string()))
            .map(|events| {
                events
                    .iter()
                    .filter(|e| since.map(|t| e.created_at > t).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }
}
