//! Persistence and repository-permission collaborators.
//!
//! [`Store`] is the CRUD + list/count surface the engine needs over campaigns,
//! specs, changesets and events. [`MemoryStore`] implements it over a
//! serializable [`Snapshot`] that [`crate::registry`] persists as YAML.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{
    Campaign, CampaignId, CampaignSpec, CampaignSpecId, Changeset, ChangesetEvent, ChangesetId,
    ChangesetSpec, ChangesetSpecId, Namespace, PublicationState, ReconcilerState, Repo, RepoId,
    SyncData,
};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Which changesets a list or count should return. Unset fields match all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangesetFilter {
    pub campaign_id: Option<CampaignId>,
    pub owned_by_campaign_id: Option<CampaignId>,
    pub reconciler_state: Option<ReconcilerState>,
    pub publication_state: Option<PublicationState>,
    /// Restrict to these repositories; empty means any.
    pub repo_ids: Vec<RepoId>,
}

impl ChangesetFilter {
    pub fn in_campaign(id: CampaignId) -> Self {
        Self {
            campaign_id: Some(id),
            ..Self::default()
        }
    }

    pub fn matches(&self, cs: &Changeset) -> bool {
        if let Some(id) = self.campaign_id {
            if !cs.campaign_ids.contains(&id) {
                return false;
            }
        }
        if let Some(owner) = self.owned_by_campaign_id {
            if cs.owned_by_campaign_id != Some(owner) {
                return false;
            }
        }
        if let Some(state) = self.reconciler_state {
            if cs.reconciler_state != state {
                return false;
            }
        }
        if let Some(state) = self.publication_state {
            if cs.publication_state != state {
                return false;
            }
        }
        self.repo_ids.is_empty() || self.repo_ids.contains(&cs.repo_id)
    }
}

/// Persistence operations. Implementations must make
/// [`Store::claim_next_queued`] atomic: a changeset is handed to at most one
/// caller until it leaves `Processing`.
pub trait Store: Send + Sync {
    fn create_campaign_spec(&self, spec: &CampaignSpec) -> Result<(), StoreError>;
    fn get_campaign_spec(&self, id: &CampaignSpecId) -> Result<CampaignSpec, StoreError>;

    fn create_changeset_spec(&self, spec: &ChangesetSpec) -> Result<(), StoreError>;
    fn get_changeset_spec(&self, id: &ChangesetSpecId) -> Result<ChangesetSpec, StoreError>;
    fn list_changeset_specs(
        &self,
        campaign_spec_id: &CampaignSpecId,
    ) -> Result<Vec<ChangesetSpec>, StoreError>;
    /// Drop expired specs that no campaign or changeset references.
    fn delete_expired_specs(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Insert and assign an ID.
    fn create_campaign(&self, campaign: Campaign) -> Result<Campaign, StoreError>;
    fn update_campaign(&self, campaign: &Campaign) -> Result<(), StoreError>;
    fn get_campaign(&self, id: CampaignId) -> Result<Campaign, StoreError>;
    fn find_campaign(
        &self,
        namespace: Namespace,
        name: &str,
    ) -> Result<Option<Campaign>, StoreError>;
    fn list_campaigns(&self) -> Result<Vec<Campaign>, StoreError>;
    fn delete_campaign(&self, id: CampaignId) -> Result<(), StoreError>;

    /// Insert and assign an ID.
    fn create_changeset(&self, changeset: Changeset) -> Result<Changeset, StoreError>;
    /// Campaign-side write. Never moves a changeset into or out of
    /// `Processing`: while a worker holds it, a requested requeue is only
    /// flagged, and a stale copy cannot clobber the worker's result.
    fn update_changeset(&self, changeset: &Changeset) -> Result<(), StoreError>;
    fn get_changeset(&self, id: ChangesetId) -> Result<Changeset, StoreError>;
    /// Sorted by ID.
    fn list_changesets(&self, filter: &ChangesetFilter) -> Result<Vec<Changeset>, StoreError>;
    fn delete_changeset(&self, id: ChangesetId) -> Result<(), StoreError>;

    fn count_changesets(&self, filter: &ChangesetFilter) -> Result<usize, StoreError> {
        Ok(self.list_changesets(filter)?.len())
    }

    /// Move the oldest eligible `Queued` changeset to `Processing` and return it.
    fn claim_next_queued(&self, now: DateTime<Utc>) -> Result<Option<Changeset>, StoreError>;

    /// Write back the result of an attempt on a changeset claimed as
    /// `claimed`. Campaign-owned fields changed since the claim are kept, and
    /// a requeue requested meanwhile puts the changeset back on the queue.
    /// Fails unless the changeset is still `Processing`.
    fn record_attempt(
        &self,
        claimed: &Changeset,
        attempt: &Changeset,
    ) -> Result<Changeset, StoreError>;

    /// Move `Errored` changesets whose backoff has elapsed back to `Queued`.
    fn requeue_errored(&self, now: DateTime<Utc>) -> Result<Vec<ChangesetId>, StoreError>;

    /// Insert or replace events by natural key; returns how many were new.
    fn upsert_changeset_events(&self, events: &[ChangesetEvent]) -> Result<usize, StoreError>;

    /// Events of the given changesets, ascending by `created_at`.
    fn list_changeset_events(
        &self,
        changeset_ids: &[ChangesetId],
    ) -> Result<Vec<ChangesetEvent>, StoreError>;

    fn list_sync_data(&self, filter: &ChangesetFilter) -> Result<Vec<SyncData>, StoreError> {
        let changesets = self.list_changesets(filter)?;
        let ids: Vec<ChangesetId> = changesets.iter().map(|c| c.id).collect();
        let mut latest: BTreeMap<ChangesetId, DateTime<Utc>> = BTreeMap::new();
        for ev in self.list_changeset_events(&ids)? {
            let entry = latest.entry(ev.changeset_id).or_insert(ev.created_at);
            if ev.created_at > *entry {
                *entry = ev.created_at;
            }
        }
        Ok(changesets
            .into_iter()
            .filter(|c| c.is_published())
            .map(|c| SyncData {
                changeset_id: c.id,
                synced_at: c.synced_at,
                external_updated_at: c.metadata.as_ref().map(|m| m.updated_at),
                latest_event_at: latest.get(&c.id).copied(),
                priority: c.sync_requested,
            })
            .collect())
    }
}

/// Which repositories the current actor may see.
pub trait RepoOracle: Send + Sync {
    /// Accessible subset of `ids`; inaccessible or unknown IDs are absent.
    fn get_accessible_repos(&self, ids: &[RepoId]) -> Result<BTreeMap<RepoId, Repo>, StoreError>;
}

/// Wraps another oracle and hides a fixed set of repositories.
pub struct RestrictedRepos<'a> {
    inner: &'a dyn RepoOracle,
    hidden: BTreeSet<RepoId>,
}

impl<'a> RestrictedRepos<'a> {
    pub fn new(inner: &'a dyn RepoOracle, hidden: impl IntoIterator<Item = RepoId>) -> Self {
        Self {
            inner,
            hidden: hidden.into_iter().collect(),
        }
    }
}

impl RepoOracle for RestrictedRepos<'_> {
    fn get_accessible_repos(&self, ids: &[RepoId]) -> Result<BTreeMap<RepoId, Repo>, StoreError> {
        let mut repos = self.inner.get_accessible_repos(ids)?;
        repos.retain(|id, _| !self.hidden.contains(id));
        Ok(repos)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything a [`MemoryStore`] holds, in a form that round-trips through YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    #[serde(default)]
    pub next_campaign_id: i64,
    #[serde(default)]
    pub next_changeset_id: i64,
    #[serde(default)]
    pub repos: BTreeMap<RepoId, Repo>,
    #[serde(default)]
    pub campaigns: BTreeMap<CampaignId, Campaign>,
    #[serde(default)]
    pub campaign_specs: BTreeMap<CampaignSpecId, CampaignSpec>,
    #[serde(default)]
    pub changeset_specs: BTreeMap<ChangesetSpecId, ChangesetSpec>,
    #[serde(default)]
    pub changesets: BTreeMap<ChangesetId, Changeset>,
    #[serde(default)]
    pub events: Vec<ChangesetEvent>,
}

pub const SNAPSHOT_VERSION: u32 = 1;

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            next_campaign_id: 0,
            next_changeset_id: 0,
            repos: BTreeMap::new(),
            campaigns: BTreeMap::new(),
            campaign_specs: BTreeMap::new(),
            changeset_specs: BTreeMap::new(),
            changesets: BTreeMap::new(),
            events: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process [`Store`] and [`RepoOracle`] guarded by a single mutex.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        Ok(self.lock()?.clone())
    }

    pub fn add_repo(&self, repo: Repo) -> Result<(), StoreError> {
        self.lock()?.repos.insert(repo.id, repo);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Snapshot>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl RepoOracle for MemoryStore {
    fn get_accessible_repos(&self, ids: &[RepoId]) -> Result<BTreeMap<RepoId, Repo>, StoreError> {
        let state = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.repos.get(id).map(|r| (*id, r.clone())))
            .collect())
    }
}

impl Store for MemoryStore {
    fn create_campaign_spec(&self, spec: &CampaignSpec) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.campaign_specs.contains_key(&spec.id) {
            return Err(StoreError::AlreadyExists {
                kind: "campaign spec",
                id: spec.id.to_string(),
            });
        }
        state.campaign_specs.insert(spec.id.clone(), spec.clone());
        Ok(())
    }

    fn get_campaign_spec(&self, id: &CampaignSpecId) -> Result<CampaignSpec, StoreError> {
        self.lock()?
            .campaign_specs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("campaign spec", id))
    }

    fn create_changeset_spec(&self, spec: &ChangesetSpec) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.changeset_specs.contains_key(&spec.id) {
            return Err(StoreError::AlreadyExists {
                kind: "changeset spec",
                id: spec.id.to_string(),
            });
        }
        state.changeset_specs.insert(spec.id.clone(), spec.clone());
        Ok(())
    }

    fn get_changeset_spec(&self, id: &ChangesetSpecId) -> Result<ChangesetSpec, StoreError> {
        self.lock()?
            .changeset_specs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("changeset spec", id))
    }

    fn list_changeset_specs(
        &self,
        campaign_spec_id: &CampaignSpecId,
    ) -> Result<Vec<ChangesetSpec>, StoreError> {
        let state = self.lock()?;
        let mut specs: Vec<ChangesetSpec> = state
            .changeset_specs
            .values()
            .filter(|s| &s.campaign_spec_id == campaign_spec_id)
            .cloned()
            .collect();
        specs.sort_by(|a, b| (a.repo_id, &a.id).cmp(&(b.repo_id, &b.id)));
        Ok(specs)
    }

    fn delete_expired_specs(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let applied: BTreeSet<CampaignSpecId> = state
            .campaigns
            .values()
            .map(|c| c.campaign_spec_id.clone())
            .collect();
        let referenced: BTreeSet<ChangesetSpecId> = state
            .changesets
            .values()
            .flat_map(|c| c.current_spec_id.iter().chain(c.previous_spec_id.iter()))
            .cloned()
            .collect();

        let before = state.campaign_specs.len() + state.changeset_specs.len();
        state
            .campaign_specs
            .retain(|id, spec| applied.contains(id) || spec.expires_at() > now);
        let live_specs: BTreeSet<CampaignSpecId> = state.campaign_specs.keys().cloned().collect();
        state.changeset_specs.retain(|id, spec| {
            referenced.contains(id)
                || applied.contains(&spec.campaign_spec_id)
                || (live_specs.contains(&spec.campaign_spec_id) && spec.expires_at() > now)
        });
        Ok(before - state.campaign_specs.len() - state.changeset_specs.len())
    }

    fn create_campaign(&self, mut campaign: Campaign) -> Result<Campaign, StoreError> {
        let mut state = self.lock()?;
        state.next_campaign_id += 1;
        campaign.id = CampaignId(state.next_campaign_id);
        state.campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    fn update_campaign(&self, campaign: &Campaign) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let slot = state
            .campaigns
            .get_mut(&campaign.id)
            .ok_or_else(|| StoreError::not_found("campaign", campaign.id))?;
        *slot = campaign.clone();
        Ok(())
    }

    fn get_campaign(&self, id: CampaignId) -> Result<Campaign, StoreError> {
        self.lock()?
            .campaigns
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("campaign", id))
    }

    fn find_campaign(
        &self,
        namespace: Namespace,
        name: &str,
    ) -> Result<Option<Campaign>, StoreError> {
        Ok(self
            .lock()?
            .campaigns
            .values()
            .find(|c| c.namespace == namespace && c.name == name)
            .cloned())
    }

    fn list_campaigns(&self) -> Result<Vec<Campaign>, StoreError> {
        Ok(self.lock()?.campaigns.values().cloned().collect())
    }

    fn delete_campaign(&self, id: CampaignId) -> Result<(), StoreError> {
        self.lock()?
            .campaigns
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("campaign", id))
    }

    fn create_changeset(&self, mut changeset: Changeset) -> Result<Changeset, StoreError> {
        let mut state = self.lock()?;
        state.next_changeset_id += 1;
        changeset.id = ChangesetId(state.next_changeset_id);
        state.changesets.insert(changeset.id, changeset.clone());
        Ok(changeset)
    }

    fn update_changeset(&self, changeset: &Changeset) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let slot = state
            .changesets
            .get_mut(&changeset.id)
            .ok_or_else(|| StoreError::not_found("changeset", changeset.id))?;
        *slot = guard_claim(slot, changeset);
        Ok(())
    }

    fn get_changeset(&self, id: ChangesetId) -> Result<Changeset, StoreError> {
        self.lock()?
            .changesets
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("changeset", id))
    }

    fn list_changesets(&self, filter: &ChangesetFilter) -> Result<Vec<Changeset>, StoreError> {
        Ok(self
            .lock()?
            .changesets
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    fn delete_changeset(&self, id: ChangesetId) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .changesets
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("changeset", id))?;
        state.events.retain(|e| e.changeset_id != id);
        Ok(())
    }

    fn claim_next_queued(&self, now: DateTime<Utc>) -> Result<Option<Changeset>, StoreError> {
        let mut state = self.lock()?;
        let next = state
            .changesets
            .values()
            .filter(|c| c.reconciler_state == ReconcilerState::Queued)
            .filter(|c| c.process_after.map(|t| t <= now).unwrap_or(true))
            .min_by_key(|c| (c.updated_at, c.id))
            .map(|c| c.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(cs) = state.changesets.get_mut(&id) else {
            return Ok(None);
        };
        cs.reconciler_state = ReconcilerState::Processing;
        cs.updated_at = now;
        Ok(Some(cs.clone()))
    }

    fn record_attempt(
        &self,
        claimed: &Changeset,
        attempt: &Changeset,
    ) -> Result<Changeset, StoreError> {
        let mut state = self.lock()?;
        let slot = state
            .changesets
            .get_mut(&attempt.id)
            .ok_or_else(|| StoreError::not_found("changeset", attempt.id))?;
        if slot.reconciler_state != ReconcilerState::Processing {
            return Err(StoreError::NotClaimed {
                id: attempt.id.to_string(),
                state: slot.reconciler_state.to_string(),
            });
        }

        let mut next = attempt.clone();
        next.rebase_apply_fields(claimed, slot);
        if next.requeue_requested {
            next.requeue_requested = false;
            next.enqueue(attempt.updated_at);
        }
        *slot = next.clone();
        Ok(next)
    }

    fn requeue_errored(&self, now: DateTime<Utc>) -> Result<Vec<ChangesetId>, StoreError> {
        let mut state = self.lock()?;
        let mut requeued = Vec::new();
        for cs in state.changesets.values_mut() {
            if cs.reconciler_state != ReconcilerState::Errored {
                continue;
            }
            if cs.process_after.map(|t| t <= now).unwrap_or(true) {
                cs.reconciler_state = ReconcilerState::Queued;
                cs.updated_at = now;
                requeued.push(cs.id);
            }
        }
        Ok(requeued)
    }

    fn upsert_changeset_events(&self, events: &[ChangesetEvent]) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let mut inserted = 0;
        for ev in events {
            let key = ev.natural_key();
            match state.events.iter_mut().find(|e| e.natural_key() == key) {
                Some(existing) => *existing = ev.clone(),
                None => {
                    state.events.push(ev.clone());
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }

    fn list_changeset_events(
        &self,
        changeset_ids: &[ChangesetId],
    ) -> Result<Vec<ChangesetEvent>, StoreError> {
        let state = self.lock()?;
        let mut events: Vec<ChangesetEvent> = state
            .events
            .iter()
            .filter(|e| changeset_ids.contains(&e.changeset_id))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }
}

/// Apply a campaign-side write to `stored` without touching a worker's claim.
fn guard_claim(stored: &Changeset, incoming: &Changeset) -> Changeset {
    let stored_busy = stored.reconciler_state == ReconcilerState::Processing;
    let incoming_busy = incoming.reconciler_state == ReconcilerState::Processing;
    if !stored_busy && !incoming_busy {
        return incoming.clone();
    }

    let mut next = incoming.clone();
    next.take_reconciler_fields(stored);
    let requeue = incoming.requeue_requested
        || (stored_busy && incoming.reconciler_state == ReconcilerState::Queued);
    if stored_busy {
        next.requeue_requested = stored.requeue_requested || requeue;
    } else {
        // Stale copy read mid-attempt; the attempt has since been recorded.
        next.requeue_requested = false;
        if requeue {
            next.enqueue(incoming.updated_at);
        }
    }
    next
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
