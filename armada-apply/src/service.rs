//! Campaign operations: spec creation, apply/preview, close, delete, retry,
//! sync requests and read views.
//!
//! `apply_campaign` persists the rewiring outcome and enqueues changesets for
//! the reconciler; it never waits for or calls the code host.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use armada_core::{
    config::SyncConfig,
    store::{ChangesetFilter, RepoOracle, Store},
    types::{CampaignSpecFields, CommitAuthor},
    Campaign, CampaignError, CampaignId, CampaignSpec, CampaignSpecId, Changeset,
    ChangesetId, ChangesetSpec, ChangesetSpecDescription, ChangesetSpecId, DiffStat,
    ExternalState, Namespace, PublicationState, ReconcilerState, Repo, RepoId,
    ValidationError,
};
use armada_template::{Renderer, TemplateContext};

use crate::actor::Actor;
use crate::rewirer::{Operation, Rewirer, RewirerMapping};
use crate::views::{ChangesetSpecView, ChangesetView};

/// One repository's input to template expansion.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoPatch {
    pub repo_id: RepoId,
    #[serde(default = "default_base_ref")]
    pub base_ref: String,
    #[serde(default)]
    pub base_rev: String,
    pub diff: String,
}

fn default_base_ref() -> String {
    "refs/heads/main".to_string()
}

/// Result of [`CampaignService::apply_campaign`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub campaign: Campaign,
    pub mappings: Vec<RewirerMapping>,
    /// False when the spec was already applied and nothing changed.
    pub applied: bool,
}

struct Rewired {
    mappings: Vec<RewirerMapping>,
    repos: BTreeMap<RepoId, Repo>,
}

pub struct CampaignService<'a> {
    store: &'a dyn Store,
    repos: &'a dyn RepoOracle,
    sync: SyncConfig,
    fallback_author: CommitAuthor,
}

impl<'a> CampaignService<'a> {
    pub fn new(store: &'a dyn Store, repos: &'a dyn RepoOracle) -> Self {
        Self {
            store,
            repos,
            sync: SyncConfig::default(),
            fallback_author: CommitAuthor {
                name: "armada".to_string(),
                email: "armada@localhost".to_string(),
            },
        }
    }

    pub fn with_sync_config(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    // -----------------------------------------------------------------------
    // Specs
    // -----------------------------------------------------------------------

    pub fn create_campaign_spec(
        &self,
        actor: &Actor,
        namespace: Namespace,
        raw_spec: String,
        fields: CampaignSpecFields,
    ) -> Result<CampaignSpec, CampaignError> {
        if !actor.can_write_namespace(namespace) {
            return Err(CampaignError::Unauthorized(format!(
                "user {} may not create campaigns in this namespace",
                actor.user_id
            )));
        }
        let spec = CampaignSpec {
            id: CampaignSpecId::random(),
            raw_spec,
            spec: fields,
            namespace,
            user_id: actor.user_id,
            created_at: Utc::now(),
        };
        spec.validate()?;
        self.store.create_campaign_spec(&spec)?;
        tracing::debug!(campaign_spec = %spec.id, name = %spec.spec.name, "campaign spec created");
        Ok(spec)
    }

    pub fn create_changeset_spec(
        &self,
        actor: &Actor,
        campaign_spec_id: &CampaignSpecId,
        repo_id: RepoId,
        description: ChangesetSpecDescription,
    ) -> Result<ChangesetSpec, CampaignError> {
        let campaign_spec = self.store.get_campaign_spec(campaign_spec_id)?;
        actor.check_spec(&campaign_spec)?;
        self.require_repo(repo_id)?;

        let mut spec = ChangesetSpec {
            id: ChangesetSpecId::random(),
            campaign_spec_id: campaign_spec_id.clone(),
            repo_id,
            user_id: actor.user_id,
            description,
            diff_stat: DiffStat::default(),
            created_at: Utc::now(),
        };
        spec.validate()?;
        self.store.create_changeset_spec(&spec)?;
        Ok(spec)
    }

    /// Render the campaign spec's changeset template for each patch and
    /// create the resulting changeset specs.
    pub fn expand_template(
        &self,
        actor: &Actor,
        campaign_spec_id: &CampaignSpecId,
        patches: &[RepoPatch],
    ) -> Result<Vec<ChangesetSpec>, CampaignError> {
        let campaign_spec = self.store.get_campaign_spec(campaign_spec_id)?;
        actor.check_spec(&campaign_spec)?;
        let template = campaign_spec
            .spec
            .changeset_template
            .as_ref()
            .ok_or(ValidationError::MissingField("changeset_template"))?;
        let renderer = Renderer::new().map_err(template_err)?;

        let mut specs = Vec::with_capacity(patches.len());
        for patch in patches {
            let repo = self.require_repo(patch.repo_id)?;
            let ctx = TemplateContext::new(&repo, &campaign_spec.spec);
            let rendered = renderer
                .render_changeset(template, &ctx)
                .map_err(template_err)?;
            let branch = rendered.into_branch_description(
                &patch.base_ref,
                &patch.base_rev,
                patch.diff.clone(),
                &self.fallback_author,
            );
            specs.push(self.create_changeset_spec(
                actor,
                campaign_spec_id,
                repo.id,
                ChangesetSpecDescription::Branch(branch),
            )?);
        }
        Ok(specs)
    }

    pub fn changeset_spec_views(
        &self,
        campaign_spec_id: &CampaignSpecId,
    ) -> Result<Vec<ChangesetSpecView>, CampaignError> {
        let specs = self.store.list_changeset_specs(campaign_spec_id)?;
        Ok(ChangesetSpecView::build(specs, self.repos)?)
    }

    pub fn delete_expired_specs(&self) -> Result<usize, CampaignError> {
        let removed = self.store.delete_expired_specs(Utc::now())?;
        if removed > 0 {
            tracing::info!(removed, "expired specs deleted");
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Apply
    // -----------------------------------------------------------------------

    /// Rewiring outcome of applying `spec_id`, with no writes.
    pub fn preview_apply(
        &self,
        actor: &Actor,
        spec_id: &CampaignSpecId,
    ) -> Result<Vec<RewirerMapping>, CampaignError> {
        let spec = self.store.get_campaign_spec(spec_id)?;
        actor.check_spec(&spec)?;
        let existing = self.store.find_campaign(spec.namespace, &spec.spec.name)?;
        Ok(self.rewire(existing.map(|c| c.id), &spec)?.mappings)
    }

    pub fn apply_campaign(
        &self,
        actor: &Actor,
        spec_id: &CampaignSpecId,
        ensure_campaign: Option<CampaignId>,
    ) -> Result<ApplyOutcome, CampaignError> {
        let spec = self.store.get_campaign_spec(spec_id)?;
        actor.check_spec(&spec)?;

        let existing = self.store.find_campaign(spec.namespace, &spec.spec.name)?;
        match (ensure_campaign, &existing) {
            (Some(want), Some(found)) if want != found.id => {
                return Err(CampaignError::Conflict(format!(
                    "spec would apply to campaign {}, not campaign {want}",
                    found.id
                )));
            }
            (Some(want), None) => {
                return Err(CampaignError::Conflict(format!(
                    "campaign {want} does not match spec {spec_id}"
                )));
            }
            _ => {}
        }
        if let Some(campaign) = &existing {
            actor.check_campaign(campaign)?;
            if campaign.is_closed() {
                return Err(CampaignError::Conflict(format!(
                    "campaign {} is closed",
                    campaign.name
                )));
            }
            if &campaign.campaign_spec_id == spec_id {
                tracing::debug!(campaign = %campaign.id, "spec already applied");
                return Ok(ApplyOutcome {
                    campaign: campaign.clone(),
                    mappings: Vec::new(),
                    applied: false,
                });
            }
        }

        // Rewire before writing anything so conflicts leave no trace.
        let rewired = self.rewire(existing.as_ref().map(|c| c.id), &spec)?;

        let now = Utc::now();
        let campaign = match existing {
            Some(mut campaign) => {
                campaign.description = spec.spec.description.clone();
                campaign.campaign_spec_id = spec.id.clone();
                campaign.last_applier_id = actor.user_id;
                campaign.last_applied_at = now;
                campaign.updated_at = now;
                self.store.update_campaign(&campaign)?;
                campaign
            }
            None => self.store.create_campaign(Campaign {
                id: CampaignId::default(),
                name: spec.spec.name.clone(),
                description: spec.spec.description.clone(),
                namespace: spec.namespace,
                campaign_spec_id: spec.id.clone(),
                initial_applier_id: actor.user_id,
                last_applier_id: actor.user_id,
                last_applied_at: now,
                created_at: now,
                updated_at: now,
                closed_at: None,
            })?,
        };

        for mapping in &rewired.mappings {
            self.persist_mapping(campaign.id, mapping, &rewired.repos, now)?;
        }

        let count = |op: Operation| rewired.mappings.iter().filter(|m| m.operation == op).count();
        tracing::info!(
            campaign = %campaign.id,
            spec = %spec.id,
            attach = count(Operation::Attach),
            update = count(Operation::Update),
            detach = count(Operation::Detach),
            unchanged = count(Operation::None),
            "campaign applied"
        );

        Ok(ApplyOutcome {
            campaign,
            mappings: rewired.mappings,
            applied: true,
        })
    }

    fn rewire(
        &self,
        campaign_id: Option<CampaignId>,
        spec: &CampaignSpec,
    ) -> Result<Rewired, CampaignError> {
        let specs = self.store.list_changeset_specs(&spec.id)?;

        let mut changesets: BTreeMap<ChangesetId, Changeset> = BTreeMap::new();
        if let Some(id) = campaign_id {
            for cs in self.store.list_changesets(&ChangesetFilter::in_campaign(id))? {
                changesets.insert(cs.id, cs);
            }
        }
        let spec_repos: BTreeSet<RepoId> = specs.iter().map(|s| s.repo_id).collect();
        if !spec_repos.is_empty() {
            let filter = ChangesetFilter {
                repo_ids: spec_repos.iter().copied().collect(),
                ..ChangesetFilter::default()
            };
            for cs in self.store.list_changesets(&filter)? {
                changesets.insert(cs.id, cs);
            }
        }
        let changesets: Vec<Changeset> = changesets.into_values().collect();

        let mut current_specs = BTreeMap::new();
        for id in changesets.iter().filter_map(|c| c.current_spec_id.as_ref()) {
            match self.store.get_changeset_spec(id) {
                Ok(s) => {
                    current_specs.insert(id.clone(), s);
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }

        let repo_ids: Vec<RepoId> = spec_repos
            .iter()
            .copied()
            .chain(changesets.iter().map(|c| c.repo_id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let repos = self.repos.get_accessible_repos(&repo_ids)?;
        let accessible: BTreeSet<RepoId> = repos.keys().copied().collect();

        let mappings = Rewirer {
            campaign_id,
            changesets: &changesets,
            specs: &specs,
            current_specs: &current_specs,
            accessible: &accessible,
        }
        .compute()?;
        Ok(Rewired { mappings, repos })
    }

    fn persist_mapping(
        &self,
        campaign: CampaignId,
        mapping: &RewirerMapping,
        repos: &BTreeMap<RepoId, Repo>,
        now: DateTime<Utc>,
    ) -> Result<(), CampaignError> {
        match (mapping.operation, &mapping.changeset, &mapping.spec) {
            (Operation::Attach, None, Some(spec)) => {
                let repo = repos
                    .get(&spec.repo_id)
                    .ok_or_else(|| CampaignError::Unauthorized(format!(
                        "repository {} is not accessible",
                        spec.repo_id
                    )))?;
                let mut cs = Changeset::new(repo, now);
                cs.attach(campaign);
                cs.current_spec_id = Some(spec.id.clone());
                match &spec.description {
                    ChangesetSpecDescription::Existing { external_id } => {
                        // Imported: already on the host, never owned.
                        cs.external_id = Some(external_id.clone());
                        cs.publication_state = PublicationState::Published;
                    }
                    ChangesetSpecDescription::Branch(branch) => {
                        cs.owned_by_campaign_id = Some(campaign);
                        cs.external_branch = Some(branch.head_ref.clone());
                        cs.diff_stat = spec.diff_stat;
                    }
                }
                let cs = self.store.create_changeset(cs)?;
                tracing::debug!(changeset = %cs.id, repo = %cs.repo_id, "changeset created");
            }
            (Operation::Attach, Some(existing), Some(_)) => {
                let mut cs = existing.clone();
                cs.attach(campaign);
                cs.updated_at = now;
                self.store.update_changeset(&cs)?;
            }
            (Operation::Update, Some(existing), Some(spec)) => {
                let mut cs = existing.clone();
                if cs.current_spec_id.as_ref() != Some(&spec.id) {
                    cs.previous_spec_id = cs.current_spec_id.replace(spec.id.clone());
                }
                cs.attach(campaign);
                cs.diff_stat = spec.diff_stat;
                cs.closing = false;
                cs.detaching = false;
                cs.enqueue(now);
                self.store.update_changeset(&cs)?;
                tracing::debug!(
                    changeset = %cs.id,
                    changed = ?mapping.delta.changed_fields(),
                    "changeset enqueued for update"
                );
            }
            (Operation::None, Some(existing), Some(spec)) => {
                let mut cs = existing.clone();
                if !spec.is_import() && cs.current_spec_id.as_ref() != Some(&spec.id) {
                    cs.previous_spec_id = cs.current_spec_id.replace(spec.id.clone());
                }
                cs.attach(campaign);
                if &cs != existing {
                    cs.updated_at = now;
                    self.store.update_changeset(&cs)?;
                }
            }
            (Operation::Detach, Some(existing), _) => {
                let mut cs = existing.clone();
                if cs.is_owned_by(campaign) {
                    let open_on_host = !matches!(
                        cs.external_state,
                        Some(ExternalState::Closed | ExternalState::Merged | ExternalState::Deleted)
                    );
                    cs.closing = cs.is_published() && open_on_host;
                    cs.detaching = true;
                    cs.enqueue(now);
                } else {
                    // Tracked changesets are only unlinked, never closed.
                    cs.detach(campaign);
                    cs.updated_at = now;
                }
                self.store.update_changeset(&cs)?;
                tracing::debug!(changeset = %cs.id, closing = cs.closing, "changeset detached");
            }
            (op, cs, spec) => {
                tracing::warn!(
                    operation = ?op,
                    changeset = ?cs.as_ref().map(|c| c.id),
                    spec = ?spec.as_ref().map(|s| &s.id),
                    "skipping inconsistent rewirer mapping"
                );
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Campaign lifecycle
    // -----------------------------------------------------------------------

    /// Mark the campaign closed; optionally close its open changesets too.
    pub fn close_campaign(
        &self,
        actor: &Actor,
        id: CampaignId,
        close_changesets: bool,
    ) -> Result<Campaign, CampaignError> {
        let mut campaign = self.store.get_campaign(id)?;
        actor.check_campaign(&campaign)?;
        if campaign.is_closed() {
            return Ok(campaign);
        }

        let now = Utc::now();
        campaign.closed_at = Some(now);
        campaign.updated_at = now;
        self.store.update_campaign(&campaign)?;

        if close_changesets {
            let filter = ChangesetFilter {
                owned_by_campaign_id: Some(id),
                publication_state: Some(PublicationState::Published),
                ..ChangesetFilter::default()
            };
            for mut cs in self.store.list_changesets(&filter)? {
                if matches!(
                    cs.external_state,
                    Some(ExternalState::Closed | ExternalState::Merged | ExternalState::Deleted)
                ) {
                    continue;
                }
                cs.closing = true;
                cs.enqueue(now);
                self.store.update_changeset(&cs)?;
            }
        }
        tracing::info!(campaign = %id, close_changesets, "campaign closed");
        Ok(campaign)
    }

    /// Delete a closed campaign. Changesets it never published go with it;
    /// published ones stay on the host and are only unlinked.
    pub fn delete_campaign(&self, actor: &Actor, id: CampaignId) -> Result<(), CampaignError> {
        let campaign = self.store.get_campaign(id)?;
        actor.check_campaign(&campaign)?;
        if !campaign.is_closed() {
            return Err(CampaignError::Conflict(format!(
                "campaign {} must be closed before it is deleted",
                campaign.name
            )));
        }

        for mut cs in self.store.list_changesets(&ChangesetFilter::in_campaign(id))? {
            if cs.is_owned_by(id) && !cs.is_published() {
                self.store.delete_changeset(cs.id)?;
                continue;
            }
            cs.detach(id);
            if cs.is_owned_by(id) {
                cs.owned_by_campaign_id = None;
            }
            cs.updated_at = Utc::now();
            self.store.update_changeset(&cs)?;
        }
        self.store.delete_campaign(id)?;
        tracing::info!(campaign = %id, "campaign deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Changeset actions
    // -----------------------------------------------------------------------

    /// Explicit user retry: `Failed` back to `Queued` with attempts reset.
    pub fn retry_changeset(&self, actor: &Actor, id: ChangesetId) -> Result<Changeset, CampaignError> {
        let mut cs = self.authorized_changeset(actor, id)?;
        if cs.reconciler_state != ReconcilerState::Failed {
            return Err(CampaignError::NotRetryable {
                changeset: id.0,
                state: cs.reconciler_state.to_string(),
            });
        }
        cs.enqueue(Utc::now());
        self.store.update_changeset(&cs)?;
        tracing::info!(changeset = %id, "changeset re-enqueued by user");
        Ok(cs)
    }

    /// Ask for a sync soon, regardless of observed activity.
    pub fn enqueue_changeset_sync(
        &self,
        actor: &Actor,
        id: ChangesetId,
    ) -> Result<Changeset, CampaignError> {
        let mut cs = self.authorized_changeset(actor, id)?;
        if !cs.is_published() {
            return Err(CampaignError::Conflict(format!(
                "changeset {id} is not published and cannot be synced"
            )));
        }
        cs.sync_requested = true;
        cs.updated_at = Utc::now();
        self.store.update_changeset(&cs)?;
        Ok(cs)
    }

    fn authorized_changeset(&self, actor: &Actor, id: ChangesetId) -> Result<Changeset, CampaignError> {
        let cs = self.store.get_changeset(id)?;
        self.require_repo(cs.repo_id)?;
        if actor.site_admin {
            return Ok(cs);
        }
        for campaign_id in &cs.campaign_ids {
            let campaign = self.store.get_campaign(*campaign_id)?;
            if actor.check_campaign(&campaign).is_ok() {
                return Ok(cs);
            }
        }
        Err(CampaignError::Unauthorized(format!(
            "user {} may not modify changeset {id}",
            actor.user_id
        )))
    }

    // -----------------------------------------------------------------------
    // Read views
    // -----------------------------------------------------------------------

    pub fn changeset_views(&self, campaign: CampaignId) -> Result<Vec<ChangesetView>, CampaignError> {
        let filter = ChangesetFilter::in_campaign(campaign);
        let now = Utc::now();
        let next_sync: BTreeMap<ChangesetId, DateTime<Utc>> = self
            .store
            .list_sync_data(&filter)?
            .iter()
            .filter_map(|d| {
                armada_sync::next_sync_at(d, &self.sync, now).map(|t| (d.changeset_id, t))
            })
            .collect();
        let changesets = self.store.list_changesets(&filter)?;
        Ok(ChangesetView::build(changesets, self.repos, &next_sync)?)
    }

    /// Added/changed/deleted lines over the campaign's visible changesets.
    pub fn campaign_diff_stat(&self, campaign: CampaignId) -> Result<DiffStat, CampaignError> {
        Ok(self
            .changeset_views(campaign)?
            .iter()
            .filter_map(|v| v.visible())
            .filter(|(cs, _)| !cs.detaching)
            .map(|(cs, _)| cs.diff_stat)
            .sum())
    }

    fn require_repo(&self, id: RepoId) -> Result<Repo, CampaignError> {
        self.repos
            .get_accessible_repos(&[id])?
            .remove(&id)
            .ok_or_else(|| CampaignError::Unauthorized(format!("repository {id} is not accessible")))
    }
}

fn template_err(err: armada_template::TemplateError) -> CampaignError {
    ValidationError::Other(format!("changeset template: {err}")).into()
}
