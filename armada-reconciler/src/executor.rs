//! Runs a [`Plan`] against the code host and folds the results back into the
//! changeset. Every host call is bounded by the request timeout.
//!
//! The changeset is mutated in place as operations succeed, so a failure
//! half way through still leaves a record of what the host already has.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use armada_core::{
    types::{BranchDescription, RemoteChangeset},
    Changeset, ChangesetEvent, ChangesetSpec, ExternalState, PublicationState, Repo, Store,
};
use armada_template::{campaign_url, Renderer};

use crate::error::{HostError, ReconcilerError};
use crate::host::{ChangesetRequest, CodeHost, PushRequest};
use crate::plan::{Plan, ReconcilerOperation};

pub struct Executor<'a> {
    pub store: &'a dyn Store,
    pub host: &'a dyn CodeHost,
    pub renderer: &'a Renderer,
    pub base_url: &'a str,
    pub timeout: Duration,
}

impl Executor<'_> {
    pub async fn execute(
        &self,
        cs: &mut Changeset,
        repo: &Repo,
        spec: Option<&ChangesetSpec>,
        plan: &Plan,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcilerError> {
        for op in plan.ops() {
            tracing::debug!(changeset = %cs.id, repo = %repo.name, %op, "executing operation");
            match op {
                ReconcilerOperation::Import => self.import(cs, repo).await?,
                ReconcilerOperation::Push => {
                    let branch = branch_of(cs, spec)?;
                    self.push(cs, repo, branch).await?
                }
                ReconcilerOperation::Publish => {
                    let branch = branch_of(cs, spec)?;
                    self.publish(cs, repo, branch, false).await?
                }
                ReconcilerOperation::PublishDraft => {
                    let branch = branch_of(cs, spec)?;
                    self.publish(cs, repo, branch, true).await?
                }
                ReconcilerOperation::Update => {
                    let branch = branch_of(cs, spec)?;
                    self.update(cs, repo, branch).await?
                }
                ReconcilerOperation::Undraft => {
                    let external_id = external_id(cs)?;
                    let remote = self
                        .call(self.host.undraft_changeset(repo, &external_id))
                        .await?;
                    apply_remote(cs, remote);
                }
                ReconcilerOperation::Close => {
                    let external_id = external_id(cs)?;
                    let remote = self
                        .call(self.host.close_changeset(repo, &external_id))
                        .await?;
                    apply_remote(cs, remote);
                    cs.closing = false;
                }
                ReconcilerOperation::Sync => self.sync(cs, repo, now).await?,
                ReconcilerOperation::Detach => detach(cs),
            }
        }
        Ok(())
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, HostError>>,
    ) -> Result<T, HostError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(HostError::Timeout(self.timeout)),
        }
    }

    async fn import(&self, cs: &mut Changeset, repo: &Repo) -> Result<(), ReconcilerError> {
        let external_id = external_id(cs)?;
        let remote = self.call(self.host.load_changeset(repo, &external_id)).await?;
        apply_remote(cs, remote);
        cs.publication_state = PublicationState::Published;
        Ok(())
    }

    async fn push(
        &self,
        cs: &mut Changeset,
        repo: &Repo,
        branch: &BranchDescription,
    ) -> Result<(), ReconcilerError> {
        let commit = branch
            .commit()
            .ok_or_else(|| ReconcilerError::invalid(cs.id, "branch spec has no commit"))?;
        let push = PushRequest {
            base_ref: branch.base_ref.clone(),
            base_rev: branch.base_rev.clone(),
            head_ref: branch.head_ref.clone(),
            message: commit.message.clone(),
            diff: commit.diff.clone(),
            author_name: commit.author_name.clone(),
            author_email: commit.author_email.clone(),
        };
        let rev = self.call(self.host.push_branch(repo, &push)).await?;
        tracing::debug!(changeset = %cs.id, head_ref = %branch.head_ref, %rev, "pushed branch");
        cs.external_branch = Some(branch.head_ref.clone());
        Ok(())
    }

    async fn publish(
        &self,
        cs: &mut Changeset,
        repo: &Repo,
        branch: &BranchDescription,
        draft: bool,
    ) -> Result<(), ReconcilerError> {
        let request = self.request(cs, branch, draft)?;
        let remote = self.call(self.host.create_changeset(repo, &request)).await?;
        tracing::info!(
            changeset = %cs.id,
            repo = %repo.name,
            external_id = %remote.external_id,
            draft,
            "published changeset"
        );
        apply_remote(cs, remote);
        cs.publication_state = PublicationState::Published;
        Ok(())
    }

    async fn update(
        &self,
        cs: &mut Changeset,
        repo: &Repo,
        branch: &BranchDescription,
    ) -> Result<(), ReconcilerError> {
        let external_id = external_id(cs)?;
        let draft = cs.external_state == Some(ExternalState::Draft);
        let request = self.request(cs, branch, draft)?;
        let remote = self
            .call(self.host.update_changeset(repo, &external_id, &request))
            .await?;
        apply_remote(cs, remote);
        Ok(())
    }

    /// Refresh metadata and pull new events, then recompute derived state.
    async fn sync(
        &self,
        cs: &mut Changeset,
        repo: &Repo,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcilerError> {
        let external_id = external_id(cs)?;
        let remote = self.call(self.host.load_changeset(repo, &external_id)).await?;
        let events: Vec<ChangesetEvent> = self
            .call(self.host.list_events_since(repo, &external_id, cs.synced_at))
            .await?
            .into_iter()
            .map(|e| e.into_changeset_event(cs.id))
            .collect();
        let inserted = self.store.upsert_changeset_events(&events)?;

        apply_remote(cs, remote);
        cs.synced_at = Some(now);
        cs.sync_requested = false;
        let all = self.store.list_changeset_events(&[cs.id])?;
        armada_sync::set_derived_state(cs, &all);
        tracing::debug!(changeset = %cs.id, inserted, "synced changeset");
        Ok(())
    }

    fn request(
        &self,
        cs: &Changeset,
        branch: &BranchDescription,
        draft: bool,
    ) -> Result<ChangesetRequest, ReconcilerError> {
        let body = match cs.owned_by_campaign_id {
            Some(owner) => {
                let campaign = self.store.get_campaign(owner)?;
                let url = campaign_url(self.base_url, owner);
                self.renderer.decorate_body(&branch.body, &campaign.name, &url)?
            }
            None => branch.body.clone(),
        };
        Ok(ChangesetRequest {
            title: branch.title.clone(),
            body,
            base_ref: branch.base_ref.clone(),
            head_ref: branch.head_ref.clone(),
            draft,
        })
    }
}

fn branch_of<'s>(
    cs: &Changeset,
    spec: Option<&'s ChangesetSpec>,
) -> Result<&'s BranchDescription, ReconcilerError> {
    spec.and_then(ChangesetSpec::branch)
        .ok_or_else(|| ReconcilerError::invalid(cs.id, "no branch spec to publish from"))
}

fn external_id(cs: &Changeset) -> Result<String, ReconcilerError> {
    cs.external_id
        .clone()
        .ok_or_else(|| ReconcilerError::invalid(cs.id, "changeset has no external ID"))
}

fn apply_remote(cs: &mut Changeset, remote: RemoteChangeset) {
    cs.external_id = Some(remote.external_id.clone());
    cs.external_branch = Some(remote.head_ref.clone());
    cs.external_state = Some(remote.state);
    cs.metadata = Some(remote);
}

/// Unlink from the owning campaign. Ownership is kept: a later spec for the
/// same branch reattaches it.
fn detach(cs: &mut Changeset) {
    if let Some(owner) = cs.owned_by_campaign_id {
        cs.detach(owner);
    }
    cs.detaching = false;
    cs.closing = false;
}
