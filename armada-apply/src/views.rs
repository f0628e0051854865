//! Permission-filtered views. Authorization happens once, when the view is
//! built; a hidden entry keeps its ID so counts and pagination stay stable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use armada_core::{
    store::RepoOracle, Changeset, ChangesetId, ChangesetSpec, ChangesetSpecId, Repo, RepoId,
    StoreError,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "visibility", rename_all = "lowercase")]
pub enum ChangesetView {
    Visible {
        changeset: Changeset,
        repo: Repo,
        /// Unscheduled when unpublished or never synced.
        next_sync_at: Option<DateTime<Utc>>,
    },
    Hidden {
        id: ChangesetId,
    },
}

impl ChangesetView {
    pub fn id(&self) -> ChangesetId {
        match self {
            ChangesetView::Visible { changeset, .. } => changeset.id,
            ChangesetView::Hidden { id } => *id,
        }
    }

    pub fn visible(&self) -> Option<(&Changeset, &Repo)> {
        match self {
            ChangesetView::Visible {
                changeset, repo, ..
            } => Some((changeset, repo)),
            ChangesetView::Hidden { .. } => None,
        }
    }

    /// Wrap `changesets` using a single permission lookup.
    pub fn build(
        changesets: Vec<Changeset>,
        repos: &dyn RepoOracle,
        next_sync: &BTreeMap<ChangesetId, DateTime<Utc>>,
    ) -> Result<Vec<Self>, StoreError> {
        let accessible = lookup(repos, changesets.iter().map(|c| c.repo_id))?;
        Ok(changesets
            .into_iter()
            .map(|changeset| match accessible.get(&changeset.repo_id) {
                Some(repo) => ChangesetView::Visible {
                    next_sync_at: next_sync.get(&changeset.id).copied(),
                    repo: repo.clone(),
                    changeset,
                },
                None => ChangesetView::Hidden { id: changeset.id },
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "visibility", rename_all = "lowercase")]
pub enum ChangesetSpecView {
    Visible {
        spec: ChangesetSpec,
        repo: Repo,
    },
    Hidden {
        id: ChangesetSpecId,
        /// `branch` or `existing`; safe to reveal.
        kind: &'static str,
    },
}

impl ChangesetSpecView {
    pub fn build(specs: Vec<ChangesetSpec>, repos: &dyn RepoOracle) -> Result<Vec<Self>, StoreError> {
        let accessible = lookup(repos, specs.iter().map(|s| s.repo_id))?;
        Ok(specs
            .into_iter()
            .map(|spec| match accessible.get(&spec.repo_id) {
                Some(repo) => ChangesetSpecView::Visible {
                    repo: repo.clone(),
                    spec,
                },
                None => ChangesetSpecView::Hidden {
                    kind: if spec.is_import() { "existing" } else { "branch" },
                    id: spec.id,
                },
            })
            .collect())
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self, ChangesetSpecView::Hidden { .. })
    }
}

fn lookup(
    repos: &dyn RepoOracle,
    ids: impl Iterator<Item = RepoId>,
) -> Result<BTreeMap<RepoId, Repo>, StoreError> {
    let mut ids: Vec<RepoId> = ids.collect();
    ids.sort();
    ids.dedup();
    repos.get_accessible_repos(&ids)
}
