//! Rewiring: classify every changeset touched by a new campaign spec as
//! attach, update, detach or none.
//!
//! Branch specs are matched to existing changesets by `(repo, head ref)`,
//! import specs by `(repo, external id)`. Output is sorted by
//! [`MappingKey`], so identical input always yields identical output.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

pub use armada_core::delta::Delta;
use armada_core::{
    types::{BranchDescription, ChangesetSpecDescription},
    CampaignError, CampaignId, Changeset, ChangesetId, ChangesetSpec, ChangesetSpecId, RepoId,
    ValidationError,
};

/// What applying the spec does to one changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// New changeset, or an existing one newly tracked by the campaign.
    Attach,
    /// Spec changed in a way the code host must see.
    Update,
    /// No longer in the spec: close if owned and published, then unlink.
    Detach,
    /// Nothing for the code host to do.
    None,
}

/// Sort key of a mapping: repository first, then head ref, then external ID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MappingKey {
    pub repo_id: RepoId,
    pub head_ref: String,
    pub external_id: String,
}

/// One rewiring decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewirerMapping {
    pub key: MappingKey,
    pub operation: Operation,
    pub delta: Delta,
    /// Existing changeset, if any.
    pub changeset: Option<Changeset>,
    /// New spec, absent for detaches.
    pub spec: Option<ChangesetSpec>,
}

/// Inputs to one rewiring pass. [`Rewirer::compute`] is pure.
pub struct Rewirer<'a> {
    /// Campaign being applied; `None` when previewing a first apply.
    pub campaign_id: Option<CampaignId>,
    /// Changesets attached to the campaign plus any in the specs' repositories.
    pub changesets: &'a [Changeset],
    pub specs: &'a [ChangesetSpec],
    /// Current specs of the changesets, for computing deltas.
    pub current_specs: &'a BTreeMap<ChangesetSpecId, ChangesetSpec>,
    pub accessible: &'a BTreeSet<RepoId>,
}

impl Rewirer<'_> {
    pub fn compute(&self) -> Result<Vec<RewirerMapping>, CampaignError> {
        let mut by_branch: BTreeMap<(RepoId, &str), &Changeset> = BTreeMap::new();
        let mut by_external: BTreeMap<(RepoId, &str), &Changeset> = BTreeMap::new();
        for cs in self.changesets {
            if let Some(ext) = cs.external_id.as_deref() {
                by_external.insert((cs.repo_id, ext), cs);
            }
            if cs.owned_by_campaign_id.is_some() {
                if let Some(branch) = cs.external_branch.as_deref() {
                    by_branch.insert((cs.repo_id, branch), cs);
                }
            }
        }

        let mut seen_keys = BTreeSet::new();
        let mut matched: BTreeSet<ChangesetId> = BTreeSet::new();
        let mut mappings = Vec::with_capacity(self.specs.len());

        for spec in self.specs {
            if !self.accessible.contains(&spec.repo_id) {
                return Err(CampaignError::Unauthorized(format!(
                    "repository {} is not accessible",
                    spec.repo_id
                )));
            }
            let mapping = match &spec.description {
                ChangesetSpecDescription::Existing { external_id } => {
                    let existing = by_external.get(&(spec.repo_id, external_id.as_str()));
                    self.import_mapping(spec, external_id, existing.copied())
                }
                ChangesetSpecDescription::Branch(branch) => {
                    let existing = by_branch.get(&(spec.repo_id, branch.head_ref.as_str()));
                    self.branch_mapping(spec, branch, existing.copied())?
                }
            };
            if !seen_keys.insert(mapping.key.clone()) {
                return Err(ValidationError::Other(format!(
                    "more than one changeset spec for repository {} and {}",
                    mapping.key.repo_id,
                    if mapping.key.head_ref.is_empty() {
                        &mapping.key.external_id
                    } else {
                        &mapping.key.head_ref
                    }
                ))
                .into());
            }
            if let Some(cs) = &mapping.changeset {
                matched.insert(cs.id);
            }
            mappings.push(mapping);
        }

        if let Some(campaign) = self.campaign_id {
            for cs in self.changesets {
                if !cs.campaign_ids.contains(&campaign) || matched.contains(&cs.id) {
                    continue;
                }
                // Hidden repositories are left alone rather than detached.
                if !self.accessible.contains(&cs.repo_id) {
                    continue;
                }
                mappings.push(RewirerMapping {
                    key: key_of(cs),
                    operation: Operation::Detach,
                    delta: Delta::default(),
                    changeset: Some(cs.clone()),
                    spec: None,
                });
            }
        }

        mappings.sort_by(|a, b| {
            let id = |m: &RewirerMapping| m.changeset.as_ref().map(|c| c.id);
            (&a.key, id(a)).cmp(&(&b.key, id(b)))
        });
        Ok(mappings)
    }

    fn import_mapping(
        &self,
        spec: &ChangesetSpec,
        external_id: &str,
        existing: Option<&Changeset>,
    ) -> RewirerMapping {
        let attached = existing
            .zip(self.campaign_id)
            .map(|(cs, campaign)| cs.campaign_ids.contains(&campaign))
            .unwrap_or(false);
        RewirerMapping {
            key: MappingKey {
                repo_id: spec.repo_id,
                head_ref: existing
                    .and_then(|cs| cs.external_branch.clone())
                    .unwrap_or_default(),
                external_id: external_id.to_string(),
            },
            operation: if attached {
                Operation::None
            } else {
                Operation::Attach
            },
            delta: Delta::default(),
            changeset: existing.cloned(),
            spec: Some(spec.clone()),
        }
    }

    fn branch_mapping(
        &self,
        spec: &ChangesetSpec,
        branch: &BranchDescription,
        existing: Option<&Changeset>,
    ) -> Result<RewirerMapping, CampaignError> {
        let key = MappingKey {
            repo_id: spec.repo_id,
            head_ref: branch.head_ref.clone(),
            external_id: existing
                .and_then(|cs| cs.external_id.clone())
                .unwrap_or_default(),
        };
        let Some(cs) = existing else {
            return Ok(RewirerMapping {
                key,
                operation: Operation::Attach,
                delta: Delta::all(),
                changeset: None,
                spec: Some(spec.clone()),
            });
        };

        if let Some(owner) = cs.owned_by_campaign_id {
            if Some(owner) != self.campaign_id {
                return Err(CampaignError::OwnershipConflict {
                    changeset: cs.id.0,
                    repo: cs.repo_id.0,
                    head_ref: branch.head_ref.clone(),
                    owner: owner.0,
                });
            }
        }

        let delta = cs
            .current_spec_id
            .as_ref()
            .and_then(|id| self.current_specs.get(id))
            .and_then(|current| current.branch())
            .map(|current| Delta::between(current, branch))
            .unwrap_or_else(Delta::all);

        // A changeset on its way out needs work even if the spec is unchanged.
        let revived = cs.detaching || cs.closing;
        let operation = if delta.is_empty() && !revived {
            Operation::None
        } else {
            Operation::Update
        };

        Ok(RewirerMapping {
            key,
            operation,
            delta,
            changeset: Some(cs.clone()),
            spec: Some(spec.clone()),
        })
    }
}

fn key_of(cs: &Changeset) -> MappingKey {
    MappingKey {
        repo_id: cs.repo_id,
        head_ref: cs.external_branch.clone().unwrap_or_default(),
        external_id: cs.external_id.clone().unwrap_or_default(),
    }
}
