//! `armada apply`: create specs from a bundle and apply them.
//!
//! A bundle is one YAML document:
//!
//! ```yaml
//! repos:                       # registered before the specs are created
//!   - { id: 1, name: github.com/acme/api, external_service_type: github }
//! campaign:
//!   name: bump-deps
//!   description: Bump dependencies
//!   changeset_template:
//!     title: Bump deps
//!     branch: bump-deps
//!     commit: { message: "Bump deps" }
//!     published: true
//! patches:                     # expanded through changeset_template
//!   - { repo_id: 1, base_rev: abc123, diff: "..." }
//! changesets:                  # explicit specs, e.g. imports
//!   - { repo_id: 2, spec: { kind: existing, external_id: "42" } }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{settings::Style, Table, Tabled};

use armada_apply::{CampaignService, Operation, RepoPatch, RewirerMapping};
use armada_core::{
    config, store::RepoOracle, types::CampaignSpecFields, ChangesetSpecDescription, Namespace,
    OpaqueId, Repo, RepoId, UserId,
};

use super::{
    campaign_err, home, load_store, lock_state, operator, print_json, save_store, OPERATOR_ID,
};

/// Arguments for `armada apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Campaign bundle (YAML).
    pub bundle: PathBuf,

    /// Show what applying would do without writing state.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Deserialize)]
struct Bundle {
    #[serde(default = "default_namespace")]
    namespace: Namespace,
    #[serde(default)]
    repos: Vec<Repo>,
    campaign: CampaignSpecFields,
    #[serde(default)]
    patches: Vec<RepoPatch>,
    #[serde(default)]
    changesets: Vec<BundleChangeset>,
}

#[derive(Debug, Deserialize)]
struct BundleChangeset {
    repo_id: RepoId,
    spec: ChangesetSpecDescription,
}

fn default_namespace() -> Namespace {
    Namespace::User(UserId(OPERATOR_ID))
}

#[derive(Serialize)]
struct ApplyJson {
    dry_run: bool,
    campaign: Option<String>,
    campaign_spec: String,
    applied: bool,
    mappings: Vec<RewirerMapping>,
}

#[derive(Tabled)]
struct MappingRow {
    #[tabled(rename = "repository")]
    repo: String,
    #[tabled(rename = "branch / external id")]
    target: String,
    #[tabled(rename = "operation")]
    operation: String,
    #[tabled(rename = "changed")]
    changed: String,
}

impl ApplyArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let raw = std::fs::read_to_string(&self.bundle)
            .with_context(|| format!("failed to read {}", self.bundle.display()))?;
        let bundle: Bundle = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse bundle {}", self.bundle.display()))?;

        let _lock = if self.dry_run {
            None
        } else {
            Some(lock_state(&home)?)
        };
        let store = load_store(&home)?;
        for repo in bundle.repos {
            store.add_repo(repo).context("failed to register repository")?;
        }
        let config = config::load_at(&home).context("failed to load config")?;
        let service = CampaignService::new(&store, &store).with_sync_config(config.sync);
        let actor = operator();

        let spec = service
            .create_campaign_spec(&actor, bundle.namespace, raw, bundle.campaign)
            .map_err(campaign_err)?;
        if !bundle.patches.is_empty() {
            service
                .expand_template(&actor, &spec.id, &bundle.patches)
                .map_err(campaign_err)?;
        }
        for cs in bundle.changesets {
            service
                .create_changeset_spec(&actor, &spec.id, cs.repo_id, cs.spec)
                .map_err(campaign_err)?;
        }

        let (campaign, applied, mappings) = if self.dry_run {
            let mappings = service.preview_apply(&actor, &spec.id).map_err(campaign_err)?;
            (None, false, mappings)
        } else {
            let outcome = service
                .apply_campaign(&actor, &spec.id, None)
                .map_err(campaign_err)?;
            save_store(&home, &store)?;
            (Some(outcome.campaign), outcome.applied, outcome.mappings)
        };

        if self.json {
            return print_json(
                &ApplyJson {
                    dry_run: self.dry_run,
                    campaign: campaign.as_ref().map(|c| c.id.to_opaque()),
                    campaign_spec: spec.id.to_opaque(),
                    applied,
                    mappings,
                },
                "apply",
            );
        }

        let prefix = if self.dry_run { "[dry-run] " } else { "" };
        let names = repo_names(&store, &mappings)?;
        print_mappings(&names, &mappings);
        match campaign {
            Some(c) if applied => println!(
                "{} applied campaign '{}' ({})",
                "✓".green(),
                c.name,
                c.id.to_opaque()
            ),
            Some(c) => println!("campaign '{}' is already at this spec", c.name),
            None => println!(
                "{prefix}would apply campaign '{}' ({} changesets)",
                spec.spec.name,
                mappings.len()
            ),
        }
        Ok(())
    }
}

fn repo_names(
    store: &dyn RepoOracle,
    mappings: &[RewirerMapping],
) -> Result<BTreeMap<RepoId, String>> {
    let ids: Vec<RepoId> = mappings.iter().map(|m| m.key.repo_id).collect();
    Ok(store
        .get_accessible_repos(&ids)
        .context("failed to look up repositories")?
        .into_iter()
        .map(|(id, repo)| (id, repo.name))
        .collect())
}

fn print_mappings(names: &BTreeMap<RepoId, String>, mappings: &[RewirerMapping]) {
    if mappings.is_empty() {
        println!("No changesets.");
        return;
    }
    let rows: Vec<MappingRow> = mappings
        .iter()
        .map(|m| MappingRow {
            repo: names
                .get(&m.key.repo_id)
                .cloned()
                .unwrap_or_else(|| format!("repo {}", m.key.repo_id)),
            target: if m.key.head_ref.is_empty() {
                format!("#{}", m.key.external_id)
            } else {
                m.key.head_ref.clone()
            },
            operation: operation_label(m.operation).to_string(),
            changed: m.delta.changed_fields().join(", "),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn operation_label(op: Operation) -> &'static str {
    match op {
        Operation::Attach => "attach",
        Operation::Update => "update",
        Operation::Detach => "detach",
        Operation::None => "none",
    }
}
