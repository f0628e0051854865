//! `armada reconcile`: drain the reconciler queue once, or serve until ctrl-c.
//!
//! Only the in-process simulated code host ships with the CLI. It is seeded
//! from the last known state of every published changeset, so updates,
//! closes and syncs behave as they would against a real host.
//!
//! State is saved after every recorded attempt, and the state lock is held
//! for the whole run so no other command writes underneath the workers.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use armada_core::{
    config,
    store::{ChangesetFilter, Store},
    types::RemoteChangeset,
    ExternalState, MemoryStore, OpaqueId, PublicationState, ReconcilerState,
};
use armada_reconciler::{
    start_blocking, MemoryHost, Outcome, Reconciler, RunMode, DEFAULT_BASE_URL,
};

use super::{home, load_store, lock_state, print_json, save_store, store_checkpoint};

/// Arguments for `armada reconcile`.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Run against an in-memory simulated code host.
    #[arg(long)]
    pub simulate: bool,

    /// Keep the worker pool polling until ctrl-c instead of draining once.
    #[arg(long)]
    pub serve: bool,

    /// Override `reconciler.workers` from config.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Override `reconciler.max_attempts` from config.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Base URL used for campaign links in changeset bodies.
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "changeset")]
    changeset: String,
    #[tabled(rename = "operations")]
    operations: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "error")]
    error: String,
}

impl ReconcileArgs {
    pub fn run(self) -> Result<()> {
        if !self.simulate {
            bail!("no code host is configured; pass --simulate to use the in-memory host");
        }
        let home = home()?;
        let mut config = config::load_at(&home).context("failed to load config")?;
        if let Some(workers) = self.workers {
            config.reconciler.workers = workers;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.reconciler.max_attempts = max_attempts;
        }
        let _lock = lock_state(&home)?;
        let store = Arc::new(load_store(&home)?);
        let host = Arc::new(MemoryHost::new());
        let seeded = seed_host(&store, &host)?;
        tracing::debug!(seeded, "simulated host seeded");

        let reconciler = Reconciler::new(
            store.clone(),
            store.clone(),
            host,
            config.reconciler,
        )
        .context("failed to start reconciler")?
        .with_base_url(self.base_url)
        .with_checkpoint(store_checkpoint(home.clone(), store.clone()));
        let mode = if self.serve {
            RunMode::Serve
        } else {
            RunMode::Drain
        };
        let outcomes =
            start_blocking(Arc::new(reconciler), mode).context("reconciler run failed")?;
        save_store(&home, &store)?;
        if self.serve {
            println!("{} reconciler stopped; state saved", "✓".green());
            return Ok(());
        }

        if self.json {
            return print_json(&outcomes, "reconcile");
        }
        print_outcomes(&outcomes);
        Ok(())
    }
}

/// Make every published changeset exist on `host`.
fn seed_host(store: &MemoryStore, host: &MemoryHost) -> Result<usize> {
    let filter = ChangesetFilter {
        publication_state: Some(PublicationState::Published),
        ..ChangesetFilter::default()
    };
    let changesets = store
        .list_changesets(&filter)
        .context("failed to list changesets")?;
    let mut seeded = 0;
    for cs in changesets {
        let Some(external_id) = cs.external_id.clone() else {
            continue;
        };
        let remote = match cs.metadata {
            Some(remote) => remote,
            None => RemoteChangeset {
                title: format!("Changeset #{external_id}"),
                body: String::new(),
                base_ref: "refs/heads/main".to_string(),
                head_ref: cs
                    .external_branch
                    .clone()
                    .unwrap_or_else(|| format!("refs/heads/pr-{external_id}")),
                state: cs.external_state.unwrap_or(ExternalState::Open),
                labels: Vec::new(),
                checks: Default::default(),
                updated_at: Utc::now(),
                external_id,
            },
        };
        host.seed(cs.repo_id, remote);
        seeded += 1;
    }
    Ok(seeded)
}

fn print_outcomes(outcomes: &[Outcome]) {
    if outcomes.is_empty() {
        println!("Nothing to reconcile.");
        return;
    }
    let rows: Vec<OutcomeRow> = outcomes
        .iter()
        .map(|o| OutcomeRow {
            changeset: o.changeset_id.to_opaque(),
            operations: if o.operations.is_empty() {
                "-".to_string()
            } else {
                o.operations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            },
            state: o.state.to_string(),
            error: o.error.clone().unwrap_or_default(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let failed = outcomes
        .iter()
        .filter(|o| o.state != ReconcilerState::Completed)
        .count();
    if failed == 0 {
        println!("{} {} changesets reconciled", "✓".green(), outcomes.len());
    } else {
        println!(
            "{} {} of {} changesets need attention; see 'armada status'",
            "!".red(),
            failed,
            outcomes.len()
        );
    }
}
