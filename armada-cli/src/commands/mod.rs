pub mod apply;
pub mod counts;
pub mod id;
pub mod patch;
pub mod reconcile;
pub mod retry;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use serde::Serialize;

use armada_apply::Actor;
use armada_core::{
    registry::{self, StateLock},
    store::Store,
    Campaign, CampaignError, CampaignId, ChangesetId, MemoryStore, OpaqueId, StoreError,
};

/// User ID the CLI acts as. Local state has a single site-admin operator.
pub const OPERATOR_ID: i64 = 1;

pub fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub fn operator() -> Actor {
    Actor::admin(OPERATOR_ID)
}

pub fn load_store(home: &Path) -> Result<MemoryStore> {
    let snapshot = registry::load_at(home).with_context(|| {
        format!(
            "failed to load {}",
            registry::state_path_at(home).display()
        )
    })?;
    Ok(MemoryStore::from_snapshot(snapshot))
}

pub fn save_store(home: &Path, store: &MemoryStore) -> Result<()> {
    let snapshot = store.snapshot().context("failed to snapshot state")?;
    registry::save_at(home, &snapshot).context("failed to save state")
}

/// Held by every command that writes state, for as long as it runs.
pub fn lock_state(home: &Path) -> Result<StateLock> {
    registry::try_lock_at(home)
        .context("another armada command is writing state; try again when it finishes")
}

/// Save `store` to `home`; safe to call from several workers at once.
pub fn store_checkpoint(
    home: PathBuf,
    store: Arc<MemoryStore>,
) -> impl Fn() -> Result<(), StoreError> + Send + Sync + 'static {
    let writing = Mutex::new(());
    move || {
        let _guard = writing.lock().map_err(|_| StoreError::Poisoned)?;
        registry::save_at(&home, &store.snapshot()?)
    }
}

/// Prefix campaign errors with their stable code, e.g. `[not-retryable] …`.
pub fn campaign_err(err: CampaignError) -> anyhow::Error {
    anyhow!("[{}] {err}", err.code())
}

/// Accepts a campaign name, an opaque campaign ID or a numeric ID.
pub fn resolve_campaign(store: &dyn Store, key: &str) -> Result<Campaign> {
    let by_id = CampaignId::from_opaque(key)
        .ok()
        .or_else(|| key.parse::<i64>().ok().map(CampaignId));
    if let Some(id) = by_id {
        if let Ok(campaign) = store.get_campaign(id) {
            return Ok(campaign);
        }
    }

    let mut matches: Vec<Campaign> = store
        .list_campaigns()
        .context("failed to list campaigns")?
        .into_iter()
        .filter(|c| c.name == key)
        .collect();
    match matches.len() {
        0 => bail!("campaign '{key}' not found"),
        1 => Ok(matches.remove(0)),
        n => bail!("campaign name '{key}' is ambiguous ({n} namespaces); use its ID"),
    }
}

/// Accepts an opaque changeset ID or a numeric ID.
pub fn parse_changeset_id(raw: &str) -> Result<ChangesetId> {
    if let Ok(id) = raw.parse::<i64>() {
        return Ok(ChangesetId(id));
    }
    ChangesetId::from_opaque(raw)
        .map_err(CampaignError::from)
        .map_err(campaign_err)
}

pub fn print_json<T: Serialize>(payload: &T, what: &str) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(payload)
            .with_context(|| format!("failed to serialize {what} JSON"))?
    );
    Ok(())
}

pub fn separator() -> String {
    "■".repeat(67).bright_black().to_string()
}
