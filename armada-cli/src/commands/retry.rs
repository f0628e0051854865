//! `armada retry`: re-enqueue a changeset that exhausted its retries.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use armada_apply::CampaignService;
use armada_core::OpaqueId;

use super::{
    campaign_err, home, load_store, lock_state, operator, parse_changeset_id, save_store,
};

/// Arguments for `armada retry`.
#[derive(Args, Debug)]
pub struct RetryArgs {
    /// Changeset ID (opaque or numeric).
    pub changeset: String,
}

impl RetryArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let id = parse_changeset_id(&self.changeset)?;
        let _lock = lock_state(&home)?;
        let store = load_store(&home)?;
        let service = CampaignService::new(&store, &store);
        let cs = service
            .retry_changeset(&operator(), id)
            .map_err(campaign_err)?;
        save_store(&home, &store)?;
        println!(
            "{} changeset {} queued for reconciliation",
            "✓".green(),
            cs.id.to_opaque()
        );
        Ok(())
    }
}
