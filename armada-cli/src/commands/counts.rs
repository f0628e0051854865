//! `armada counts`: per-day changeset totals reconstructed from events.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Args;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use armada_core::{
    store::{ChangesetFilter, Store},
    ChangesetId, OpaqueId,
};
use armada_sync::{calc_counts, ChangesetCounts};

use super::{home, load_store, print_json, resolve_campaign};

/// Arguments for `armada counts`.
#[derive(Args, Debug)]
pub struct CountsArgs {
    /// Campaign name or ID.
    pub campaign: String,

    /// Number of days to look back.
    #[arg(long, default_value_t = 7)]
    pub days: u32,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct CountsJson {
    campaign: String,
    counts: Vec<ChangesetCounts>,
}

#[derive(Tabled)]
struct CountsRow {
    #[tabled(rename = "day")]
    day: String,
    #[tabled(rename = "total")]
    total: u32,
    #[tabled(rename = "open")]
    open: u32,
    #[tabled(rename = "approved")]
    approved: u32,
    #[tabled(rename = "changes req.")]
    changes_requested: u32,
    #[tabled(rename = "draft")]
    draft: u32,
    #[tabled(rename = "merged")]
    merged: u32,
    #[tabled(rename = "closed")]
    closed: u32,
    #[tabled(rename = "unpublished")]
    unpublished: u32,
}

impl CountsArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let store = load_store(&home)?;
        let campaign = resolve_campaign(&store, &self.campaign)?;

        let changesets = store
            .list_changesets(&ChangesetFilter::in_campaign(campaign.id))
            .context("failed to list changesets")?;
        let ids: Vec<ChangesetId> = changesets.iter().map(|c| c.id).collect();
        let events = store
            .list_changeset_events(&ids)
            .context("failed to list changeset events")?;

        let end = Utc::now();
        let start = end - Duration::days(i64::from(self.days));
        let counts = calc_counts(start, end, &changesets, &events);

        if self.json {
            return print_json(
                &CountsJson {
                    campaign: campaign.id.to_opaque(),
                    counts,
                },
                "counts",
            );
        }

        println!("{} | last {} days", campaign.name, self.days);
        let rows: Vec<CountsRow> = counts
            .iter()
            .map(|c| CountsRow {
                day: c.time.format("%Y-%m-%d").to_string(),
                total: c.total,
                open: c.open,
                approved: c.open_approved,
                changes_requested: c.open_changes_requested,
                draft: c.draft,
                merged: c.merged,
                closed: c.closed,
                unpublished: c.unpublished,
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
