//! `armada status`: changesets per campaign, with reconciler, publication
//! and code-host state.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use armada_apply::{CampaignService, ChangesetView};
use armada_core::{
    config, store::Store, Campaign, CheckState, DiffStat, OpaqueId, ReconcilerState, ReviewState,
};
use armada_sync::format_age;

use super::{campaign_err, home, load_store, print_json, resolve_campaign, separator};

/// Arguments for `armada status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Limit to one campaign (name or ID).
    #[arg(long)]
    pub campaign: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

struct CampaignStatus {
    campaign: Campaign,
    diff_stat: DiffStat,
    changesets: Vec<ChangesetView>,
}

#[derive(Serialize)]
struct CampaignJson {
    id: String,
    name: String,
    namespace: String,
    closed: bool,
    diff_stat: DiffStat,
    changesets: Vec<ChangesetView>,
}

#[derive(Tabled)]
struct ChangesetRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "repository")]
    repo: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "external")]
    external: String,
    #[tabled(rename = "review")]
    review: String,
    #[tabled(rename = "checks")]
    checks: String,
    #[tabled(rename = "next sync")]
    next_sync: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let store = load_store(&home)?;
        let config = config::load_at(&home).context("failed to load config")?;
        let service = CampaignService::new(&store, &store).with_sync_config(config.sync);

        let campaigns = match self.campaign.as_deref() {
            Some(key) => vec![resolve_campaign(&store, key)?],
            None => store.list_campaigns().context("failed to list campaigns")?,
        };

        let mut report = Vec::with_capacity(campaigns.len());
        for campaign in campaigns {
            let changesets = service.changeset_views(campaign.id).map_err(campaign_err)?;
            let diff_stat = service.campaign_diff_stat(campaign.id).map_err(campaign_err)?;
            report.push(CampaignStatus {
                campaign,
                diff_stat,
                changesets,
            });
        }

        if self.json {
            let payload: Vec<CampaignJson> = report
                .into_iter()
                .map(|r| CampaignJson {
                    id: r.campaign.id.to_opaque(),
                    name: r.campaign.name,
                    namespace: r.campaign.namespace.to_string(),
                    closed: r.campaign.closed_at.is_some(),
                    diff_stat: r.diff_stat,
                    changesets: r.changesets,
                })
                .collect();
            return print_json(&payload, "status");
        }

        print_report(report);
        Ok(())
    }
}

fn print_report(report: Vec<CampaignStatus>) {
    let total: usize = report.iter().map(|r| r.changesets.len()).sum();
    println!(
        "Armada v{} | {} campaigns | {} changesets",
        env!("CARGO_PKG_VERSION"),
        report.len(),
        total,
    );
    if report.is_empty() {
        println!("No campaigns applied.");
        return;
    }

    let separator = separator();
    println!("{separator}");
    println!(
        "Indicators: {} COMPLETED  {} QUEUED  {} ERRORED  {} FAILED",
        state_indicator(ReconcilerState::Completed),
        state_indicator(ReconcilerState::Queued),
        state_indicator(ReconcilerState::Errored),
        state_indicator(ReconcilerState::Failed),
    );
    println!("{separator}");

    let now = Utc::now();
    for status in report {
        let closed = if status.campaign.is_closed() {
            " (closed)".bright_black().to_string()
        } else {
            String::new()
        };
        println!(
            "{}{closed}  {}  +{} ~{} -{}",
            status.campaign.name.to_uppercase().bold(),
            status.campaign.id.to_opaque().bright_black(),
            status.diff_stat.added,
            status.diff_stat.changed,
            status.diff_stat.deleted,
        );
        if status.changesets.is_empty() {
            println!("No changesets.");
            println!("{separator}");
            continue;
        }

        let rows: Vec<ChangesetRow> = status
            .changesets
            .iter()
            .map(|view| match view {
                ChangesetView::Visible {
                    changeset,
                    repo,
                    next_sync_at,
                } => ChangesetRow {
                    id: changeset.id.to_opaque(),
                    repo: repo.name.clone(),
                    state: format!(
                        "{} {} / {}",
                        state_indicator(changeset.reconciler_state),
                        changeset.reconciler_state,
                        changeset.publication_state
                    ),
                    external: match (&changeset.external_id, changeset.external_state) {
                        (Some(id), Some(state)) => format!("#{id} {state}"),
                        (Some(id), None) => format!("#{id}"),
                        _ => "-".to_string(),
                    },
                    review: if changeset.is_published() {
                        review_label(changeset.external_review_state).to_string()
                    } else {
                        "-".to_string()
                    },
                    checks: if changeset.is_published() {
                        check_label(changeset.external_check_state).to_string()
                    } else {
                        "-".to_string()
                    },
                    next_sync: next_sync_at
                        .map(|at| {
                            if at <= now {
                                "due".to_string()
                            } else {
                                format!("in {}", format_age(now, at))
                            }
                        })
                        .unwrap_or_else(|| "-".to_string()),
                },
                ChangesetView::Hidden { id } => ChangesetRow {
                    id: id.to_opaque(),
                    repo: "(hidden)".bright_black().to_string(),
                    state: "-".to_string(),
                    external: "-".to_string(),
                    review: "-".to_string(),
                    checks: "-".to_string(),
                    next_sync: "-".to_string(),
                },
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");

        for (cs, _) in status.changesets.iter().filter_map(|v| v.visible()) {
            if let Some(message) = &cs.failure_message {
                println!("  {} {}: {message}", "!".red(), cs.id.to_opaque());
            }
        }
        println!("{separator}");
    }
}

fn state_indicator(state: ReconcilerState) -> String {
    match state {
        ReconcilerState::Completed => "■".green().to_string(),
        ReconcilerState::Queued | ReconcilerState::Processing => "■".yellow().to_string(),
        ReconcilerState::Errored => "■".magenta().to_string(),
        ReconcilerState::Failed => "■".red().to_string(),
    }
}

fn review_label(state: ReviewState) -> &'static str {
    match state {
        ReviewState::Approved => "approved",
        ReviewState::ChangesRequested => "changes requested",
        ReviewState::Pending => "pending",
        ReviewState::Commented => "commented",
        ReviewState::Dismissed => "dismissed",
    }
}

fn check_label(state: CheckState) -> &'static str {
    match state {
        CheckState::Unknown => "unknown",
        CheckState::Pending => "pending",
        CheckState::Passed => "passed",
        CheckState::Failed => "failed",
    }
}
