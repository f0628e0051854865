//! `armada id`: opaque ID encoding.

use anyhow::Result;
use clap::Subcommand;

use armada_core::{ids, CampaignError, IdKind};

use super::campaign_err;

#[derive(Subcommand, Debug)]
pub enum IdCommand {
    /// Encode a raw ID, e.g. `armada id encode campaign 42`.
    Encode {
        /// Campaign, CampaignSpec, Changeset, ChangesetSpec, Repository, User or Org.
        kind: String,
        id: String,
    },

    /// Decode an opaque ID into `<Kind> <raw>`.
    Decode { opaque: String },
}

pub fn run(command: IdCommand) -> Result<()> {
    match command {
        IdCommand::Encode { kind, id } => {
            let kind: IdKind = kind
                .parse()
                .map_err(CampaignError::from)
                .map_err(campaign_err)?;
            println!("{}", ids::encode(kind, &id));
        }
        IdCommand::Decode { opaque } => {
            let (kind, raw) = ids::decode(&opaque)
                .map_err(CampaignError::from)
                .map_err(campaign_err)?;
            println!("{kind} {raw}");
        }
    }
    Ok(())
}
