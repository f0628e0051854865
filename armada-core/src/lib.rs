//! armada core library: domain types, opaque IDs, errors, configuration and
//! the persistence collaborator.
//!
//! - [`types`]: campaigns, specs, changesets, events
//! - [`ids`]: opaque external identifiers
//! - [`delta`]: what changed between two branch specs
//! - [`error`]: [`ErrorKind`], [`CampaignError`], [`StoreError`]
//! - [`store`]: [`Store`] / [`RepoOracle`] and the in-memory implementation
//! - [`registry`]: YAML snapshot load / save
//! - [`config`]: `config.yaml`

pub mod config;
pub mod delta;
pub mod error;
pub mod ids;
pub mod registry;
pub mod store;
pub mod types;

pub use config::Config;
pub use delta::Delta;
pub use error::{CampaignError, ErrorKind, StoreError, ValidationError};
pub use ids::{IdError, IdKind, OpaqueId};
pub use store::{ChangesetFilter, MemoryStore, RepoOracle, Snapshot, Store};
pub use types::{
    Campaign, CampaignId, CampaignSpec, CampaignSpecId, Changeset, ChangesetEvent, ChangesetId,
    ChangesetSpec, ChangesetSpecDescription, ChangesetSpecId, CheckState, DiffStat, EventPayload,
    ExternalState, Namespace, PublicationState, PublishIntent, ReconcilerState, Repo, RepoId,
    ReviewState, UserId,
};
