//! # armada-apply
//!
//! Applying campaign specs: the [`rewirer`] diffs a new spec against the
//! changesets that already exist, and [`CampaignService`] persists the
//! outcome and enqueues reconciler work without waiting for it.
//!
//! Read paths hand out [`ChangesetView`]s so callers never see changesets in
//! repositories the actor cannot access.

pub mod actor;
pub mod rewirer;
pub mod service;
pub mod views;

pub use actor::Actor;
pub use rewirer::{Delta, MappingKey, Operation, Rewirer, RewirerMapping};
pub use service::{ApplyOutcome, CampaignService, RepoPatch};
pub use views::{ChangesetSpecView, ChangesetView};
