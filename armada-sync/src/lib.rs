//! # armada-sync
//!
//! Read-side computations over synced changeset data.
//!
//! - [`scheduler`]: when each published changeset should next be polled
//! - [`state`]: labels, review/check/external state folded from events
//! - [`counts`]: daily time series reconstructed from the event log

pub mod counts;
pub mod scheduler;
pub mod state;

pub use counts::{calc_counts, ChangesetCounts};
pub use scheduler::{format_age, next_sync_at, schedule, ScheduledSync};
pub use state::{
    compute_check_state, compute_external_state, compute_history, compute_labels,
    compute_review_state, set_derived_state, StatePoint,
};
