//! Daily changeset counts reconstructed from the event log.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use armada_core::types::{Changeset, ChangesetEvent, ChangesetId, ExternalState, ReviewState};

use crate::state::{compute_history, StatePoint};

/// One day's bucket. `open + draft + closed + merged + unpublished == total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangesetCounts {
    pub time: DateTime<Utc>,
    pub total: u32,
    pub open: u32,
    pub open_pending: u32,
    pub open_approved: u32,
    pub open_changes_requested: u32,
    pub draft: u32,
    pub closed: u32,
    pub merged: u32,
    pub unpublished: u32,
}

impl ChangesetCounts {
    fn empty(time: DateTime<Utc>) -> Self {
        Self {
            time,
            total: 0,
            open: 0,
            open_pending: 0,
            open_approved: 0,
            open_changes_requested: 0,
            draft: 0,
            closed: 0,
            merged: 0,
            unpublished: 0,
        }
    }

    fn record(&mut self, point: &StatePoint) {
        match point.external {
            ExternalState::Open => {
                self.open += 1;
                match point.review {
                    ReviewState::Approved => self.open_approved += 1,
                    ReviewState::ChangesRequested => self.open_changes_requested += 1,
                    _ => self.open_pending += 1,
                }
            }
            ExternalState::Draft => self.draft += 1,
            // Deleted on the host counts as closed.
            ExternalState::Closed | ExternalState::Deleted => self.closed += 1,
            ExternalState::Merged => self.merged += 1,
        }
    }
}

/// Day boundaries stepping back from `end` while not before `start`, ascending.
fn timestamps(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut out = Vec::new();
    let mut t = end;
    while t >= start {
        out.push(t);
        t -= Duration::days(1);
    }
    out.reverse();
    out
}

/// One bucket per day in `[start, end]`. Each changeset counts from its
/// creation on, in the state its events put it in as of that day.
pub fn calc_counts(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    changesets: &[Changeset],
    events: &[ChangesetEvent],
) -> Vec<ChangesetCounts> {
    let histories: BTreeMap<ChangesetId, Vec<StatePoint>> = changesets
        .iter()
        .filter(|cs| cs.is_published())
        .map(|cs| (cs.id, compute_history(cs, events)))
        .collect();

    timestamps(start, end)
        .into_iter()
        .map(|t| {
            let mut bucket = ChangesetCounts::empty(t);
            for cs in changesets.iter().filter(|cs| cs.created_at <= t) {
                bucket.total += 1;
                let Some(history) = histories.get(&cs.id) else {
                    bucket.unpublished += 1;
                    continue;
                };
                let point = history
                    .iter()
                    .rev()
                    .find(|p| p.at <= t)
                    .or_else(|| history.first());
                if let Some(point) = point {
                    bucket.record(point);
                }
            }
            bucket
        })
        .collect()
}
