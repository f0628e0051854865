//! Derived changeset state folded from the last full sync plus later events.
//!
//! The syncer stores a [`RemoteChangeset`](armada_core::types::RemoteChangeset)
//! snapshot on every full sync and appends [`ChangesetEvent`]s as webhooks
//! arrive. Everything here is a pure function of those two inputs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use armada_core::types::{
    Changeset, ChangesetEvent, ChangesetLabel, CheckState, EventPayload, ExternalState,
    ReviewState,
};

/// State of a changeset right after an event (or at creation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatePoint {
    pub at: DateTime<Utc>,
    pub external: ExternalState,
    pub review: ReviewState,
}

// ---------------------------------------------------------------------------
// History replay
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Replay {
    external: ExternalState,
    draft: bool,
    reviews: BTreeMap<String, ReviewState>,
}

impl Replay {
    fn starting_as(draft: bool) -> Self {
        Self {
            external: if draft {
                ExternalState::Draft
            } else {
                ExternalState::Open
            },
            draft,
            reviews: BTreeMap::new(),
        }
    }

    fn apply(&mut self, payload: &EventPayload) {
        match payload {
            EventPayload::Closed => {
                if self.external != ExternalState::Merged {
                    self.external = ExternalState::Closed;
                }
            }
            EventPayload::Deleted => {
                if self.external != ExternalState::Merged {
                    self.external = ExternalState::Deleted;
                }
            }
            EventPayload::Reopened => {
                if self.external == ExternalState::Closed {
                    self.external = if self.draft {
                        ExternalState::Draft
                    } else {
                        ExternalState::Open
                    };
                }
            }
            EventPayload::Merged => self.external = ExternalState::Merged,
            EventPayload::ConvertedToDraft => {
                self.draft = true;
                if self.external == ExternalState::Open {
                    self.external = ExternalState::Draft;
                }
            }
            EventPayload::ReadyForReview => {
                self.draft = false;
                if self.external == ExternalState::Draft {
                    self.external = ExternalState::Open;
                }
            }
            EventPayload::Reviewed { author, state } => record_review(&mut self.reviews, author, *state),
            EventPayload::ReviewDismissed { author } => {
                self.reviews.remove(author);
            }
            EventPayload::Labeled { .. }
            | EventPayload::Unlabeled { .. }
            | EventPayload::CheckStatus { .. }
            | EventPayload::Commented { .. }
            | EventPayload::CommitPushed { .. } => {}
        }
    }

    fn point(&self, at: DateTime<Utc>) -> StatePoint {
        StatePoint {
            at,
            external: self.external,
            review: select_review_state(self.reviews.values().copied()),
        }
    }
}

fn record_review(reviews: &mut BTreeMap<String, ReviewState>, author: &str, state: ReviewState) {
    // An empty author is a deleted user; their review no longer counts.
    if author.is_empty() {
        return;
    }
    match state {
        ReviewState::Approved | ReviewState::ChangesRequested | ReviewState::Pending => {
            reviews.insert(author.to_string(), state);
        }
        ReviewState::Dismissed => {
            reviews.remove(author);
        }
        ReviewState::Commented => {}
    }
}

fn select_review_state(states: impl IntoIterator<Item = ReviewState>) -> ReviewState {
    let mut approved = false;
    for state in states {
        match state {
            ReviewState::ChangesRequested => return ReviewState::ChangesRequested,
            ReviewState::Approved => approved = true,
            _ => {}
        }
    }
    if approved {
        ReviewState::Approved
    } else {
        ReviewState::Pending
    }
}

fn events_for<'a>(cs: &Changeset, events: &'a [ChangesetEvent]) -> Vec<&'a ChangesetEvent> {
    let mut own: Vec<&ChangesetEvent> = events
        .iter()
        .filter(|e| e.changeset_id == cs.id)
        .collect();
    own.sort_by_key(|e| e.created_at);
    own
}

/// A changeset started as a draft when its first draft transition is
/// "ready for review", or when it is a draft now and never changed.
fn started_as_draft(cs: &Changeset, events: &[&ChangesetEvent]) -> bool {
    let first = events.iter().find_map(|e| match e.payload {
        EventPayload::ReadyForReview => Some(true),
        EventPayload::ConvertedToDraft => Some(false),
        _ => None,
    });
    first.unwrap_or(cs.external_state == Some(ExternalState::Draft))
}

/// External and review state after creation and after each event, in order.
pub fn compute_history(cs: &Changeset, events: &[ChangesetEvent]) -> Vec<StatePoint> {
    let own = events_for(cs, events);
    let mut replay = Replay::starting_as(started_as_draft(cs, &own));
    let mut points = Vec::with_capacity(own.len() + 1);
    points.push(replay.point(cs.created_at));
    for ev in own {
        replay.apply(&ev.payload);
        points.push(replay.point(ev.created_at));
    }
    points
}

// ---------------------------------------------------------------------------
// Current derived state
// ---------------------------------------------------------------------------

/// Current external state. The synced snapshot wins when it is newer than
/// the latest event; `None` when nothing is known yet.
pub fn compute_external_state(cs: &Changeset, events: &[ChangesetEvent]) -> Option<ExternalState> {
    let own = events_for(cs, events);
    let synced = cs.metadata.as_ref().map(|m| m.state).or(cs.external_state);
    let Some(newest) = own.last() else {
        return synced;
    };
    if let (Some(state), Some(synced_at)) = (synced, cs.synced_at) {
        if synced_at > newest.created_at {
            return Some(state);
        }
    }
    compute_history(cs, events).last().map(|p| p.external)
}

/// Latest review per author; changes requested beats approved beats pending.
pub fn compute_review_state(cs: &Changeset, events: &[ChangesetEvent]) -> ReviewState {
    let mut reviews = BTreeMap::new();
    for ev in events_for(cs, events) {
        match &ev.payload {
            EventPayload::Reviewed { author, state } => record_review(&mut reviews, author, *state),
            EventPayload::ReviewDismissed { author } => {
                reviews.remove(author);
            }
            _ => {}
        }
    }
    select_review_state(reviews.into_values())
}

/// Combined CI state from the synced checks plus check events since the sync.
pub fn compute_check_state(cs: &Changeset, events: &[ChangesetEvent]) -> CheckState {
    let mut contexts: BTreeMap<String, CheckState> = cs
        .metadata
        .as_ref()
        .map(|m| m.checks.clone())
        .unwrap_or_default();
    for ev in events_for(cs, events) {
        if !after_sync(cs, ev) {
            continue;
        }
        if let EventPayload::CheckStatus { context, state } = &ev.payload {
            contexts.insert(context.clone(), *state);
        }
    }
    combine_checks(contexts.values().copied())
}

fn combine_checks(states: impl IntoIterator<Item = CheckState>) -> CheckState {
    let (mut any, mut failed, mut unknown) = (false, false, false);
    for state in states {
        any = true;
        match state {
            CheckState::Pending => return CheckState::Pending,
            CheckState::Failed => failed = true,
            CheckState::Unknown => unknown = true,
            CheckState::Passed => {}
        }
    }
    match (any, failed, unknown) {
        (false, _, _) => CheckState::Unknown,
        (_, true, _) => CheckState::Failed,
        (_, _, true) => CheckState::Unknown,
        _ => CheckState::Passed,
    }
}

/// Synced labels with label events since the sync folded on top, sorted by name.
pub fn compute_labels(cs: &Changeset, events: &[ChangesetEvent]) -> Vec<ChangesetLabel> {
    let mut labels: BTreeMap<String, ChangesetLabel> = cs
        .metadata
        .as_ref()
        .map(|m| {
            m.labels
                .iter()
                .map(|l| (l.name.clone(), l.clone()))
                .collect()
        })
        .unwrap_or_default();
    for ev in events_for(cs, events) {
        if !after_sync(cs, ev) {
            continue;
        }
        match &ev.payload {
            EventPayload::Labeled { label } => {
                labels.insert(label.name.clone(), label.clone());
            }
            EventPayload::Unlabeled { label } => {
                labels.remove(&label.name);
            }
            _ => {}
        }
    }
    labels.into_values().collect()
}

fn after_sync(cs: &Changeset, ev: &ChangesetEvent) -> bool {
    cs.synced_at.map(|t| ev.created_at >= t).unwrap_or(true)
}

/// Refresh the denormalized state fields of a published changeset.
pub fn set_derived_state(cs: &mut Changeset, events: &[ChangesetEvent]) {
    if !cs.is_published() {
        return;
    }
    if let Some(state) = compute_external_state(cs, events) {
        cs.external_state = Some(state);
    }
    cs.external_review_state = compute_review_state(cs, events);
    cs.external_check_state = compute_check_state(cs, events);
    cs.labels = compute_labels(cs, events);
}
