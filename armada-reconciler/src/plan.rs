//! What to do to a changeset, and how its queue state moves.
//!
//! [`determine_plan`] turns a claimed changeset plus its previous and current
//! spec into an ordered set of [`ReconcilerOperation`]s. [`transition`] is
//! the reconciler state machine; anything it does not list is illegal.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use armada_core::{
    Changeset, ChangesetSpec, ChangesetSpecDescription, Delta, ExternalState, PublicationState,
    PublishIntent, ReconcilerState,
};

/// One host-facing step. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilerOperation {
    Import,
    Push,
    Publish,
    PublishDraft,
    Update,
    Undraft,
    Close,
    Sync,
    Detach,
}

impl fmt::Display for ReconcilerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcilerOperation::Import => "import",
            ReconcilerOperation::Push => "push",
            ReconcilerOperation::Publish => "publish",
            ReconcilerOperation::PublishDraft => "publish-draft",
            ReconcilerOperation::Update => "update",
            ReconcilerOperation::Undraft => "undraft",
            ReconcilerOperation::Close => "close",
            ReconcilerOperation::Sync => "sync",
            ReconcilerOperation::Detach => "detach",
        };
        f.write_str(s)
    }
}

/// What the stored flags and specs ask for, before looking at host state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Import,
    Publish(PublishIntent),
    Close,
    Detach,
    CloseAndDetach,
    /// Tracked changeset that only needs a refresh.
    Refresh,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub ops: BTreeSet<ReconcilerOperation>,
    pub delta: Delta,
}

impl Plan {
    pub fn contains(&self, op: ReconcilerOperation) -> bool {
        self.ops.contains(&op)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> Vec<ReconcilerOperation> {
        self.ops.iter().copied().collect()
    }
}

/// Derive the requested action from flags and specs.
pub fn requested_action(cs: &Changeset, current: Option<&ChangesetSpec>) -> Action {
    match (cs.closing, cs.detaching) {
        (true, true) => return Action::CloseAndDetach,
        (true, false) => return Action::Close,
        (false, true) => return Action::Detach,
        (false, false) => {}
    }
    match current.map(|s| &s.description) {
        Some(ChangesetSpecDescription::Branch(branch)) => Action::Publish(branch.published),
        Some(ChangesetSpecDescription::Existing { .. }) | None
            if cs.external_id.is_some() && cs.metadata.is_none() =>
        {
            Action::Import
        }
        _ => Action::Refresh,
    }
}

/// Build the plan for a claimed changeset.
pub fn determine_plan(
    cs: &Changeset,
    previous: Option<&ChangesetSpec>,
    current: Option<&ChangesetSpec>,
) -> Plan {
    let action = requested_action(cs, current);
    let delta = match (
        previous.and_then(ChangesetSpec::branch),
        current.and_then(ChangesetSpec::branch),
    ) {
        (Some(old), Some(new)) => Delta::between(old, new),
        (None, Some(_)) => Delta::all(),
        _ => Delta::default(),
    };
    let ops = dispatch(cs.publication_state, action, &delta, cs.external_state)
        .into_iter()
        .collect();
    Plan { ops, delta }
}

/// Dispatch table keyed by publication state and requested action.
fn dispatch(
    state: PublicationState,
    action: Action,
    delta: &Delta,
    external: Option<ExternalState>,
) -> Vec<ReconcilerOperation> {
    use ReconcilerOperation::*;

    match (state, action) {
        (_, Action::Import) => vec![Import, Sync],
        (PublicationState::Unpublished, Action::Refresh) => vec![],
        (PublicationState::Published, Action::Refresh) => vec![Sync],

        (PublicationState::Unpublished, Action::Publish(PublishIntent::Unpublished)) => vec![],
        (PublicationState::Unpublished, Action::Publish(PublishIntent::Published)) => {
            vec![Push, Publish, Sync]
        }
        (PublicationState::Unpublished, Action::Publish(PublishIntent::Draft)) => {
            vec![Push, PublishDraft, Sync]
        }
        (PublicationState::Published, Action::Publish(intent)) => {
            published_update(intent, delta, external)
        }

        (PublicationState::Unpublished, Action::Close) => vec![],
        (PublicationState::Published, Action::Close) => vec![Close, Sync],
        (PublicationState::Unpublished, Action::Detach | Action::CloseAndDetach) => vec![Detach],
        (PublicationState::Published, Action::Detach) => vec![Detach],
        (PublicationState::Published, Action::CloseAndDetach) => vec![Close, Sync, Detach],
    }
}

/// Published changesets cannot be unpublished; anything else follows the delta.
fn published_update(
    intent: PublishIntent,
    delta: &Delta,
    external: Option<ExternalState>,
) -> Vec<ReconcilerOperation> {
    use ReconcilerOperation::*;

    let mut ops = Vec::new();
    if delta.needs_push() {
        ops.push(Push);
    }
    if delta.needs_update() {
        ops.push(Update);
    }
    if intent == PublishIntent::Published && external == Some(ExternalState::Draft) {
        ops.push(Undraft);
    }
    if !ops.is_empty() {
        ops.push(Sync);
    }
    ops
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Inputs to the reconciler state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Claimed,
    Succeeded,
    RetryableFailure,
    /// Checked after a retryable failure; `attempts` counts that one.
    AttemptsExhausted { attempts: u32, max_attempts: u32 },
    TerminalFailure,
    Cancelled,
    BackoffElapsed,
    UserRetry,
}

/// Next state, or `None` if `trigger` is illegal in `from`.
pub fn transition(from: ReconcilerState, trigger: Trigger) -> Option<ReconcilerState> {
    use ReconcilerState::*;

    match (from, trigger) {
        (Queued, Trigger::Claimed) => Some(Processing),
        (Processing, Trigger::Succeeded) => Some(Completed),
        (Processing, Trigger::RetryableFailure) => Some(Errored),
        (
            Errored,
            Trigger::AttemptsExhausted {
                attempts,
                max_attempts,
            },
        ) if attempts >= max_attempts => Some(Failed),
        (Processing, Trigger::TerminalFailure) => Some(Failed),
        (Processing, Trigger::Cancelled) => Some(Errored),
        (Errored, Trigger::BackoffElapsed) => Some(Queued),
        (Failed, Trigger::UserRetry) => Some(Queued),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_core::{
        types::{BranchDescription, GitCommitDescription, RemoteChangeset},
        CampaignSpecId, ChangesetSpecId, DiffStat, Repo, RepoId, UserId,
    };
    use chrono::Utc;
    use rstest::rstest;
    use std::collections::BTreeMap;

    use ReconcilerOperation::*;

    fn changeset(state: PublicationState) -> Changeset {
        let repo = Repo {
            id: RepoId(1),
            name: "github.com/acme/api".into(),
            external_service_type: "github".into(),
            archived: false,
        };
        let mut cs = Changeset::new(&repo, Utc::now());
        cs.publication_state = state;
        if state == PublicationState::Published {
            cs.external_id = Some("7".into());
            cs.external_state = Some(ExternalState::Open);
        }
        cs
    }

    fn spec(title: &str, diff: &str, published: PublishIntent) -> ChangesetSpec {
        ChangesetSpec {
            id: ChangesetSpecId::random(),
            campaign_spec_id: CampaignSpecId::from("c"),
            repo_id: RepoId(1),
            user_id: UserId(1),
            description: ChangesetSpecDescription::Branch(BranchDescription {
                base_ref: "refs/heads/main".into(),
                base_rev: "abc".into(),
                head_ref: "refs/heads/fix".into(),
                title: title.into(),
                body: String::new(),
                commits: vec![GitCommitDescription {
                    message: "fix".into(),
                    diff: diff.into(),
                    author_name: "a".into(),
                    author_email: "a@example.com".into(),
                }],
                published,
            }),
            diff_stat: DiffStat::default(),
            created_at: Utc::now(),
        }
    }

    #[rstest]
    #[case(PublishIntent::Unpublished, vec![])]
    #[case(PublishIntent::Published, vec![Push, Publish, Sync])]
    #[case(PublishIntent::Draft, vec![Push, PublishDraft, Sync])]
    fn first_publication(#[case] intent: PublishIntent, #[case] expected: Vec<ReconcilerOperation>) {
        let cs = changeset(PublicationState::Unpublished);
        let plan = determine_plan(&cs, None, Some(&spec("Fix", "d", intent)));
        assert_eq!(plan.ops(), expected);
    }

    #[test]
    fn title_change_updates_without_push() {
        let cs = changeset(PublicationState::Published);
        let old = spec("Fix", "d", PublishIntent::Published);
        let new = spec("Fix it", "d", PublishIntent::Published);
        assert_eq!(determine_plan(&cs, Some(&old), Some(&new)).ops(), vec![Update, Sync]);
    }

    #[test]
    fn diff_change_pushes_before_update() {
        let cs = changeset(PublicationState::Published);
        let old = spec("Fix", "d1", PublishIntent::Published);
        let new = spec("Fix it", "d2", PublishIntent::Published);
        assert_eq!(
            determine_plan(&cs, Some(&old), Some(&new)).ops(),
            vec![Push, Update, Sync]
        );
    }

    #[test]
    fn draft_to_published_undrafts() {
        let mut cs = changeset(PublicationState::Published);
        cs.external_state = Some(ExternalState::Draft);
        let old = spec("Fix", "d", PublishIntent::Draft);
        let new = spec("Fix", "d", PublishIntent::Published);
        assert_eq!(determine_plan(&cs, Some(&old), Some(&new)).ops(), vec![Undraft, Sync]);
    }

    #[test]
    fn published_cannot_be_unpublished() {
        let cs = changeset(PublicationState::Published);
        let old = spec("Fix", "d", PublishIntent::Published);
        let new = spec("Fix", "d", PublishIntent::Unpublished);
        assert!(determine_plan(&cs, Some(&old), Some(&new)).is_empty());
    }

    #[rstest]
    #[case(PublicationState::Published, true, true, vec![Close, Sync, Detach])]
    #[case(PublicationState::Published, false, true, vec![Detach])]
    #[case(PublicationState::Published, true, false, vec![Close, Sync])]
    #[case(PublicationState::Unpublished, false, true, vec![Detach])]
    #[case(PublicationState::Unpublished, true, false, vec![])]
    fn close_and_detach_flags(
        #[case] state: PublicationState,
        #[case] closing: bool,
        #[case] detaching: bool,
        #[case] expected: Vec<ReconcilerOperation>,
    ) {
        let mut cs = changeset(state);
        cs.closing = closing;
        cs.detaching = detaching;
        let current = spec("Fix", "d", PublishIntent::Published);
        assert_eq!(determine_plan(&cs, Some(&current), Some(&current)).ops(), expected);
    }

    #[test]
    fn imports_until_metadata_is_loaded() {
        let mut cs = changeset(PublicationState::Published);
        let mut import = spec("x", "d", PublishIntent::Published);
        import.description = ChangesetSpecDescription::Existing {
            external_id: "7".into(),
        };
        assert_eq!(determine_plan(&cs, None, Some(&import)).ops(), vec![Import, Sync]);

        cs.metadata = Some(RemoteChangeset {
            external_id: "7".into(),
            title: "x".into(),
            body: String::new(),
            base_ref: "refs/heads/main".into(),
            head_ref: "refs/heads/x".into(),
            state: ExternalState::Open,
            labels: Vec::new(),
            checks: BTreeMap::new(),
            updated_at: Utc::now(),
        });
        assert_eq!(determine_plan(&cs, None, Some(&import)).ops(), vec![Sync]);
    }

    #[test]
    fn execution_order_is_declaration_order() {
        let ops: BTreeSet<ReconcilerOperation> = [Detach, Sync, Push, Import, Close].into();
        assert_eq!(ops.into_iter().collect::<Vec<_>>(), vec![Import, Push, Close, Sync, Detach]);
    }

    #[rstest]
    #[case(ReconcilerState::Queued, Trigger::Claimed, Some(ReconcilerState::Processing))]
    #[case(ReconcilerState::Processing, Trigger::Succeeded, Some(ReconcilerState::Completed))]
    #[case(ReconcilerState::Processing, Trigger::RetryableFailure, Some(ReconcilerState::Errored))]
    #[case(
        ReconcilerState::Errored,
        Trigger::AttemptsExhausted { attempts: 3, max_attempts: 3 },
        Some(ReconcilerState::Failed)
    )]
    #[case(
        ReconcilerState::Errored,
        Trigger::AttemptsExhausted { attempts: 1, max_attempts: 3 },
        None
    )]
    #[case(
        ReconcilerState::Processing,
        Trigger::AttemptsExhausted { attempts: 3, max_attempts: 3 },
        None
    )]
    #[case(ReconcilerState::Processing, Trigger::TerminalFailure, Some(ReconcilerState::Failed))]
    #[case(ReconcilerState::Processing, Trigger::Cancelled, Some(ReconcilerState::Errored))]
    #[case(ReconcilerState::Errored, Trigger::BackoffElapsed, Some(ReconcilerState::Queued))]
    #[case(ReconcilerState::Failed, Trigger::UserRetry, Some(ReconcilerState::Queued))]
    #[case(ReconcilerState::Failed, Trigger::BackoffElapsed, None)]
    #[case(ReconcilerState::Completed, Trigger::UserRetry, None)]
    #[case(ReconcilerState::Queued, Trigger::Succeeded, None)]
    fn state_machine(
        #[case] from: ReconcilerState,
        #[case] trigger: Trigger,
        #[case] expected: Option<ReconcilerState>,
    ) {
        assert_eq!(transition(from, trigger), expected);
    }
}
