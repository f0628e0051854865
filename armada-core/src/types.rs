//! Domain types for campaigns, specs, changesets and changeset events.
//!
//! Specs are write-once: a campaign evolves by creating a new
//! [`CampaignSpec`] and applying it, never by editing an old one.
//! [`Changeset`] is the single mutable record per pull request.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use armada_diff::DiffStat;

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

numeric_id!(
    /// Sequential campaign identifier.
    CampaignId
);
numeric_id!(
    /// Sequential changeset identifier.
    ChangesetId
);
numeric_id!(RepoId);
numeric_id!(UserId);
numeric_id!(OrgId);

macro_rules! random_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// A fresh random identifier; never sequential, never guessable.
            pub fn random() -> Self {
                Self(uuid::Uuid::new_v4().simple().to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

random_id!(
    /// Random identifier of an immutable campaign spec.
    CampaignSpecId
);
random_id!(
    /// Random identifier of an immutable changeset spec.
    ChangesetSpecId
);

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Whether a changeset exists on the code host yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublicationState {
    #[default]
    Unpublished,
    Published,
}

/// Reconciler queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilerState {
    #[default]
    Queued,
    Processing,
    Errored,
    Failed,
    Completed,
}

impl fmt::Display for ReconcilerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcilerState::Queued => "queued",
            ReconcilerState::Processing => "processing",
            ReconcilerState::Errored => "errored",
            ReconcilerState::Failed => "failed",
            ReconcilerState::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl fmt::Display for PublicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicationState::Unpublished => f.write_str("unpublished"),
            PublicationState::Published => f.write_str("published"),
        }
    }
}

/// Lifecycle state as reported by the code host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExternalState {
    Draft,
    #[default]
    Open,
    Closed,
    Merged,
    Deleted,
}

impl fmt::Display for ExternalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExternalState::Draft => "draft",
            ExternalState::Open => "open",
            ExternalState::Closed => "closed",
            ExternalState::Merged => "merged",
            ExternalState::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Aggregated review state of a changeset, or one review's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    #[default]
    Pending,
    Commented,
    Dismissed,
}

/// Aggregated CI check state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    #[default]
    Unknown,
    Pending,
    Passed,
    Failed,
}

/// Publication intent of a changeset spec: `true`, `false` or `"draft"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "PublishedRaw", into = "PublishedRaw")]
pub enum PublishIntent {
    #[default]
    Unpublished,
    Published,
    Draft,
}

impl PublishIntent {
    pub fn is_published(self) -> bool {
        matches!(self, PublishIntent::Published)
    }

    pub fn is_draft(self) -> bool {
        matches!(self, PublishIntent::Draft)
    }
}

impl fmt::Display for PublishIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishIntent::Unpublished => f.write_str("false"),
            PublishIntent::Published => f.write_str("true"),
            PublishIntent::Draft => f.write_str("draft"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PublishedRaw {
    Bool(bool),
    Text(String),
}

impl TryFrom<PublishedRaw> for PublishIntent {
    type Error = String;

    fn try_from(raw: PublishedRaw) -> Result<Self, Self::Error> {
        match raw {
            PublishedRaw::Bool(true) => Ok(PublishIntent::Published),
            PublishedRaw::Bool(false) => Ok(PublishIntent::Unpublished),
            PublishedRaw::Text(s) if s == "draft" => Ok(PublishIntent::Draft),
            PublishedRaw::Text(s) => Err(format!(
                "invalid published value '{s}'; expected true, false or \"draft\""
            )),
        }
    }
}

impl From<PublishIntent> for PublishedRaw {
    fn from(p: PublishIntent) -> Self {
        match p {
            PublishIntent::Unpublished => PublishedRaw::Bool(false),
            PublishIntent::Published => PublishedRaw::Bool(true),
            PublishIntent::Draft => PublishedRaw::Text("draft".to_string()),
        }
    }
}

/// Owner of a campaign: exactly one of a user or an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    User(UserId),
    Org(OrgId),
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::User(id) => write!(f, "user/{id}"),
            Namespace::Org(id) => write!(f, "org/{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Campaign specs and changeset templates
// ---------------------------------------------------------------------------

/// Unapplied campaign specs expire after this long.
pub const CAMPAIGN_SPEC_TTL_DAYS: i64 = 7;
/// Changeset specs not attached to an applied campaign spec expire after this long.
pub const CHANGESET_SPEC_TTL_DAYS: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CommitTemplate {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<CommitAuthor>,
}

/// Either one value for every repository, or ordered `pattern: value` rules
/// matched against the repository name (last match wins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PublishedRule {
    Static(PublishIntent),
    PerRepository(Vec<BTreeMap<String, PublishIntent>>),
}

impl Default for PublishedRule {
    fn default() -> Self {
        PublishedRule::Static(PublishIntent::Unpublished)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChangesetTemplate {
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub branch: String,
    pub commit: CommitTemplate,
    #[serde(default)]
    pub published: PublishedRule,
}

/// The parsed fields of a campaign spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CampaignSpecFields {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changeset_template: Option<ChangesetTemplate>,
}

/// Immutable, randomly identified input to one `apply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSpec {
    pub id: CampaignSpecId,
    /// The document as the user wrote it, preserved verbatim.
    pub raw_spec: String,
    pub spec: CampaignSpecFields,
    pub namespace: Namespace,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl CampaignSpec {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::days(CAMPAIGN_SPEC_TTL_DAYS)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let name = self.spec.name.as_str();
        if name.is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        let valid = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !valid {
            return Err(ValidationError::InvalidName(name.to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Changeset specs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCommitDescription {
    pub message: String,
    pub diff: String,
    pub author_name: String,
    pub author_email: String,
}

/// A changeset the campaign creates from a branch it pushes itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDescription {
    pub base_ref: String,
    #[serde(default)]
    pub base_rev: String,
    pub head_ref: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub commits: Vec<GitCommitDescription>,
    #[serde(default)]
    pub published: PublishIntent,
}

impl BranchDescription {
    pub fn commit(&self) -> Option<&GitCommitDescription> {
        self.commits.first()
    }
}

/// What a changeset spec asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangesetSpecDescription {
    /// Track a changeset that already exists on the code host.
    Existing { external_id: String },
    Branch(BranchDescription),
}

/// Immutable, randomly identified description of one desired changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetSpec {
    pub id: ChangesetSpecId,
    pub campaign_spec_id: CampaignSpecId,
    pub repo_id: RepoId,
    pub user_id: UserId,
    pub description: ChangesetSpecDescription,
    #[serde(default)]
    pub diff_stat: DiffStat,
    pub created_at: DateTime<Utc>,
}

impl ChangesetSpec {
    pub fn branch(&self) -> Option<&BranchDescription> {
        match &self.description {
            ChangesetSpecDescription::Branch(b) => Some(b),
            ChangesetSpecDescription::Existing { .. } => None,
        }
    }

    pub fn is_import(&self) -> bool {
        matches!(self.description, ChangesetSpecDescription::Existing { .. })
    }

    pub fn head_ref(&self) -> Option<&str> {
        self.branch().map(|b| b.head_ref.as_str())
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::days(CHANGESET_SPEC_TTL_DAYS)
    }

    /// Check structural requirements and compute [`Self::diff_stat`].
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        let branch = match &self.description {
            ChangesetSpecDescription::Existing { external_id } => {
                if external_id.trim().is_empty() {
                    return Err(ValidationError::MissingField("external_id"));
                }
                return Ok(());
            }
            ChangesetSpecDescription::Branch(b) => b,
        };

        if branch.head_ref.trim().is_empty() {
            return Err(ValidationError::MissingField("head_ref"));
        }
        if branch.base_ref.trim().is_empty() {
            return Err(ValidationError::MissingField("base_ref"));
        }
        if branch.title.trim().is_empty() {
            return Err(ValidationError::MissingField("title"));
        }
        let commit = match branch.commits.as_slice() {
            [] => return Err(ValidationError::NoCommits),
            [one] => one,
            _ => return Err(ValidationError::MultipleCommits),
        };

        let files = armada_diff::parse_multi_file_diff(&commit.diff)?;
        self.diff_stat = armada_diff::parse::total_stat(&files);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub id: RepoId,
    pub name: String,
    pub external_service_type: String,
    #[serde(default)]
    pub archived: bool,
}

// ---------------------------------------------------------------------------
// Campaigns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub namespace: Namespace,
    pub campaign_spec_id: CampaignSpecId,
    pub initial_applier_id: UserId,
    pub last_applier_id: UserId,
    pub last_applied_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// Changesets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangesetLabel {
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub description: String,
}

impl ChangesetLabel {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            color: String::new(),
            description: String::new(),
        }
    }
}

/// Snapshot of a changeset as returned by the code host on the last full
/// sync (or on create/update).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChangeset {
    pub external_id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub base_ref: String,
    pub head_ref: String,
    pub state: ExternalState,
    #[serde(default)]
    pub labels: Vec<ChangesetLabel>,
    /// Check context name to its last reported state.
    #[serde(default)]
    pub checks: BTreeMap<String, CheckState>,
    pub updated_at: DateTime<Utc>,
}

/// The durable, mutable record of one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub id: ChangesetId,
    pub repo_id: RepoId,
    pub external_service_type: String,
    /// Set iff `publication_state` is `Published`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_branch: Option<String>,
    #[serde(default)]
    pub campaign_ids: BTreeSet<CampaignId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned_by_campaign_id: Option<CampaignId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_spec_id: Option<ChangesetSpecId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_spec_id: Option<ChangesetSpecId>,
    pub publication_state: PublicationState,
    pub reconciler_state: ReconcilerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_state: Option<ExternalState>,
    #[serde(default)]
    pub external_review_state: ReviewState,
    #[serde(default)]
    pub external_check_state: CheckState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub num_failures: u32,
    /// Earliest time the reconciler may pick this changeset up again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_after: Option<DateTime<Utc>>,
    /// Close the changeset on the code host on next reconcile.
    #[serde(default)]
    pub closing: bool,
    /// Unlink from the owning campaign on next reconcile.
    #[serde(default)]
    pub detaching: bool,
    #[serde(default)]
    pub diff_stat: DiffStat,
    #[serde(default)]
    pub labels: Vec<ChangesetLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RemoteChangeset>,
    /// Time of the last full sync with the code host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    /// Sync should happen soon regardless of observed activity.
    #[serde(default)]
    pub sync_requested: bool,
    /// Spec changed while a worker held the claim; queue again once the
    /// attempt is recorded.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requeue_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Changeset {
    /// A fresh unpublished, queued changeset in `repo`.
    pub fn new(repo: &Repo, now: DateTime<Utc>) -> Self {
        Self {
            id: ChangesetId::default(),
            repo_id: repo.id,
            external_service_type: repo.external_service_type.clone(),
            external_id: None,
            external_branch: None,
            campaign_ids: BTreeSet::new(),
            owned_by_campaign_id: None,
            current_spec_id: None,
            previous_spec_id: None,
            publication_state: PublicationState::Unpublished,
            reconciler_state: ReconcilerState::Queued,
            external_state: None,
            external_review_state: ReviewState::Pending,
            external_check_state: CheckState::Unknown,
            failure_message: None,
            num_failures: 0,
            process_after: None,
            closing: false,
            detaching: false,
            diff_stat: DiffStat::default(),
            labels: Vec::new(),
            metadata: None,
            synced_at: None,
            sync_requested: false,
            requeue_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_published(&self) -> bool {
        self.publication_state == PublicationState::Published
    }

    /// Tracked changesets were imported, not created by a campaign.
    pub fn is_tracked(&self) -> bool {
        self.owned_by_campaign_id.is_none()
    }

    pub fn is_owned_by(&self, campaign: CampaignId) -> bool {
        self.owned_by_campaign_id == Some(campaign)
    }

    /// Put the changeset back on the reconciler queue with a clean slate.
    /// A changeset a worker is processing is only flagged; the store queues
    /// it again when that attempt is recorded.
    pub fn enqueue(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        if self.reconciler_state == ReconcilerState::Processing {
            self.requeue_requested = true;
            return;
        }
        self.reconciler_state = ReconcilerState::Queued;
        self.requeue_requested = false;
        self.failure_message = None;
        self.num_failures = 0;
        self.process_after = None;
    }

    /// Copy what the reconciler learns from the queue and the code host.
    pub fn take_reconciler_fields(&mut self, from: &Changeset) {
        self.reconciler_state = from.reconciler_state;
        self.failure_message = from.failure_message.clone();
        self.num_failures = from.num_failures;
        self.process_after = from.process_after;
        self.publication_state = from.publication_state;
        self.external_id = from.external_id.clone();
        self.external_branch = from.external_branch.clone();
        self.external_state = from.external_state;
        self.external_review_state = from.external_review_state;
        self.external_check_state = from.external_check_state;
        self.labels = from.labels.clone();
        self.metadata = from.metadata.clone();
        self.synced_at = from.synced_at;
    }

    /// Three-way merge of the fields campaign operations own: whatever
    /// `theirs` changed relative to `base` wins over `self`.
    pub fn rebase_apply_fields(&mut self, base: &Changeset, theirs: &Changeset) {
        for id in theirs.campaign_ids.difference(&base.campaign_ids) {
            self.campaign_ids.insert(*id);
        }
        for id in base.campaign_ids.difference(&theirs.campaign_ids) {
            self.campaign_ids.remove(id);
        }
        if theirs.owned_by_campaign_id != base.owned_by_campaign_id {
            self.owned_by_campaign_id = theirs.owned_by_campaign_id;
        }
        if theirs.current_spec_id != base.current_spec_id {
            self.current_spec_id = theirs.current_spec_id.clone();
            self.previous_spec_id = theirs.previous_spec_id.clone();
            self.diff_stat = theirs.diff_stat;
        }
        if theirs.closing != base.closing {
            self.closing = theirs.closing;
        }
        if theirs.detaching != base.detaching {
            self.detaching = theirs.detaching;
        }
        if theirs.sync_requested && !base.sync_requested {
            self.sync_requested = true;
        }
        self.requeue_requested = theirs.requeue_requested;
    }

    /// Attach to `campaign`; returns false if it was already attached.
    pub fn attach(&mut self, campaign: CampaignId) -> bool {
        self.campaign_ids.insert(campaign)
    }

    pub fn detach(&mut self, campaign: CampaignId) -> bool {
        self.campaign_ids.remove(&campaign)
    }
}

// ---------------------------------------------------------------------------
// Changeset events
// ---------------------------------------------------------------------------

/// Typed payload of a code-host event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Reviewed { author: String, state: ReviewState },
    ReviewDismissed { author: String },
    Labeled { label: ChangesetLabel },
    Unlabeled { label: ChangesetLabel },
    CheckStatus { context: String, state: CheckState },
    Commented { author: String },
    CommitPushed { sha: String },
    Closed,
    Reopened,
    Merged,
    Deleted,
    ConvertedToDraft,
    ReadyForReview,
}

impl EventPayload {
    /// Stable kind tag, part of the event's natural key.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Reviewed { .. } => "reviewed",
            EventPayload::ReviewDismissed { .. } => "review_dismissed",
            EventPayload::Labeled { .. } => "labeled",
            EventPayload::Unlabeled { .. } => "unlabeled",
            EventPayload::CheckStatus { .. } => "check_status",
            EventPayload::Commented { .. } => "commented",
            EventPayload::CommitPushed { .. } => "commit_pushed",
            EventPayload::Closed => "closed",
            EventPayload::Reopened => "reopened",
            EventPayload::Merged => "merged",
            EventPayload::Deleted => "deleted",
            EventPayload::ConvertedToDraft => "converted_to_draft",
            EventPayload::ReadyForReview => "ready_for_review",
        }
    }
}

/// Append-only record of something that happened to a changeset on its host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetEvent {
    pub changeset_id: ChangesetId,
    /// Remote event identifier, unique per changeset and kind.
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub payload: EventPayload,
}

/// `(changeset, kind, remote key)`: identity for idempotent upserts.
pub type EventKey = (ChangesetId, &'static str, String);

impl ChangesetEvent {
    pub fn natural_key(&self) -> EventKey {
        (self.changeset_id, self.payload.kind(), self.key.clone())
    }
}

// ---------------------------------------------------------------------------
// Sync bookkeeping
// ---------------------------------------------------------------------------

/// What the sync scheduler knows about one changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncData {
    pub changeset_id: ChangesetId,
    /// Last full sync; `None` when never synced.
    pub synced_at: Option<DateTime<Utc>>,
    /// Update time reported by the code host at the last sync.
    pub external_updated_at: Option<DateTime<Utc>>,
    /// Newest event recorded for the changeset.
    pub latest_event_at: Option<DateTime<Utc>>,
    /// Newly published or manually requeued.
    pub priority: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
