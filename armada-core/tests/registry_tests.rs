//! State file error-message, atomic-write and snapshot round-trip tests.
//! Storage: ~/.armada/state.yaml

use std::collections::BTreeMap;
use std::fs;

use armada_core::{
    registry,
    store::{MemoryStore, Store},
    types::{
        BranchDescription, Campaign, CampaignSpec, CampaignSpecFields, ChangesetLabel,
        GitCommitDescription, RemoteChangeset,
    },
    CampaignId, CampaignSpecId, Changeset, ChangesetEvent, ChangesetSpec,
    ChangesetSpecDescription, ChangesetSpecId, CheckState, DiffStat, EventPayload, ExternalState,
    Namespace, PublicationState, PublishIntent, Repo, RepoId, ReviewState, StoreError, UserId,
};
use assert_fs::prelude::*;
use chrono::Utc;
use predicates::prelude::predicate;

fn repo() -> Repo {
    Repo {
        id: RepoId(1),
        name: "github.com/acme/api".into(),
        external_service_type: "github".into(),
        archived: false,
    }
}

fn populated_store() -> MemoryStore {
    let now = Utc::now();
    let store = MemoryStore::new();
    store.add_repo(repo()).expect("repo");

    let spec = CampaignSpec {
        id: CampaignSpecId::random(),
        raw_spec: "name: bump-deps\n".into(),
        spec: CampaignSpecFields {
            name: "bump-deps".into(),
            description: "Bump dependencies".into(),
            changeset_template: None,
        },
        namespace: Namespace::User(UserId(1)),
        user_id: UserId(1),
        created_at: now,
    };
    store.create_campaign_spec(&spec).expect("campaign spec");

    let cs_spec = ChangesetSpec {
        id: ChangesetSpecId::random(),
        campaign_spec_id: spec.id.clone(),
        repo_id: RepoId(1),
        user_id: UserId(1),
        description: ChangesetSpecDescription::Branch(BranchDescription {
            base_ref: "refs/heads/main".into(),
            base_rev: "d34db33f".into(),
            head_ref: "refs/heads/bump-deps".into(),
            title: "Bump deps".into(),
            body: "Automated".into(),
            commits: vec![GitCommitDescription {
                message: "bump".into(),
                diff: "--- a/go.mod\n+++ b/go.mod\n@@ -1 +1 @@\n-a\n+b\n".into(),
                author_name: "bot".into(),
                author_email: "bot@example.com".into(),
            }],
            published: PublishIntent::Draft,
        }),
        diff_stat: DiffStat {
            added: 0,
            changed: 1,
            deleted: 0,
        },
        created_at: now,
    };
    store.create_changeset_spec(&cs_spec).expect("changeset spec");

    let campaign = store
        .create_campaign(Campaign {
            id: CampaignId::default(),
            name: "bump-deps".into(),
            description: String::new(),
            namespace: Namespace::User(UserId(1)),
            campaign_spec_id: spec.id.clone(),
            initial_applier_id: UserId(1),
            last_applier_id: UserId(1),
            last_applied_at: now,
            created_at: now,
            updated_at: now,
            closed_at: None,
        })
        .expect("campaign");

    let mut cs = Changeset::new(&repo(), now);
    cs.attach(campaign.id);
    cs.owned_by_campaign_id = Some(campaign.id);
    cs.current_spec_id = Some(cs_spec.id.clone());
    cs.publication_state = PublicationState::Published;
    cs.external_id = Some("42".into());
    cs.external_state = Some(ExternalState::Draft);
    cs.labels = vec![ChangesetLabel::named("deps")];
    cs.metadata = Some(RemoteChangeset {
        external_id: "42".into(),
        title: "Bump deps".into(),
        body: "Automated".into(),
        base_ref: "refs/heads/main".into(),
        head_ref: "refs/heads/bump-deps".into(),
        state: ExternalState::Draft,
        labels: vec![ChangesetLabel::named("deps")],
        checks: BTreeMap::from([("ci".to_string(), CheckState::Passed)]),
        updated_at: now,
    });
    let cs = store.create_changeset(cs).expect("changeset");

    store
        .upsert_changeset_events(&[ChangesetEvent {
            changeset_id: cs.id,
            key: "review-1".into(),
            created_at: now,
            payload: EventPayload::Reviewed {
                author: "alice".into(),
                state: ReviewState::Approved,
            },
        }])
        .expect("events");
    store
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".armada/state.yaml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = registry::load_at(home.path()).unwrap_err();
    assert!(matches!(err, StoreError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("state.yaml"));
}

#[test]
fn load_wrong_type_yaml_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".armada/state.yaml")
        .write_str("- this is a list, not a mapping\n")
        .expect("write");

    let err = registry::load_at(home.path()).unwrap_err();
    assert!(matches!(err, StoreError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write + round trip
// ---------------------------------------------------------------------------

#[test]
fn save_creates_state_file_without_tmp() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let snapshot = populated_store().snapshot().expect("snapshot");
    registry::save_at(home.path(), &snapshot).expect("save");

    home.child(".armada/state.yaml")
        .assert(predicate::path::exists());
    home.child(".armada/state.yaml.tmp")
        .assert(predicate::path::missing());
}

#[test]
fn snapshot_roundtrips_through_state_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let snapshot = populated_store().snapshot().expect("snapshot");
    registry::save_at(home.path(), &snapshot).expect("save");

    let loaded = registry::load_at(home.path()).expect("load");
    assert_eq!(loaded, snapshot);

    let raw = fs::read_to_string(registry::state_path_at(home.path())).expect("read");
    assert!(raw.contains("published: draft"));
    assert!(raw.contains("kind: reviewed"));
}

#[test]
fn reloaded_store_continues_id_sequence() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    registry::save_at(home.path(), &populated_store().snapshot().expect("snapshot"))
        .expect("save");

    let store = MemoryStore::from_snapshot(registry::load_at(home.path()).expect("load"));
    let next = store
        .create_changeset(Changeset::new(&repo(), Utc::now()))
        .expect("create");
    assert_eq!(next.id.0, 2);
}
