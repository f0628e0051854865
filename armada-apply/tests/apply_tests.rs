//! Apply, preview, close, delete and retry against a MemoryStore.

use chrono::Utc;

use armada_apply::{Actor, CampaignService, ChangesetSpecView, ChangesetView, Operation, RepoPatch};
use armada_core::{
    store::{ChangesetFilter, MemoryStore, RestrictedRepos, Store},
    types::{
        BranchDescription, CampaignSpecFields, ChangesetTemplate, CommitTemplate,
        GitCommitDescription, PublishedRule,
    },
    CampaignSpec, Changeset, ChangesetSpecDescription, ExternalState, Namespace,
    PublicationState, PublishIntent, ReconcilerState, Repo, RepoId, UserId,
};

fn repo(id: i64) -> Repo {
    Repo {
        id: RepoId(id),
        name: format!("github.com/acme/r{id}"),
        external_service_type: "github".into(),
        archived: false,
    }
}

fn store_with_repos(n: i64) -> MemoryStore {
    let store = MemoryStore::new();
    for id in 1..=n {
        store.add_repo(repo(id)).expect("repo");
    }
    store
}

fn branch(head: &str, title: &str, line: &str) -> ChangesetSpecDescription {
    ChangesetSpecDescription::Branch(BranchDescription {
        base_ref: "refs/heads/main".into(),
        base_rev: "d34db33f".into(),
        head_ref: format!("refs/heads/{head}"),
        title: title.into(),
        body: "Automated change".into(),
        commits: vec![GitCommitDescription {
            message: "bump".into(),
            diff: format!("--- a/go.mod\n+++ b/go.mod\n@@ -1 +1 @@\n-v1\n+{line}\n"),
            author_name: "bot".into(),
            author_email: "bot@example.com".into(),
        }],
        published: PublishIntent::Published,
    })
}

fn campaign_spec(svc: &CampaignService<'_>, actor: &Actor) -> CampaignSpec {
    svc.create_campaign_spec(
        actor,
        Namespace::User(actor.user_id),
        "name: bump-deps\n".into(),
        CampaignSpecFields {
            name: "bump-deps".into(),
            description: "Bump dependencies".into(),
            changeset_template: None,
        },
    )
    .expect("campaign spec")
}

fn owned_changesets(store: &MemoryStore) -> Vec<Changeset> {
    store
        .list_changesets(&ChangesetFilter::default())
        .expect("list")
}

#[test]
fn first_apply_attaches_every_spec_and_enqueues() {
    let store = store_with_repos(2);
    let svc = CampaignService::new(&store, &store);
    let alice = Actor::user(1);

    let spec = campaign_spec(&svc, &alice);
    for id in 1..=2 {
        svc.create_changeset_spec(&alice, &spec.id, RepoId(id), branch("bump", "Bump", "v2"))
            .expect("changeset spec");
    }

    let outcome = svc.apply_campaign(&alice, &spec.id, None).expect("apply");
    assert!(outcome.applied);
    assert!(outcome.mappings.iter().all(|m| m.operation == Operation::Attach));

    let changesets = owned_changesets(&store);
    assert_eq!(changesets.len(), 2);
    for cs in &changesets {
        assert!(cs.is_owned_by(outcome.campaign.id));
        assert_eq!(cs.reconciler_state, ReconcilerState::Queued);
        assert_eq!(cs.publication_state, PublicationState::Unpublished);
        assert_eq!(cs.diff_stat.changed, 1);
    }
}

#[test]
fn reapplying_same_spec_is_a_no_op() {
    let store = store_with_repos(1);
    let svc = CampaignService::new(&store, &store);
    let alice = Actor::user(1);
    let spec = campaign_spec(&svc, &alice);
    svc.create_changeset_spec(&alice, &spec.id, RepoId(1), branch("bump", "Bump", "v2"))
        .expect("changeset spec");

    let first = svc.apply_campaign(&alice, &spec.id, None).expect("apply");
    let second = svc
        .apply_campaign(&alice, &spec.id, Some(first.campaign.id))
        .expect("reapply");
    assert!(!second.applied);
    assert_eq!(owned_changesets(&store).len(), 1);
}

#[test]
fn attach_update_and_detach_in_one_apply() {
    let store = store_with_repos(3);
    let svc = CampaignService::new(&store, &store);
    let alice = Actor::user(1);

    // v1: repos 2 and 3.
    let v1 = campaign_spec(&svc, &alice);
    svc.create_changeset_spec(&alice, &v1.id, RepoId(2), branch("bump", "Bump", "v2"))
        .expect("spec");
    svc.create_changeset_spec(&alice, &v1.id, RepoId(3), branch("bump", "Bump", "v2"))
        .expect("spec");
    let applied = svc.apply_campaign(&alice, &v1.id, None).expect("apply v1");

    // Pretend the reconciler published repo 3's changeset.
    let mut published = owned_changesets(&store)
        .into_iter()
        .find(|c| c.repo_id == RepoId(3))
        .expect("repo 3");
    published.publication_state = PublicationState::Published;
    published.reconciler_state = ReconcilerState::Completed;
    published.external_state = Some(ExternalState::Open);
    store.update_changeset(&published).expect("update");

    // v2: repo 1 new, repo 2 changed title, repo 3 dropped.
    let v2 = campaign_spec(&svc, &alice);
    svc.create_changeset_spec(&alice, &v2.id, RepoId(1), branch("bump", "Bump", "v2"))
        .expect("spec");
    svc.create_changeset_spec(&alice, &v2.id, RepoId(2), branch("bump", "Bump deps", "v2"))
        .expect("spec");

    let preview = svc.preview_apply(&alice, &v2.id).expect("preview");
    assert_eq!(preview, svc.preview_apply(&alice, &v2.id).expect("preview again"));

    let ops: Vec<(i64, Operation)> = preview
        .iter()
        .map(|m| (m.key.repo_id.0, m.operation))
        .collect();
    assert_eq!(
        ops,
        vec![
            (1, Operation::Attach),
            (2, Operation::Update),
            (3, Operation::Detach)
        ]
    );
    assert_eq!(preview[1].delta.changed_fields(), vec!["title"]);

    let outcome = svc
        .apply_campaign(&alice, &v2.id, Some(applied.campaign.id))
        .expect("apply v2");
    assert_eq!(outcome.mappings, preview);

    let by_repo = |id: i64| {
        owned_changesets(&store)
            .into_iter()
            .find(|c| c.repo_id == RepoId(id))
            .expect("changeset")
    };
    let detached = by_repo(3);
    assert!(detached.detaching && detached.closing);
    assert_eq!(detached.reconciler_state, ReconcilerState::Queued);

    let updated = by_repo(2);
    assert!(updated.previous_spec_id.is_some());
    assert_eq!(updated.reconciler_state, ReconcilerState::Queued);
}

#[test]
fn reapply_while_processing_defers_to_the_running_attempt() {
    let store = store_with_repos(1);
    let svc = CampaignService::new(&store, &store);
    let alice = Actor::user(1);

    let v1 = campaign_spec(&svc, &alice);
    svc.create_changeset_spec(&alice, &v1.id, RepoId(1), branch("bump", "Bump", "v2"))
        .expect("spec");
    let applied = svc.apply_campaign(&alice, &v1.id, None).expect("apply v1");
    let claimed = store
        .claim_next_queued(Utc::now())
        .expect("claim")
        .expect("queued changeset");

    let v2 = campaign_spec(&svc, &alice);
    svc.create_changeset_spec(&alice, &v2.id, RepoId(1), branch("bump", "Bump deps", "v2"))
        .expect("spec");
    svc.apply_campaign(&alice, &v2.id, Some(applied.campaign.id))
        .expect("apply v2");

    // Still held by the first worker; nobody else may claim it.
    assert!(store.claim_next_queued(Utc::now()).expect("claim").is_none());
    let during = store.get_changeset(claimed.id).expect("get");
    assert_eq!(during.reconciler_state, ReconcilerState::Processing);
    assert!(during.requeue_requested);
    assert_ne!(during.current_spec_id, claimed.current_spec_id);

    // The first worker finishes against v1.
    let mut attempt = claimed.clone();
    attempt.reconciler_state = ReconcilerState::Completed;
    attempt.publication_state = PublicationState::Published;
    attempt.external_id = Some("101".into());
    let recorded = store.record_attempt(&claimed, &attempt).expect("record");

    assert_eq!(recorded.reconciler_state, ReconcilerState::Queued);
    assert!(!recorded.requeue_requested);
    assert_eq!(recorded.current_spec_id, during.current_spec_id);
    assert_eq!(recorded.previous_spec_id, claimed.current_spec_id);
    assert_eq!(recorded.external_id.as_deref(), Some("101"));
    assert!(recorded.is_published());

    let next = store
        .claim_next_queued(Utc::now())
        .expect("claim")
        .expect("requeued changeset");
    assert_eq!(next.id, claimed.id);
}

#[test]
fn branch_owned_by_other_campaign_is_a_conflict() {
    let store = store_with_repos(1);
    let svc = CampaignService::new(&store, &store);
    let alice = Actor::user(1);

    let first = campaign_spec(&svc, &alice);
    svc.create_changeset_spec(&alice, &first.id, RepoId(1), branch("bump", "Bump", "v2"))
        .expect("spec");
    svc.apply_campaign(&alice, &first.id, None).expect("apply");

    let other = svc
        .create_campaign_spec(
            &alice,
            Namespace::User(UserId(1)),
            "name: other\n".into(),
            CampaignSpecFields {
                name: "other".into(),
                description: String::new(),
                changeset_template: None,
            },
        )
        .expect("spec");
    svc.create_changeset_spec(&alice, &other.id, RepoId(1), branch("bump", "Bump", "v3"))
        .expect("spec");

    let err = svc.apply_campaign(&alice, &other.id, None).unwrap_err();
    assert_eq!(err.code(), "ownership-conflict");
    assert!(!err.kind().is_retryable());
    assert_eq!(store.list_campaigns().expect("campaigns").len(), 1);
}

#[test]
fn import_tracks_existing_changeset_without_owning_it() {
    let store = store_with_repos(1);
    let svc = CampaignService::new(&store, &store);
    let alice = Actor::user(1);
    let spec = campaign_spec(&svc, &alice);
    svc.create_changeset_spec(
        &alice,
        &spec.id,
        RepoId(1),
        ChangesetSpecDescription::Existing {
            external_id: "1234".into(),
        },
    )
    .expect("spec");

    let outcome = svc.apply_campaign(&alice, &spec.id, None).expect("apply");
    let cs = owned_changesets(&store).pop().expect("changeset");
    assert!(cs.is_tracked());
    assert_eq!(cs.external_id.as_deref(), Some("1234"));
    assert_eq!(cs.publication_state, PublicationState::Published);

    // Dropping the import unlinks the changeset directly; nothing is closed.
    let empty = campaign_spec(&svc, &alice);
    svc.apply_campaign(&alice, &empty.id, Some(outcome.campaign.id))
        .expect("apply empty");
    let cs = store.get_changeset(cs.id).expect("get");
    assert!(cs.campaign_ids.is_empty());
    assert!(!cs.closing);
}

#[test]
fn only_spec_creator_or_admin_may_apply() {
    let store = store_with_repos(1);
    let svc = CampaignService::new(&store, &store);
    let spec = campaign_spec(&svc, &Actor::user(1));

    let err = svc.apply_campaign(&Actor::user(2), &spec.id, None).unwrap_err();
    assert_eq!(err.code(), "unauthorized");
    svc.apply_campaign(&Actor::admin(3), &spec.id, None)
        .expect("admin applies");
}

#[test]
fn retry_only_moves_failed_changesets() {
    let store = store_with_repos(1);
    let svc = CampaignService::new(&store, &store);
    let alice = Actor::user(1);
    let spec = campaign_spec(&svc, &alice);
    svc.create_changeset_spec(&alice, &spec.id, RepoId(1), branch("bump", "Bump", "v2"))
        .expect("spec");
    svc.apply_campaign(&alice, &spec.id, None).expect("apply");
    let mut cs = owned_changesets(&store).pop().expect("changeset");

    let err = svc.retry_changeset(&alice, cs.id).unwrap_err();
    assert_eq!(err.code(), "not-retryable");

    cs.reconciler_state = ReconcilerState::Failed;
    cs.num_failures = 5;
    cs.failure_message = Some("host unavailable".into());
    store.update_changeset(&cs).expect("update");

    let retried = svc.retry_changeset(&alice, cs.id).expect("retry");
    assert_eq!(retried.reconciler_state, ReconcilerState::Queued);
    assert_eq!(retried.num_failures, 0);
    assert!(retried.failure_message.is_none());
}

#[test]
fn close_then_delete_campaign() {
    let store = store_with_repos(2);
    let svc = CampaignService::new(&store, &store);
    let alice = Actor::user(1);
    let spec = campaign_spec(&svc, &alice);
    for id in 1..=2 {
        svc.create_changeset_spec(&alice, &spec.id, RepoId(id), branch("bump", "Bump", "v2"))
            .expect("spec");
    }
    let campaign = svc.apply_campaign(&alice, &spec.id, None).expect("apply").campaign;

    let mut published = owned_changesets(&store).remove(0);
    published.publication_state = PublicationState::Published;
    published.reconciler_state = ReconcilerState::Completed;
    published.external_state = Some(ExternalState::Open);
    store.update_changeset(&published).expect("update");

    let err = svc.delete_campaign(&alice, campaign.id).unwrap_err();
    assert_eq!(err.code(), "conflict");

    let closed = svc.close_campaign(&alice, campaign.id, true).expect("close");
    assert!(closed.is_closed());
    let cs = store.get_changeset(published.id).expect("get");
    assert!(cs.closing);
    assert_eq!(cs.reconciler_state, ReconcilerState::Queued);

    svc.delete_campaign(&alice, campaign.id).expect("delete");
    let left = owned_changesets(&store);
    assert_eq!(left.len(), 1, "unpublished changeset is deleted");
    assert!(left[0].campaign_ids.is_empty());
    assert!(left[0].owned_by_campaign_id.is_none());
}

#[test]
fn views_hide_inaccessible_repositories() {
    let store = store_with_repos(2);
    let alice = Actor::user(1);
    let svc = CampaignService::new(&store, &store);
    let spec = campaign_spec(&svc, &alice);
    for id in 1..=2 {
        svc.create_changeset_spec(&alice, &spec.id, RepoId(id), branch("bump", "Bump", "v2"))
            .expect("spec");
    }
    let campaign = svc.apply_campaign(&alice, &spec.id, None).expect("apply").campaign;

    let restricted = RestrictedRepos::new(&store, [RepoId(2)]);
    let limited = CampaignService::new(&store, &restricted);

    let views = limited.changeset_views(campaign.id).expect("views");
    assert_eq!(views.len(), 2);
    assert!(matches!(views[0], ChangesetView::Visible { .. }));
    assert!(matches!(views[1], ChangesetView::Hidden { .. }));

    let spec_views = limited.changeset_spec_views(&spec.id).expect("spec views");
    assert_eq!(spec_views.iter().filter(|v| v.is_hidden()).count(), 1);
    assert!(matches!(
        spec_views.iter().find(|v| v.is_hidden()),
        Some(ChangesetSpecView::Hidden { kind: "branch", .. })
    ));

    let stat = limited.campaign_diff_stat(campaign.id).expect("stat");
    assert_eq!(stat.changed, 1);
    assert_eq!(svc.campaign_diff_stat(campaign.id).expect("stat").changed, 2);
}

#[test]
fn template_expansion_creates_specs_per_repository() {
    let store = store_with_repos(2);
    let svc = CampaignService::new(&store, &store);
    let alice = Actor::user(1);
    let spec = svc
        .create_campaign_spec(
            &alice,
            Namespace::User(UserId(1)),
            "name: fmt\n".into(),
            CampaignSpecFields {
                name: "fmt".into(),
                description: "Format code".into(),
                changeset_template: Some(ChangesetTemplate {
                    title: "Format {{ repository.short_name }}".into(),
                    body: "{{ campaign.description }}".into(),
                    branch: "campaigns/{{ campaign.name }}".into(),
                    commit: CommitTemplate {
                        message: "style: format".into(),
                        author: None,
                    },
                    published: PublishedRule::Static(PublishIntent::Draft),
                }),
            },
        )
        .expect("spec");

    let patches: Vec<RepoPatch> = (1..=2)
        .map(|id| RepoPatch {
            repo_id: RepoId(id),
            base_ref: "main".into(),
            base_rev: "abc".into(),
            diff: "--- a/x\n+++ b/x\n@@ -1 +1,2 @@\n a\n+b\n".into(),
        })
        .collect();
    let specs = svc.expand_template(&alice, &spec.id, &patches).expect("expand");
    assert_eq!(specs.len(), 2);
    let first = specs[0].branch().expect("branch");
    assert_eq!(first.title, "Format r1");
    assert_eq!(first.head_ref, "refs/heads/campaigns/fmt");
    assert_eq!(first.base_ref, "refs/heads/main");
    assert_eq!(first.published, PublishIntent::Draft);
    assert_eq!(specs[0].diff_stat.added, 1);
}
