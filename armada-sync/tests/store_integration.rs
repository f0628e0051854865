//! Scheduler and aggregator fed from a populated MemoryStore.

use armada_core::{
    config::SyncConfig,
    store::{ChangesetFilter, MemoryStore, Store},
    types::{ChangesetLabel, RemoteChangeset},
    Changeset, ChangesetEvent, EventPayload, ExternalState, PublicationState, Repo, RepoId,
    ReviewState,
};
use armada_sync::{calc_counts, schedule, set_derived_state};
use chrono::{DateTime, Duration, Utc};

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-04-10T08:00:00Z")
        .expect("ts")
        .with_timezone(&Utc)
}

fn repo(id: i64) -> Repo {
    Repo {
        id: RepoId(id),
        name: format!("github.com/acme/r{id}"),
        external_service_type: "github".into(),
        archived: false,
    }
}

fn published(store: &MemoryStore, id: i64, synced: Option<DateTime<Utc>>) -> Changeset {
    let mut cs = Changeset::new(&repo(id), now() - Duration::days(3));
    cs.publication_state = PublicationState::Published;
    cs.external_id = Some(format!("{id}"));
    cs.external_state = Some(ExternalState::Open);
    cs.synced_at = synced;
    cs.metadata = synced.map(|at| RemoteChangeset {
        external_id: format!("{id}"),
        title: "Bump".into(),
        body: String::new(),
        base_ref: "refs/heads/main".into(),
        head_ref: "refs/heads/bump".into(),
        state: ExternalState::Open,
        labels: vec![ChangesetLabel::named("deps")],
        checks: Default::default(),
        updated_at: at - Duration::hours(6),
    });
    store.create_changeset(cs).expect("create")
}

#[test]
fn schedule_uses_stored_sync_data() {
    let store = MemoryStore::new();
    let idle = published(&store, 1, Some(now() - Duration::minutes(10)));
    let mut hot = published(&store, 2, None);
    hot.sync_requested = true;
    store.update_changeset(&hot).expect("update");
    let _never = published(&store, 3, None);
    let unpublished = store
        .create_changeset(Changeset::new(&repo(4), now()))
        .expect("create");

    let data = store.list_sync_data(&ChangesetFilter::default()).expect("sync data");
    assert!(data.iter().all(|d| d.changeset_id != unpublished.id));

    let cfg = SyncConfig::default();
    let out = schedule(&data, &cfg, now());
    let ids: Vec<_> = out.iter().map(|s| s.changeset_id).collect();
    assert_eq!(ids, vec![hot.id, idle.id]);
    for s in &out {
        assert!(s.next_sync_at >= now());
        assert!(s.next_sync_at <= now() + Duration::seconds(cfg.max_delay_secs as i64));
    }
}

#[test]
fn derived_state_and_counts_from_stored_events() {
    let store = MemoryStore::new();
    let mut cs = published(&store, 1, Some(now() - Duration::days(2)));
    store
        .upsert_changeset_events(&[
            ChangesetEvent {
                changeset_id: cs.id,
                key: "rev-1".into(),
                created_at: now() - Duration::days(1),
                payload: EventPayload::Reviewed {
                    author: "alice".into(),
                    state: ReviewState::Approved,
                },
            },
            ChangesetEvent {
                changeset_id: cs.id,
                key: "lbl-1".into(),
                created_at: now() - Duration::hours(20),
                payload: EventPayload::Labeled {
                    label: ChangesetLabel::named("approved"),
                },
            },
            ChangesetEvent {
                changeset_id: cs.id,
                key: "merge-1".into(),
                created_at: now() - Duration::hours(2),
                payload: EventPayload::Merged,
            },
        ])
        .expect("events");

    let events = store.list_changeset_events(&[cs.id]).expect("events");
    set_derived_state(&mut cs, &events);
    assert_eq!(cs.external_state, Some(ExternalState::Merged));
    assert_eq!(cs.external_review_state, ReviewState::Approved);
    let labels: Vec<&str> = cs.labels.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(labels, vec!["approved", "deps"]);

    let counts = calc_counts(now() - Duration::days(3), now(), &[cs], &events);
    assert_eq!(counts.len(), 4);
    assert_eq!(counts[0].open_pending, 1);
    assert_eq!(counts[2].open_approved, 1);
    assert_eq!(counts[3].merged, 1);
}
