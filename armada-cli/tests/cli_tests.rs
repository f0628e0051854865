use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;

use armada_core::{
    registry, store::Store, ChangesetId, MemoryStore, OpaqueId, PublicationState,
    ReconcilerState,
};
use tempfile::TempDir;

const DIFF: &str = "--- a/go.mod\n+++ b/go.mod\n@@ -1 +1 @@\n-go 1.20\n+go 1.22\n";

fn armada_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("armada"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

fn write_bundle(dir: &Path, title: &str, published: &str) -> PathBuf {
    let bundle = format!(
        r#"repos:
  - {{ id: 1, name: github.com/acme/api, external_service_type: github }}
  - {{ id: 2, name: github.com/acme/web, external_service_type: github }}
campaign:
  name: bump-go
  description: Bump the Go toolchain
  changeset_template:
    title: "{title}"
    body: "{{{{ campaign.description }}}}"
    branch: "campaigns/{{{{ campaign.name }}}}"
    commit:
      message: Bump Go
      author: {{ name: Ops, email: ops@example.com }}
    published: {published}
patches:
  - {{ repo_id: 1, base_rev: abc123, diff: {diff:?} }}
  - {{ repo_id: 2, base_rev: def456, diff: {diff:?} }}
"#,
        diff = DIFF,
    );
    let path = dir.join("bundle.yaml");
    fs::write(&path, bundle).expect("write bundle");
    path
}

fn load(home: &Path) -> MemoryStore {
    MemoryStore::from_snapshot(registry::load_at(home).expect("load state"))
}

fn apply(home: &Path, bundle: &Path) {
    armada_cmd(home)
        .args(["apply", bundle.to_str().expect("utf-8 path")])
        .assert()
        .success();
}

#[test]
fn id_encode_then_decode() {
    let home = TempDir::new().expect("home");
    let output = armada_cmd(home.path())
        .args(["id", "encode", "campaign", "42"])
        .output()
        .expect("run encode");
    assert!(output.status.success());
    let opaque = String::from_utf8(output.stdout).expect("utf-8");
    let opaque = opaque.trim();
    assert_eq!(opaque, armada_core::CampaignId(42).to_opaque());

    armada_cmd(home.path())
        .args(["id", "decode", opaque])
        .assert()
        .success()
        .stdout(contains("Campaign 42"));
}

#[test]
fn id_decode_rejects_garbage() {
    let home = TempDir::new().expect("home");
    armada_cmd(home.path())
        .args(["id", "decode", "!!not-base64!!"])
        .assert()
        .failure()
        .stderr(contains("invalid-id"));
}

#[test]
fn dry_run_writes_no_state() {
    let home = TempDir::new().expect("home");
    let bundle = write_bundle(home.path(), "Bump Go", "true");

    armada_cmd(home.path())
        .args(["apply", bundle.to_str().expect("utf-8 path"), "--dry-run"])
        .assert()
        .success()
        .stdout(contains("[dry-run]"))
        .stdout(contains("attach"));

    assert!(!registry::state_path_at(home.path()).exists());
}

#[test]
fn apply_creates_queued_owned_changesets() {
    let home = TempDir::new().expect("home");
    let bundle = write_bundle(home.path(), "Bump Go", "true");
    apply(home.path(), &bundle);

    let store = load(home.path());
    let campaigns = store.list_campaigns().expect("campaigns");
    assert_eq!(campaigns.len(), 1);
    let changesets = store
        .list_changesets(&Default::default())
        .expect("changesets");
    assert_eq!(changesets.len(), 2);
    for cs in &changesets {
        assert_eq!(cs.reconciler_state, ReconcilerState::Queued);
        assert_eq!(cs.publication_state, PublicationState::Unpublished);
        assert_eq!(cs.owned_by_campaign_id, Some(campaigns[0].id));
        assert_eq!(
            cs.external_branch.as_deref(),
            Some("refs/heads/campaigns/bump-go")
        );
    }
}

#[test]
fn reconcile_requires_simulate() {
    let home = TempDir::new().expect("home");
    armada_cmd(home.path())
        .arg("reconcile")
        .assert()
        .failure()
        .stderr(contains("--simulate"));
}

#[test]
fn simulated_reconcile_publishes_then_status_reports() {
    let home = TempDir::new().expect("home");
    let bundle = write_bundle(home.path(), "Bump Go", "true");
    apply(home.path(), &bundle);

    armada_cmd(home.path())
        .args(["reconcile", "--simulate"])
        .assert()
        .success()
        .stdout(contains("2 changesets reconciled"));

    let store = load(home.path());
    for cs in store.list_changesets(&Default::default()).expect("changesets") {
        assert_eq!(cs.reconciler_state, ReconcilerState::Completed);
        assert!(cs.is_published());
        assert!(cs.external_id.is_some());
        let body = cs.metadata.as_ref().map(|m| m.body.as_str()).unwrap_or("");
        assert!(body.contains("Bump the Go toolchain"));
        assert!(body.contains("bump-go"));
    }

    let output = armada_cmd(home.path())
        .args(["status", "--campaign", "bump-go", "--json"])
        .output()
        .expect("run status");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let changesets = json[0]["changesets"].as_array().expect("changesets");
    assert_eq!(changesets.len(), 2);
    assert!(changesets
        .iter()
        .all(|c| c["visibility"] == "visible" && c["changeset"]["reconciler_state"] == "completed"));
}

#[test]
fn reapply_with_new_title_updates_on_reconcile() {
    let home = TempDir::new().expect("home");
    apply(home.path(), &write_bundle(home.path(), "Bump Go", "true"));
    armada_cmd(home.path())
        .args(["reconcile", "--simulate"])
        .assert()
        .success();

    apply(home.path(), &write_bundle(home.path(), "Bump Go to 1.22", "true"));
    let store = load(home.path());
    assert!(store
        .list_changesets(&Default::default())
        .expect("changesets")
        .iter()
        .all(|cs| cs.reconciler_state == ReconcilerState::Queued));

    armada_cmd(home.path())
        .args(["reconcile", "--simulate"])
        .assert()
        .success()
        .stdout(contains("update"));

    let store = load(home.path());
    for cs in store.list_changesets(&Default::default()).expect("changesets") {
        let title = cs.metadata.as_ref().map(|m| m.title.as_str());
        assert_eq!(title, Some("Bump Go to 1.22"));
    }
}

#[test]
fn retry_of_queued_changeset_is_rejected() {
    let home = TempDir::new().expect("home");
    apply(home.path(), &write_bundle(home.path(), "Bump Go", "false"));

    armada_cmd(home.path())
        .args(["retry", &ChangesetId(1).to_opaque()])
        .assert()
        .failure()
        .stderr(contains("not-retryable"));
}

#[test]
fn counts_cover_requested_days() {
    let home = TempDir::new().expect("home");
    apply(home.path(), &write_bundle(home.path(), "Bump Go", "true"));
    armada_cmd(home.path())
        .args(["reconcile", "--simulate"])
        .assert()
        .success();

    let output = armada_cmd(home.path())
        .args(["counts", "bump-go", "--days", "3", "--json"])
        .output()
        .expect("run counts");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let counts = json["counts"].as_array().expect("counts");
    assert!(!counts.is_empty());
    let last = counts.last().expect("last bucket");
    assert_eq!(last["total"], 2);
    assert_eq!(last["open"], 2);
}

#[test]
fn writers_refuse_to_run_while_state_is_locked() {
    let home = TempDir::new().expect("home");
    let bundle = write_bundle(home.path(), "Bump Go", "true");
    let held = registry::try_lock_at(home.path()).expect("lock");

    armada_cmd(home.path())
        .args(["apply", bundle.to_str().expect("utf-8 path")])
        .assert()
        .failure()
        .stderr(contains("another armada command is writing state"));
    armada_cmd(home.path())
        .args(["reconcile", "--simulate"])
        .assert()
        .failure()
        .stderr(contains("another armada command is writing state"));
    armada_cmd(home.path())
        .args(["apply", "--dry-run", bundle.to_str().expect("utf-8 path")])
        .assert()
        .success();
    assert!(!registry::state_path_at(home.path()).exists());

    drop(held);
    apply(home.path(), &bundle);
    assert_eq!(load(home.path()).snapshot().expect("snapshot").changesets.len(), 2);
}

#[test]
fn status_on_empty_state() {
    let home = TempDir::new().expect("home");
    armada_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("No campaigns applied."));
}

#[test]
fn patch_prints_patched_file() {
    let dir = TempDir::new().expect("dir");
    let file = dir.path().join("go.mod");
    fs::write(&file, "go 1.20\n").expect("write file");
    let diff = dir.path().join("change.diff");
    fs::write(&diff, DIFF).expect("write diff");

    armada_cmd(dir.path())
        .args([
            "patch",
            file.to_str().expect("utf-8 path"),
            diff.to_str().expect("utf-8 path"),
        ])
        .assert()
        .success()
        .stdout(predicate::eq("go 1.22\n"));
}
