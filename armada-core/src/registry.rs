//! On-disk state for the `armada` CLI.
//!
//! # Storage layout
//!
//! ```text
//! ~/.armada/            (mode 0700)
//!   state.yaml          (store snapshot, mode 0600)
//!   state.lock          (held by any process that writes state.yaml)
//!   config.yaml         (optional, see crate::config)
//! ```
//!
//! Functions come in two forms: `fn_at(home, …)` with an explicit home for
//! tests, and `fn(…)` deriving home from `dirs::home_dir()`.

use std::path::{Path, PathBuf};

use crate::error::{io_err, StoreError};
use crate::store::Snapshot;

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.armada/`, created with mode `0700` if absent.
pub fn armada_dir_at(home: &Path) -> Result<PathBuf, StoreError> {
    let dir = home.join(".armada");
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.armada/state.yaml`, pure.
pub fn state_path_at(home: &Path) -> PathBuf {
    home.join(".armada").join("state.yaml")
}

/// `<home>/.armada/state.lock`, pure.
pub fn lock_path_at(home: &Path) -> PathBuf {
    home.join(".armada").join("state.lock")
}

// ---------------------------------------------------------------------------
// Locking
// ---------------------------------------------------------------------------

/// Exclusive right to write `state.yaml`, released on drop.
#[derive(Debug)]
pub struct StateLock {
    _file: std::fs::File,
}

/// Take the state lock without waiting.
pub fn try_lock_at(home: &Path) -> Result<StateLock, StoreError> {
    use fs2::FileExt;

    armada_dir_at(home)?;
    let path = lock_path_at(home);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
        .map_err(|e| io_err(&path, e))?;
    file.try_lock_exclusive()
        .map_err(|_| StoreError::Locked { path })?;
    Ok(StateLock { _file: file })
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load the snapshot; a missing file yields an empty snapshot.
pub fn load_at(home: &Path) -> Result<Snapshot, StoreError> {
    let path = state_path_at(home);
    if !path.exists() {
        return Ok(Snapshot::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse { path, source })
}

pub fn load() -> Result<Snapshot, StoreError> {
    load_at(&home()?)
}

/// Atomically replace `<home>/.armada/state.yaml`.
pub fn save_at(home: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    armada_dir_at(home)?;
    let yaml = serde_yaml::to_string(snapshot)?;
    write_atomic(&state_path_at(home), &yaml)
}

pub fn save(snapshot: &Snapshot) -> Result<(), StoreError> {
    save_at(&home()?, snapshot)
}

/// Serialize to a `.tmp` sibling, `chmod 0600`, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    std::fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn state_path_is_correct() {
        let home = TempDir::new().expect("home");
        assert!(state_path_at(home.path()).ends_with(".armada/state.yaml"));
    }

    #[test]
    fn missing_state_is_empty_snapshot() {
        let home = TempDir::new().expect("home");
        let snap = load_at(home.path()).expect("load");
        assert!(snap.changesets.is_empty());
        assert_eq!(snap.version, crate::store::SNAPSHOT_VERSION);
    }

    #[test]
    fn save_cleans_up_tmp_and_sets_perms() {
        let home = TempDir::new().expect("home");
        save_at(home.path(), &Snapshot::default()).expect("save");
        let path = state_path_at(home.path());
        assert!(path.exists());
        assert!(!path.with_file_name("state.yaml.tmp").exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
            let dir_mode = std::fs::metadata(path.parent().unwrap())
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(dir_mode, 0o700);
        }
    }

    #[test]
    fn state_lock_is_exclusive_until_dropped() {
        let home = TempDir::new().expect("home");
        let held = try_lock_at(home.path()).expect("first lock");
        let err = try_lock_at(home.path()).unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }), "{err}");
        assert!(err.to_string().contains("state.lock"));
        drop(held);
        try_lock_at(home.path()).expect("lock after release");
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(StoreError::HomeNotFound.to_string().contains("home directory"));
    }
}
