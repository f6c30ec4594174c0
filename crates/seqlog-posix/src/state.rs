//! The tree-state store: `.state/treeState`, `.state/version`, and the
//! single-slot checkpoint-update signal.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use seqlog_core::hash::empty_root;
use seqlog_core::{Error, Result};

use crate::atomic;

/// Compatibility version this build requires in `.state/version`.
pub const CURRENT_VERSION: u32 = 1;

/// The committed `(size, root)` tuple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeState {
    /// Total number of sequenced leaves.
    pub size: u64,
    /// Merkle root over the first `size` leaves.
    #[serde(with = "root_as_base64")]
    pub root: [u8; 32],
}

impl TreeState {
    /// The state of a brand-new, empty log.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            size: 0,
            root: empty_root(),
        }
    }
}

mod root_as_base64 {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(root: &[u8; 32], s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&BASE64.encode(root))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = BASE64
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| serde::de::Error::custom("root must be exactly 32 bytes"))
    }
}

/// Persists [`TreeState`] under `<root>/.state/` and signals a
/// single-slot "changed" notification on every successful write.
pub struct TreeStateStore {
    state_dir: PathBuf,
    updated: Arc<tokio::sync::Notify>,
}

impl TreeStateStore {
    /// Open the store rooted at `state_dir` (normally `<log root>/.state`).
    #[must_use]
    pub fn new(state_dir: PathBuf, updated: Arc<tokio::sync::Notify>) -> Self {
        Self { state_dir, updated }
    }

    /// A clone of the notification handle, for the checkpoint publisher to
    /// subscribe to.
    #[must_use]
    pub fn updated_signal(&self) -> Arc<tokio::sync::Notify> {
        Arc::clone(&self.updated)
    }

    fn tree_state_path(&self) -> PathBuf {
        self.state_dir.join("treeState")
    }

    /// Path to the cross-process advisory lock guarding tree-state writes.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("treeState.lock")
    }

    /// Read the current state; absence means a fresh, empty log.
    pub fn read(&self) -> Result<TreeState> {
        let path = self.tree_state_path();
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::io(
                    path.display().to_string(),
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TreeState::empty()),
            Err(e) => Err(Error::io(path.display().to_string(), e)),
        }
    }

    /// Write new state and wake the checkpoint publisher (drop the signal if
    /// one is already pending — it is single-slot by design).
    pub fn write(&self, state: &TreeState) -> Result<()> {
        let bytes = serde_json::to_vec(state).map_err(|e| {
            Error::io(
                self.tree_state_path().display().to_string(),
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        atomic::create_exclusive(&self.tree_state_path(), &bytes)?;
        self.updated.notify_one();
        Ok(())
    }
}

/// Ensure `.state/version` exists and matches [`CURRENT_VERSION`].
///
/// With `create = true`, the version file must not already exist (a second
/// `create=true` against a live log is a caller error); with `create =
/// false`, it must exist and match.
pub fn check_or_init_version(state_dir: &Path, create: bool) -> Result<()> {
    let path = state_dir.join("version");
    if create {
        if path.exists() {
            return Err(Error::AlreadyExists);
        }
        fs::create_dir_all(state_dir).map_err(|e| Error::io(state_dir.display().to_string(), e))?;
        atomic::create_exclusive(&path, CURRENT_VERSION.to_string().as_bytes())?;
        return Ok(());
    }

    let bytes = fs::read(&path).map_err(|e| Error::io(path.display().to_string(), e))?;
    let text = String::from_utf8_lossy(&bytes);
    let found: u32 = text
        .trim()
        .parse()
        .map_err(|_| Error::VersionMismatch {
            expected: CURRENT_VERSION,
            found: 0,
        })?;
    if found != CURRENT_VERSION {
        return Err(Error::VersionMismatch {
            expected: CURRENT_VERSION,
            found,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn absent_state_reads_as_empty() {
        let dir = tempdir().unwrap();
        let store = TreeStateStore::new(dir.path().to_path_buf(), Arc::new(tokio::sync::Notify::new()));
        assert_eq!(store.read().unwrap(), TreeState::empty());
    }

    #[test]
    fn round_trips_through_json() {
        let dir = tempdir().unwrap();
        let store = TreeStateStore::new(dir.path().to_path_buf(), Arc::new(tokio::sync::Notify::new()));
        let state = TreeState {
            size: 42,
            root: [7u8; 32],
        };
        store.write(&state).unwrap();
        assert_eq!(store.read().unwrap(), state);
    }

    #[test]
    fn write_wakes_a_pending_waiter() {
        let dir = tempdir().unwrap();
        let notify = Arc::new(tokio::sync::Notify::new());
        let store = TreeStateStore::new(dir.path().to_path_buf(), Arc::clone(&notify));
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let waiter = notify.notified();
            store.write(&TreeState::empty()).unwrap();
            waiter.await;
        });
    }

    #[test]
    fn version_create_then_reopen() {
        let dir = tempdir().unwrap();
        let state_dir = dir.path().join(".state");
        check_or_init_version(&state_dir, true).unwrap();
        check_or_init_version(&state_dir, false).unwrap();
        assert!(matches!(
            check_or_init_version(&state_dir, true),
            Err(Error::AlreadyExists)
        ));
    }
}
