//! The migration target: accepts already-sequenced entry bundles from an
//! external migration driver and folds them into the tile tree at its own
//! pace. It never signs or publishes checkpoints — by the time a log is
//! being migrated, the source log is the checkpoint of record.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use seqlog_core::{Error, Result};

use crate::atomic;
use crate::engine::Engine;
use crate::state::TreeState;
use crate::traits::{BundleHasher, EntriesPath};

/// Bundles folded into the tree per [`MigrationTarget::build_tree`] call.
///
/// Bounds how much work a single call does, so a driver looping over
/// `build_tree` keeps a responsive cancellation point between calls rather
/// than integrating an entire large log in one blocking stretch.
pub const MAX_BUNDLES_PER_CALL: u64 = 300;

/// Accepts bundle bytes pushed by a migration driver and integrates them.
pub struct MigrationTarget {
    engine: Arc<Engine>,
    bundle_hasher: Arc<dyn BundleHasher>,
    entries_path: Arc<dyn EntriesPath>,
    root: PathBuf,
}

impl MigrationTarget {
    pub(crate) fn new(
        root: PathBuf,
        engine: Arc<Engine>,
        bundle_hasher: Arc<dyn BundleHasher>,
        entries_path: Arc<dyn EntriesPath>,
    ) -> Self {
        Self {
            engine,
            bundle_hasher,
            entries_path,
            root,
        }
    }

    /// Write bundle `index`'s bytes verbatim. No parsing or hashing happens
    /// here; `build_tree` does that lazily, later, in sequence order.
    pub fn set_entry_bundle(&self, index: u64, partial: u8, bytes: &[u8]) -> Result<()> {
        let path = self.root.join(self.entries_path.path(index, partial));
        atomic::create_exclusive(&path, bytes)?;
        if partial == 0 {
            atomic::relink_partials(&path)?;
        }
        Ok(())
    }

    /// The currently committed tree state.
    pub fn state(&self) -> Result<TreeState> {
        self.engine.state.read()
    }

    /// Integrate up to [`MAX_BUNDLES_PER_CALL`] already-written bundles
    /// starting at the current tree size.
    ///
    /// A no-op (besides re-reading state) once every bundle written so far
    /// has already been integrated; call again as `set_entry_bundle` supplies
    /// more.
    pub fn build_tree(&self) -> Result<TreeState> {
        self.engine
            .build_from_bundles(MAX_BUNDLES_PER_CALL, self.bundle_hasher.as_ref())
    }

    /// Poll until the tree has reached at least `size`, or `cancel` fires.
    pub async fn await_integration(
        &self,
        size: u64,
        cancel: &CancellationToken,
    ) -> Result<TreeState> {
        loop {
            let current = self.state()?;
            if current.size >= size {
                return Ok(current);
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(Duration::from_millis(50)) => {},
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TreeStateStore;
    use crate::traits::DefaultEntriesPath;
    use seqlog_core::hash::hash_leaf;
    use tempfile::tempdir;

    struct FixedWidthHasher;
    impl BundleHasher for FixedWidthHasher {
        fn hash(&self, bundle: &[u8]) -> Result<Vec<[u8; 32]>> {
            Ok(bundle.chunks(4).map(hash_leaf).collect())
        }
    }

    fn target(dir: &std::path::Path) -> MigrationTarget {
        let state = Arc::new(TreeStateStore::new(
            dir.join(".state"),
            Arc::new(tokio::sync::Notify::new()),
        ));
        let entries_path: Arc<dyn EntriesPath> = Arc::new(DefaultEntriesPath);
        let engine = Arc::new(Engine {
            root: dir.to_path_buf(),
            state,
            entries_path: Arc::clone(&entries_path),
        });
        MigrationTarget::new(
            dir.to_path_buf(),
            engine,
            Arc::new(FixedWidthHasher),
            entries_path,
        )
    }

    #[test]
    fn builds_a_tree_from_pushed_bundles() {
        let dir = tempdir().unwrap();
        let target = target(dir.path());

        let bytes: Vec<u8> = (0..256u32).flat_map(u32::to_be_bytes).collect();
        target.set_entry_bundle(0, 0, &bytes).unwrap();

        let state = target.build_tree().unwrap();
        assert_eq!(state.size, 256);

        let expected_leaves: Vec<[u8; 32]> = bytes.chunks(4).map(hash_leaf).collect();
        assert_eq!(state.root, seqlog_core::hash::merkle_root(&expected_leaves));
    }

    #[test]
    fn a_trailing_partial_bundle_integrates_without_a_full_sibling() {
        let dir = tempdir().unwrap();
        let target = target(dir.path());

        let bytes: Vec<u8> = (0..10u32).flat_map(u32::to_be_bytes).collect();
        target.set_entry_bundle(0, 10, &bytes).unwrap();

        let state = target.build_tree().unwrap();
        assert_eq!(state.size, 10);
    }

    #[tokio::test]
    async fn await_integration_observes_a_later_build() {
        let dir = tempdir().unwrap();
        let target = target(dir.path());
        let bytes: Vec<u8> = (0..4u32).flat_map(u32::to_be_bytes).collect();
        target.set_entry_bundle(0, 4, &bytes).unwrap();

        let cancel = CancellationToken::new();
        tokio::time::timeout(Duration::from_millis(200), async {
            loop {
                if target.build_tree().unwrap().size == 4 {
                    break;
                }
            }
        })
        .await
        .unwrap();

        let state = target.await_integration(4, &cancel).await.unwrap();
        assert_eq!(state.size, 4);
    }
}
