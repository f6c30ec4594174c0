//! POSIX filesystem backend for an append-only tiled Merkle log.
//!
//! [`Storage`] wires together the four moving pieces: the entry [`sequencer`]
//! that batches and commits new leaves, the [`publisher`] that republishes
//! checkpoints on tree growth, the filesystem [`tiles`]/[`bundle`] readers and
//! writers the [`seqlog_tile`] integrator drives, and (for migration drivers)
//! [`migration::MigrationTarget`].

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod atomic;
pub mod bundle;
mod engine;
pub mod migration;
pub mod publisher;
pub mod sequencer;
pub mod state;
pub mod tiles;
pub mod traits;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use seqlog_core::{Entry, Error, Result};

use engine::Engine;
use migration::MigrationTarget;
use publisher::Publisher;
use sequencer::{IndexFuture, Sequencer};
use state::{check_or_init_version, TreeState, TreeStateStore};
use traits::{BundleHasher, CheckpointSigner, DefaultEntriesPath, EntriesPath};

/// Floor enforced on [`Config::checkpoint_interval`].
pub const MIN_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for opening a [`Storage`].
pub struct Config {
    /// How often the publisher re-checks the tree even with no growth
    /// signal; also the ceiling on checkpoint staleness. Must be at least
    /// [`MIN_CHECKPOINT_INTERVAL`].
    pub checkpoint_interval: Duration,
    /// Oldest an entry is allowed to sit in the sequencer's queue before its
    /// batch is flushed regardless of size.
    pub batch_max_age: Duration,
    /// Largest batch the sequencer will accumulate before flushing early.
    pub batch_max_size: usize,
    /// Bound on queued-but-unflushed entries before `add` applies
    /// backpressure.
    pub queue_capacity: usize,
    /// Signs checkpoints and runs the publisher task. `None` makes this a
    /// mirrored, no-publisher log: entries can still be sequenced, but
    /// nothing writes `checkpoint`.
    pub checkpoint_signer: Option<Arc<dyn CheckpointSigner>>,
    /// Overrides the default dense bundle/tile path layout.
    pub entries_path: Arc<dyn EntriesPath>,
    /// Required only by [`Storage::migration_target`]: recovers leaf hashes
    /// from bundle bytes supplied by an external driver.
    pub bundle_hasher: Option<Arc<dyn BundleHasher>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            checkpoint_interval: Duration::from_secs(10),
            batch_max_age: Duration::from_millis(250),
            batch_max_size: 256,
            queue_capacity: 1024,
            checkpoint_signer: None,
            entries_path: Arc::new(DefaultEntriesPath),
            bundle_hasher: None,
        }
    }
}

/// A running append-only log rooted at a directory.
pub struct Storage {
    root: PathBuf,
    engine: Arc<Engine>,
    sequencer: Sequencer,
    cancel: CancellationToken,
    publisher_handle: Option<tokio::task::JoinHandle<()>>,
    bundle_hasher: Option<Arc<dyn BundleHasher>>,
    entries_path: Arc<dyn EntriesPath>,
}

impl Storage {
    /// Open the log rooted at `root`.
    ///
    /// `create = true` initializes a brand-new log (fails with
    /// [`Error::AlreadyExists`] if one is already there); `create = false`
    /// opens an existing one (fails with [`Error::VersionMismatch`] if the
    /// on-disk version doesn't match, which also covers "nothing here yet").
    pub async fn open(root: impl Into<PathBuf>, create: bool, config: Config) -> Result<Self> {
        if config.checkpoint_interval < MIN_CHECKPOINT_INTERVAL {
            return Err(Error::IntervalTooShort {
                min: MIN_CHECKPOINT_INTERVAL,
                got: config.checkpoint_interval,
            });
        }
        let root = root.into();
        let state_dir = root.join(".state");

        {
            let state_dir = state_dir.clone();
            tokio::task::spawn_blocking(move || check_or_init_version(&state_dir, create))
                .await
                .map_err(|_| Error::Cancelled)??;
        }

        let updated = Arc::new(Notify::new());
        let state = Arc::new(TreeStateStore::new(state_dir, Arc::clone(&updated)));
        let entries_path = config.entries_path;
        let engine = Arc::new(Engine {
            root: root.clone(),
            state: Arc::clone(&state),
            entries_path: Arc::clone(&entries_path),
        });

        if create {
            state.write(&TreeState::empty())?;
            if let Some(signer) = config.checkpoint_signer.as_ref() {
                let bytes = signer.sign(0, seqlog_core::hash::empty_root())?;
                atomic::create_exclusive(&root.join(seqlog_tile::checkpoint_path()), &bytes)?;
            }
        }

        let cancel = CancellationToken::new();
        let process_lock = Arc::new(Mutex::new(()));
        let sequencer = Sequencer::spawn(
            Arc::clone(&engine),
            process_lock,
            config.batch_max_size,
            config.batch_max_age,
            config.queue_capacity,
            cancel.clone(),
        );

        let publisher_handle = config.checkpoint_signer.as_ref().map(|signer| {
            Publisher::spawn(
                root.clone(),
                Arc::clone(&state),
                Arc::clone(signer),
                config.checkpoint_interval,
                cancel.clone(),
            )
        });

        Ok(Self {
            root,
            engine,
            sequencer,
            cancel,
            publisher_handle,
            bundle_hasher: config.bundle_hasher,
            entries_path,
        })
    }

    /// Root directory this log is stored under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Queue `entry`, returning a future that resolves to its assigned
    /// sequence number once its batch is committed.
    pub async fn add(&self, entry: Box<dyn Entry>) -> IndexFuture {
        self.sequencer.add(entry).await
    }

    /// The currently committed `(size, root)`.
    pub fn state(&self) -> Result<TreeState> {
        self.engine.state.read()
    }

    /// A read-only handle sharing this log's tile store, for verifying
    /// inclusion/consistency proofs without going through the sequencer.
    #[must_use]
    pub fn reader(&self) -> Reader<'_> {
        Reader { root: &self.root }
    }

    /// Build a [`MigrationTarget`] over this storage, for accepting bundles
    /// pushed by an external migration driver.
    ///
    /// Returns `None` unless [`Config::bundle_hasher`] was set at
    /// [`Storage::open`] time.
    #[must_use]
    pub fn migration_target(&self) -> Option<MigrationTarget> {
        let bundle_hasher = self.bundle_hasher.as_ref()?;
        Some(MigrationTarget::new(
            self.root.clone(),
            Arc::clone(&self.engine),
            Arc::clone(bundle_hasher),
            Arc::clone(&self.entries_path),
        ))
    }

    /// Stop accepting new entries and stop the publisher, waiting for both
    /// tasks to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Some(handle) = self.publisher_handle {
            let _ = handle.await;
        }
    }
}

/// Read-only access to a log's committed tiles, for proof verification.
pub struct Reader<'a> {
    root: &'a Path,
}

impl Reader<'_> {
    /// Read tile `(level, index)` as of `tree_size`.
    pub fn tile(&self, level: u8, index: u64, tree_size: u64) -> Result<Option<seqlog_core::Tile>> {
        tiles::read_tile(self.root, level, index, tree_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqlog_core::hash::hash_leaf;
    use tempfile::tempdir;

    struct Raw(Vec<u8>);
    impl Entry for Raw {
        fn serialize(&self, _index: u64) -> Vec<u8> {
            self.0.clone()
        }
        fn leaf_hash(&self) -> [u8; 32] {
            hash_leaf(&self.0)
        }
    }

    #[tokio::test]
    async fn open_create_add_and_read_back_state() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(
            dir.path().to_path_buf(),
            true,
            Config {
                batch_max_age: Duration::from_millis(5),
                ..Config::default()
            },
        )
        .await
        .unwrap();

        let mut futures = Vec::new();
        for i in 0..10 {
            futures.push(storage.add(Box::new(Raw(format!("entry-{i}").into_bytes()))).await);
        }
        for (i, fut) in futures.into_iter().enumerate() {
            assert_eq!(fut.await.unwrap(), i as u64);
        }

        assert_eq!(storage.state().unwrap().size, 10);
        storage.shutdown().await;
    }

    #[tokio::test]
    async fn reopening_an_existing_log_preserves_state() {
        let dir = tempdir().unwrap();
        {
            let storage = Storage::open(dir.path().to_path_buf(), true, Config::default())
                .await
                .unwrap();
            let fut = storage.add(Box::new(Raw(b"only-entry".to_vec()))).await;
            fut.await.unwrap();
            storage.shutdown().await;
        }

        let storage = Storage::open(dir.path().to_path_buf(), false, Config::default())
            .await
            .unwrap();
        assert_eq!(storage.state().unwrap().size, 1);
        storage.shutdown().await;
    }

    #[tokio::test]
    async fn creating_over_an_existing_log_fails() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().to_path_buf(), true, Config::default())
            .await
            .unwrap();
        storage.shutdown().await;

        let err = Storage::open(dir.path().to_path_buf(), true, Config::default()).await;
        assert!(matches!(err, Err(Error::AlreadyExists)));
    }

    #[tokio::test]
    async fn too_short_a_checkpoint_interval_is_rejected() {
        let dir = tempdir().unwrap();
        let err = Storage::open(
            dir.path().to_path_buf(),
            true,
            Config {
                checkpoint_interval: Duration::from_millis(1),
                ..Config::default()
            },
        )
        .await;
        assert!(matches!(err, Err(Error::IntervalTooShort { .. })));
    }

    struct FixedSigner;
    impl CheckpointSigner for FixedSigner {
        fn sign(&self, size: u64, root: [u8; 32]) -> Result<Vec<u8>> {
            Ok(format!("{size}:{}", root.iter().map(|b| format!("{b:02x}")).collect::<String>())
                .into_bytes())
        }
    }

    #[tokio::test]
    async fn create_with_a_signer_publishes_an_initial_checkpoint() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(
            dir.path().to_path_buf(),
            true,
            Config {
                checkpoint_signer: Some(Arc::new(FixedSigner)),
                ..Config::default()
            },
        )
        .await
        .unwrap();
        storage.shutdown().await;

        let bytes = std::fs::read(dir.path().join("checkpoint")).unwrap();
        let expected = format!("0:{}", seqlog_core::hash::empty_root().iter().map(|b| format!("{b:02x}")).collect::<String>());
        assert_eq!(bytes, expected.into_bytes());
    }

    #[tokio::test]
    async fn create_without_a_signer_writes_no_checkpoint() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().to_path_buf(), true, Config::default())
            .await
            .unwrap();
        storage.shutdown().await;

        assert!(!dir.path().join("checkpoint").exists());
    }
}
