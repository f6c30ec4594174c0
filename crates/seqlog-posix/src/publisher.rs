//! The checkpoint publisher: wakes on a tree-state change or a fixed
//! interval, whichever comes first, and republishes a freshly signed
//! checkpoint only if the tree has actually moved since the last one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use seqlog_core::Result;
use seqlog_tile::checkpoint_path;

use crate::atomic::{self, FileLock};
use crate::state::TreeStateStore;
use crate::traits::CheckpointSigner;

pub(crate) struct Publisher {
    root: PathBuf,
    state: Arc<TreeStateStore>,
    signer: Arc<dyn CheckpointSigner>,
    interval: Duration,
    updated: Arc<Notify>,
}

impl Publisher {
    /// Spawn the publisher task, returning its join handle.
    pub fn spawn(
        root: PathBuf,
        state: Arc<TreeStateStore>,
        signer: Arc<dyn CheckpointSigner>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let updated = state.updated_signal();
        let publisher = Self {
            root,
            state,
            signer,
            interval,
            updated,
        };
        tokio::spawn(publisher.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.updated.notified() => {},
                () = tokio::time::sleep(self.interval) => {},
            }
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.publish_if_stale() {
                tracing::warn!(error = %e, "checkpoint publish failed");
            }
        }
    }

    /// Republish `checkpoint` unless one was already written less than
    /// `self.interval` ago. The staleness floor is derived from the
    /// checkpoint file's own mtime rather than in-memory state, so it holds
    /// across process restarts and across the several processes that may
    /// share one `.state/publish.lock`.
    fn publish_if_stale(&self) -> Result<()> {
        let lock_path = self.root.join(".state").join("publish.lock");
        let _guard = FileLock::acquire(&lock_path)?;

        let path = self.root.join(checkpoint_path());
        if let Ok(metadata) = std::fs::metadata(&path) {
            if let Ok(modified) = metadata.modified() {
                if let Ok(age) = std::time::SystemTime::now().duration_since(modified) {
                    if age < self.interval {
                        tracing::debug!(?age, "checkpoint still fresh, skipping publish");
                        return Ok(());
                    }
                }
            }
        }

        let current = self.state.read()?;
        let bytes = self.signer.sign(current.size, current.root)?;
        atomic::create_exclusive(&path, &bytes)?;
        tracing::info!(size = current.size, root = %hex(&current.root), "published checkpoint");
        Ok(())
    }
}

fn hex(bytes: &[u8; 32]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TreeState;
    use tempfile::tempdir;

    struct FixedSigner;
    impl CheckpointSigner for FixedSigner {
        fn sign(&self, size: u64, root: [u8; 32]) -> Result<Vec<u8>> {
            Ok(format!("{size}:{}", hex(&root)).into_bytes())
        }
    }

    fn hex(bytes: &[u8; 32]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[tokio::test]
    async fn publishes_after_a_state_write() {
        let dir = tempdir().unwrap();
        let notify = Arc::new(Notify::new());
        let state = Arc::new(TreeStateStore::new(
            dir.path().join(".state"),
            Arc::clone(&notify),
        ));
        let cancel = CancellationToken::new();

        let handle = Publisher::spawn(
            dir.path().to_path_buf(),
            Arc::clone(&state),
            Arc::new(FixedSigner),
            Duration::from_secs(3600),
            cancel.clone(),
        );

        state
            .write(&TreeState {
                size: 5,
                root: [1u8; 32],
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let checkpoint = std::fs::read(dir.path().join("checkpoint")).unwrap();
        assert_eq!(checkpoint, format!("5:{}", hex(&[1u8; 32])).into_bytes());

        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn an_unchanged_tree_is_not_republished() {
        let dir = tempdir().unwrap();
        let notify = Arc::new(Notify::new());
        let state = Arc::new(TreeStateStore::new(
            dir.path().join(".state"),
            Arc::clone(&notify),
        ));
        state
            .write(&TreeState {
                size: 1,
                root: [2u8; 32],
            })
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = Publisher::spawn(
            dir.path().to_path_buf(),
            Arc::clone(&state),
            Arc::new(FixedSigner),
            Duration::from_millis(300),
            cancel.clone(),
        );

        // The already-pending `Notify` permit from the write above fires the
        // first publish almost immediately; subsequent ticks land well
        // inside the 300ms staleness floor and must not rewrite the file.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let first_modified = std::fs::metadata(dir.path().join("checkpoint"))
            .unwrap()
            .modified()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second_modified = std::fs::metadata(dir.path().join("checkpoint"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(first_modified, second_modified);

        cancel.cancel();
        let _ = handle.await;
    }
}
