//! The synchronous core shared by the sequencer and the migration target:
//! acquire the cross-process tree-state lock, run the bundle writer and tile
//! integrator, commit the new state.
//!
//! Every method here is blocking filesystem I/O. Callers run it inside
//! `spawn_blocking`, with the in-process mutex already held so the file lock
//! is never contended by two tasks in the same process.

use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use seqlog_core::{Entry, Error, Result, TILE_WIDTH};
use seqlog_tile::integrate;

use crate::atomic::FileLock;
use crate::bundle;
use crate::state::{TreeState, TreeStateStore};
use crate::tiles::{self, FsTileStore};
use crate::traits::{BundleHasher, EntriesPath};

pub(crate) struct Engine {
    pub root: PathBuf,
    pub state: Arc<TreeStateStore>,
    pub entries_path: Arc<dyn EntriesPath>,
}

impl Engine {
    fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(&self.state.lock_path())
    }

    /// Write `entries` as new bundles, integrate their leaf hashes, and
    /// commit the resulting tree state. Returns the sequence range assigned.
    pub fn sequence_entries(&self, entries: Vec<Box<dyn Entry>>) -> Result<Range<u64>> {
        let _file_lock = self.lock()?;
        let current = self.state.read()?;
        let from_seq = current.size;

        let leaf_hashes =
            bundle::append_entries(&self.root, from_seq, &entries, self.entries_path.as_ref())?;
        self.integrate_and_commit(from_seq, &leaf_hashes)?;

        Ok(from_seq..from_seq + leaf_hashes.len() as u64)
    }

    /// Pull up to `max_bundles` already-written entry bundles starting at the
    /// current tree size, hash them with `bundle_hasher`, and integrate +
    /// commit whatever leaves that yields. Used by the migration target,
    /// whose bundles arrive via `set_entry_bundle` rather than through the
    /// sequencer.
    pub fn build_from_bundles(
        &self,
        max_bundles: u64,
        bundle_hasher: &dyn BundleHasher,
    ) -> Result<TreeState> {
        let _file_lock = self.lock()?;
        let current = self.state.read()?;
        let start = current.size;

        let mut bundle_index = start / TILE_WIDTH;
        let mut seq = start;
        let mut leaf_hashes = Vec::new();

        for _ in 0..max_bundles {
            let Some((bytes, is_full)) = self.find_bundle_bytes(bundle_index)? else {
                break;
            };
            let hashes = bundle_hasher.hash(&bytes)?;
            let already = (seq - bundle_index * TILE_WIDTH) as usize;
            if already > hashes.len() {
                return Err(Error::BundleOverflow { seq });
            }
            leaf_hashes.extend_from_slice(&hashes[already..]);
            seq = bundle_index * TILE_WIDTH + hashes.len() as u64;
            bundle_index += 1;
            if !is_full {
                break;
            }
        }

        self.integrate_and_commit(start, &leaf_hashes)?;
        self.state.read()
    }

    fn integrate_and_commit(&self, from_seq: u64, leaf_hashes: &[[u8; 32]]) -> Result<()> {
        let store = FsTileStore { root: &self.root };
        let integration = integrate(from_seq, leaf_hashes, &store)?;
        for tile in integration.updated_tiles.values() {
            tiles::write_tile(&self.root, tile, integration.new_size)?;
        }
        self.state.write(&TreeState {
            size: integration.new_size,
            root: integration.new_root,
        })
    }

    /// Locate bundle `bundle_index`'s current bytes on disk, trying the full
    /// path first and falling back to the most complete partial sibling.
    fn find_bundle_bytes(&self, bundle_index: u64) -> Result<Option<(Vec<u8>, bool)>> {
        let full_rel = self.entries_path.path(bundle_index, 0);
        let full_path = self.root.join(&full_rel);
        if let Ok(bytes) = std::fs::read(&full_path) {
            return Ok(Some((bytes, true)));
        }

        let partial_dir = {
            let mut os = full_path.clone().into_os_string();
            os.push(".p");
            PathBuf::from(os)
        };
        let Ok(read_dir) = std::fs::read_dir(&partial_dir) else {
            return Ok(None);
        };

        let mut best: Option<(u8, Vec<u8>)> = None;
        for entry in read_dir.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Ok(k) = name.parse::<u8>() else { continue };
            if best.as_ref().is_some_and(|(bk, _)| *bk >= k) {
                continue;
            }
            if let Ok(bytes) = std::fs::read(entry.path()) {
                best = Some((k, bytes));
            }
        }
        Ok(best.map(|(_, bytes)| (bytes, false)))
    }
}
