//! Folds a contiguous run of new leaf hashes into the tiled Merkle tree.

use std::collections::HashMap;

use seqlog_core::{hash::empty_root, Error, Result, Tile, TILE_WIDTH};

use crate::layout;

/// Identifies a tile by its `(level, index)` coordinates.
pub type TileId = (u8, u64);

/// Callback the integrator uses to fetch the current on-disk version of a set
/// of tiles. A `None` entry means the tile does not exist yet.
pub trait ReadTiles {
    /// Fetch tiles `ids`, in order, as of a tree of `tree_size` leaves.
    fn read(&self, ids: &[TileId], tree_size: u64) -> Result<Vec<Option<Tile>>>;
}

/// Result of folding a batch of leaves into the tree.
#[derive(Debug)]
pub struct Integration {
    /// Tree size after this batch.
    pub new_size: u64,
    /// Merkle root after this batch.
    pub new_root: [u8; 32],
    /// Every tile this batch created or modified, keyed by `(level, index)`.
    pub updated_tiles: HashMap<TileId, Tile>,
}

/// Fold `leaf_hashes` starting at absolute sequence `from_seq` into the tile
/// set reachable through `read_tiles`.
///
/// `leaf_hashes` may be empty (e.g. a migration cycle with nothing new to
/// integrate yet); in that case the existing root at `from_seq` is returned
/// unchanged and `updated_tiles` is empty.
pub fn integrate(
    from_seq: u64,
    leaf_hashes: &[[u8; 32]],
    read_tiles: &dyn ReadTiles,
) -> Result<Integration> {
    let new_size = from_seq + leaf_hashes.len() as u64;

    if new_size == 0 {
        return Ok(Integration {
            new_size: 0,
            new_root: empty_root(),
            updated_tiles: HashMap::new(),
        });
    }

    let to_seq = new_size;
    let top_level = top_level_for(new_size);
    let mut updated: HashMap<TileId, Tile> = HashMap::new();

    for level in 0..=top_level {
        let lpt = layout::leaves_per_tile(level);
        let (lo, hi) = match touched_range(lpt, from_seq, to_seq) {
            Some(r) => r,
            None => continue,
        };

        for index in lo..=hi {
            let tile = if level == 0 {
                build_leaf_tile(index, from_seq, to_seq, leaf_hashes, read_tiles, new_size)?
            } else {
                build_interior_tile(level, index, new_size, &updated, read_tiles)?
            };
            updated.insert((level, index), tile);
        }
    }

    let new_root = match updated.get(&(top_level, 0)) {
        Some(t) => t.tile_hash(),
        None => {
            // The top tile wasn't touched this round (e.g. empty leaf_hashes):
            // fetch it as-is.
            read_tiles
                .read(&[(top_level, 0)], new_size)?
                .into_iter()
                .next()
                .flatten()
                .ok_or(Error::MissingTile {
                    level: top_level,
                    index: 0,
                })?
                .tile_hash()
        }
    };

    Ok(Integration {
        new_size,
        new_root,
        updated_tiles: updated,
    })
}

/// Smallest level whose tile width covers the whole tree; the tile at
/// `(top_level, 0)` is the log's root tile.
fn top_level_for(tree_size: u64) -> u8 {
    let mut level = 0u8;
    while layout::leaves_per_tile(level) < u128::from(tree_size) {
        level += 1;
    }
    level
}

/// Touched tile index range `[lo, hi]` at a level whose tiles span `lpt`
/// leaves each, for leaves in `[from_seq, to_seq)`. `None` if the range is
/// empty (no new leaves).
fn touched_range(lpt: u128, from_seq: u64, to_seq: u64) -> Option<(u64, u64)> {
    if to_seq <= from_seq {
        return None;
    }
    let lo = (u128::from(from_seq) / lpt) as u64;
    let hi = ((u128::from(to_seq) - 1) / lpt) as u64;
    Some((lo, hi))
}

fn build_leaf_tile(
    index: u64,
    from_seq: u64,
    to_seq: u64,
    leaf_hashes: &[[u8; 32]],
    read_tiles: &dyn ReadTiles,
    tree_size: u64,
) -> Result<Tile> {
    let w = TILE_WIDTH;
    let tile_lo = index * w;
    let tile_hi = tile_lo + w;

    let mut nodes = match read_tiles.read(&[(0, index)], tree_size)?.remove(0) {
        Some(existing) => existing.nodes().to_vec(),
        None => Vec::new(),
    };

    let start = tile_lo.max(from_seq);
    let end = tile_hi.min(to_seq);
    if start < end {
        let lo_off = (start - from_seq) as usize;
        let hi_off = (end - from_seq) as usize;
        nodes.extend_from_slice(&leaf_hashes[lo_off..hi_off]);
    }

    Tile::new(0, index, nodes)
}

fn build_interior_tile(
    level: u8,
    index: u64,
    tree_size: u64,
    updated: &HashMap<TileId, Tile>,
    read_tiles: &dyn ReadTiles,
) -> Result<Tile> {
    let child_level = level - 1;
    let count = layout::populated_nodes(level, index, tree_size);
    let first_child = index * TILE_WIDTH;

    // Collect the child ids we need to fetch from disk (those not already
    // updated in this batch) and resolve everything in one pass.
    let mut missing_ids = Vec::new();
    for offset in 0..count {
        let child_index = first_child + offset;
        if !updated.contains_key(&(child_level, child_index)) {
            missing_ids.push((child_level, child_index));
        }
    }
    let fetched = read_tiles.read(&missing_ids, tree_size)?;
    let mut fetched = fetched.into_iter();

    let mut nodes = Vec::with_capacity(count as usize);
    for offset in 0..count {
        let child_index = first_child + offset;
        let hash = if let Some(t) = updated.get(&(child_level, child_index)) {
            t.tile_hash()
        } else {
            let t = fetched.next().flatten().ok_or(Error::MissingTile {
                level: child_level,
                index: child_index,
            })?;
            t.tile_hash()
        };
        nodes.push(hash);
    }

    Tile::new(level, index, nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use seqlog_core::hash::{hash_children, hash_leaf, merkle_root};
    use std::cell::RefCell;
    use std::collections::HashMap as StdHashMap;

    /// In-memory tile store used by tests: a stand-in for the on-disk store.
    #[derive(Default)]
    struct MemTiles {
        tiles: RefCell<StdHashMap<TileId, Tile>>,
    }

    impl MemTiles {
        fn commit(&self, tiles: HashMap<TileId, Tile>) {
            self.tiles.borrow_mut().extend(tiles);
        }
    }

    impl ReadTiles for MemTiles {
        fn read(&self, ids: &[TileId], _tree_size: u64) -> Result<Vec<Option<Tile>>> {
            let store = self.tiles.borrow();
            Ok(ids.iter().map(|id| store.get(id).cloned()).collect())
        }
    }

    fn leaves(n: usize) -> Vec<[u8; 32]> {
        (0..n)
            .map(|i| hash_leaf(format!("leaf-{i}").as_bytes()))
            .collect()
    }

    #[test]
    fn empty_tree_has_empty_root() {
        let store = MemTiles::default();
        let r = integrate(0, &[], &store).unwrap();
        assert_eq!(r.new_size, 0);
        assert_eq!(r.new_root, empty_root());
    }

    #[test]
    fn single_leaf_matches_reference_root() {
        let store = MemTiles::default();
        let ls = leaves(1);
        let r = integrate(0, &ls, &store).unwrap();
        assert_eq!(r.new_size, 1);
        assert_eq!(r.new_root, merkle_root(&ls));
    }

    #[test]
    fn incremental_batches_match_full_rebuild() {
        let store = MemTiles::default();
        let all = leaves(600);

        // Integrate in three uneven batches to exercise partial tiles and
        // the level-1 boundary (600 > 256).
        let b1 = &all[0..200];
        let r1 = integrate(0, b1, &store).unwrap();
        store.commit(r1.updated_tiles);

        let b2 = &all[200..300];
        let r2 = integrate(200, b2, &store).unwrap();
        store.commit(r2.updated_tiles);

        let b3 = &all[300..600];
        let r3 = integrate(300, b3, &store).unwrap();
        store.commit(r3.updated_tiles);

        assert_eq!(r3.new_size, 600);
        assert_eq!(r3.new_root, merkle_root(&all));
    }

    #[test]
    fn rereading_unchanged_top_tile_returns_stable_root() {
        let store = MemTiles::default();
        let all = leaves(10);
        let r1 = integrate(0, &all, &store).unwrap();
        store.commit(r1.updated_tiles);

        // No new leaves: root must be unchanged and no tiles touched.
        let r2 = integrate(10, &[], &store).unwrap();
        assert_eq!(r2.new_size, 10);
        assert_eq!(r2.new_root, r1.new_root);
        assert!(r2.updated_tiles.is_empty());
    }

    #[test]
    fn two_leaf_root_is_single_hash_children_call() {
        let store = MemTiles::default();
        let ls = leaves(2);
        let r = integrate(0, &ls, &store).unwrap();
        assert_eq!(r.new_root, hash_children(&ls[0], &ls[1]));
    }

    proptest! {
        /// For any way of chopping up to ~1000 leaves into batches, folding
        /// them through `integrate` one batch at a time must land on the
        /// same root as hashing the whole run in one shot — the tiled,
        /// incremental computation is just a cache over the RFC 6962
        /// reference tree.
        #[test]
        fn incremental_integration_matches_reference_root(batch_sizes in prop::collection::vec(0usize..50, 0..25)) {
            let store = MemTiles::default();
            let mut all = Vec::new();
            let mut from = 0u64;

            for (i, n) in batch_sizes.iter().enumerate() {
                let batch: Vec<[u8; 32]> = (0..*n)
                    .map(|j| hash_leaf(format!("leaf-{i}-{j}").as_bytes()))
                    .collect();
                let r = integrate(from, &batch, &store).unwrap();
                store.commit(r.updated_tiles);
                from = r.new_size;
                all.extend(batch);
            }

            prop_assert_eq!(from, all.len() as u64);
            let expected = merkle_root(&all);
            let r = integrate(from, &[], &store).unwrap();
            prop_assert_eq!(r.new_root, expected);
        }
    }
}
