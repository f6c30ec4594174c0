//! Filesystem-backed [`ReadTiles`] plus the tile writer used after each
//! integration round.
//!
//! A tile is stored as its node hashes concatenated, 32 bytes each, with no
//! framing: the file length alone tells a reader how many nodes it holds.

use std::fs;
use std::path::Path;

use seqlog_core::{Error, Result, Tile};
use seqlog_tile::{partial_tile_size, tile_is_full, tile_path, ReadTiles, TileId};

use crate::atomic;

/// Reads tiles out of `<root>/tile/<level>/...` on demand.
pub struct FsTileStore<'a> {
    /// Log root directory.
    pub root: &'a Path,
}

impl ReadTiles for FsTileStore<'_> {
    fn read(&self, ids: &[TileId], tree_size: u64) -> Result<Vec<Option<Tile>>> {
        ids.iter()
            .map(|&(level, index)| read_tile(self.root, level, index, tree_size))
            .collect()
    }
}

/// Read tile `(level, index)` as of `tree_size`, or `None` if it hasn't been
/// written yet.
pub fn read_tile(root: &Path, level: u8, index: u64, tree_size: u64) -> Result<Option<Tile>> {
    let partial = partial_tile_size(level, index, tree_size);
    debug_assert!(partial <= u64::from(u16::MAX), "tile width fits in a u16 suffix");
    let path = root.join(tile_path(level, index, partial as u16));
    match fs::read(&path) {
        Ok(bytes) => Ok(Some(decode_tile(level, index, &bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path.display().to_string(), e)),
    }
}

/// Write `tile` to disk, promoting any existing partial siblings to symlinks
/// once it becomes full.
///
/// `tree_size` is the tree size this write is committing to, not `tile.len()`:
/// a tile can hold exactly `TILE_WIDTH` child hashes while its last child is
/// itself still partial, and that must still land on a partial path.
pub fn write_tile(root: &Path, tile: &Tile, tree_size: u64) -> Result<()> {
    let partial: u16 = if tile_is_full(tile.level(), tile.index(), tree_size) {
        0
    } else {
        tile.len() as u16
    };
    let path = root.join(tile_path(tile.level(), tile.index(), partial));
    let bytes = encode_tile(tile);
    atomic::create_exclusive(&path, &bytes)?;
    if partial == 0 {
        atomic::relink_partials(&path)?;
    }
    Ok(())
}

fn encode_tile(tile: &Tile) -> Vec<u8> {
    let mut out = Vec::with_capacity(tile.len() * 32);
    for node in tile.nodes() {
        out.extend_from_slice(node);
    }
    out
}

fn decode_tile(level: u8, index: u64, bytes: &[u8]) -> Result<Tile> {
    if bytes.len() % 32 != 0 {
        return Err(Error::TileSizeOutOfRange {
            level,
            index,
            len: bytes.len(),
        });
    }
    let nodes = bytes
        .chunks_exact(32)
        .map(|c| {
            let mut h = [0u8; 32];
            h.copy_from_slice(c);
            h
        })
        .collect();
    Tile::new(level, index, nodes)
}
