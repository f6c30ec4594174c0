//! The fixed-fan-out Merkle tile value type.

use crate::error::{Error, Result};
use crate::TILE_WIDTH;

/// A Merkle tile: the ordered sequence of up to [`TILE_WIDTH`] hashes at
/// `(level, index)`.
///
/// Level 0 tiles hold leaf hashes directly; level `ℓ > 0` tiles hold the
/// tile-hash of each of their `TILE_WIDTH` children. A tile is "full" when it
/// holds exactly `TILE_WIDTH` nodes; only the right-most tile at a given
/// level may be partial.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tile {
    level: u8,
    index: u64,
    nodes: Vec<[u8; 32]>,
}

impl Tile {
    /// Build a tile, rejecting an empty or over-wide node list.
    pub fn new(level: u8, index: u64, nodes: Vec<[u8; 32]>) -> Result<Self> {
        if nodes.is_empty() || nodes.len() as u64 > TILE_WIDTH {
            return Err(Error::TileSizeOutOfRange {
                level,
                index,
                len: nodes.len(),
            });
        }
        Ok(Self {
            level,
            index,
            nodes,
        })
    }

    /// Tile level (0 = over leaves).
    #[must_use]
    pub const fn level(&self) -> u8 {
        self.level
    }

    /// Tile index within its level.
    #[must_use]
    pub const fn index(&self) -> u64 {
        self.index
    }

    /// The tile's node hashes, in order.
    #[must_use]
    pub fn nodes(&self) -> &[[u8; 32]] {
        &self.nodes
    }

    /// Number of populated nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` iff the tile has zero nodes — never constructible via [`Tile::new`],
    /// kept for API symmetry with `Vec::is_empty`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `true` iff this tile holds exactly [`TILE_WIDTH`] nodes.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.nodes.len() as u64 == TILE_WIDTH
    }

    /// This tile's own hash: the RFC 6962 root over its node list, treating
    /// each node as an opaque leaf of a sub-tree one level up.
    #[must_use]
    pub fn tile_hash(&self) -> [u8; 32] {
        crate::hash::merkle_root(&self.nodes)
    }

    /// Append `extra` nodes, failing if the result would exceed
    /// [`TILE_WIDTH`].
    pub fn extend(&mut self, extra: impl IntoIterator<Item = [u8; 32]>) -> Result<()> {
        for n in extra {
            if self.nodes.len() as u64 >= TILE_WIDTH {
                return Err(Error::TileSizeOutOfRange {
                    level: self.level,
                    index: self.index,
                    len: self.nodes.len() + 1,
                });
            }
            self.nodes.push(n);
        }
        Ok(())
    }
}
