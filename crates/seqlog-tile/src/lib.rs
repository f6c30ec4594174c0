//! Dense path layout and tiled Merkle integration.
//!
//! `layout` maps `(kind, index, partial)` to relative filesystem paths with
//! no I/O; `integrator` folds a contiguous run of new leaf hashes into the
//! existing tile set and produces the new tree root.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod integrator;
pub mod layout;

pub use integrator::{integrate, Integration, ReadTiles, TileId};
pub use layout::{bundle_path, checkpoint_path, partial_tile_size, tile_is_full, tile_path};
