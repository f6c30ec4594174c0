//! Core types shared across the `seqlog` workspace.
//!
//! This crate carries nothing that touches the filesystem: RFC 6962 hashing,
//! the [`Entry`] trait callers implement for their leaf payloads, the [`Tile`]
//! value type, and the [`Error`] taxonomy every other crate reports through.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod entry;
pub mod error;
pub mod hash;
pub mod tile;

pub use entry::Entry;
pub use error::{Error, Result};
pub use tile::Tile;

/// Fan-out of an entry bundle and of a Merkle tile: `W` in spec terms.
///
/// A full bundle holds exactly this many serialized entries; a full tile
/// holds exactly this many child hashes. Only the right-most bundle/tile at
/// each level may hold fewer.
pub const TILE_WIDTH: u64 = 256;
