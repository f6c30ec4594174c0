//! Injected capabilities the caller supplies: checkpoint signing, a bundle
//! path override, and (migration-only) parsing a bundle back into hashes.

use seqlog_core::Result;

/// Turns a committed `(size, root)` into signed checkpoint bytes.
///
/// Logs with no [`CheckpointSigner`] are "mirrored logs": [`crate::publisher`]
/// is absent and checkpoints, if any, are supplied externally.
pub trait CheckpointSigner: Send + Sync {
    /// Produce checkpoint bytes committing to `(size, root)`.
    fn sign(&self, size: u64, root: [u8; 32]) -> Result<Vec<u8>>;
}

/// Overrides the on-disk bundle path scheme.
pub trait EntriesPath: Send + Sync {
    /// Relative path of entry bundle `index`, partial suffix `partial` (`0`
    /// for full).
    fn path(&self, index: u64, partial: u8) -> String;
}

/// The dense, prefix-chunked bundle path layout (spec default).
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEntriesPath;

impl EntriesPath for DefaultEntriesPath {
    fn path(&self, index: u64, partial: u8) -> String {
        seqlog_tile::bundle_path(index, partial)
    }
}

/// Parses a bundle's raw bytes back into per-entry leaf hashes.
///
/// Migration-only: the migration target receives bundle bytes from an
/// external source and needs to recover their leaf hashes without a typed
/// [`seqlog_core::Entry`] for each one.
pub trait BundleHasher: Send + Sync {
    /// Hash every entry serialized in `bundle`, in order.
    fn hash(&self, bundle: &[u8]) -> Result<Vec<[u8; 32]>>;
}
