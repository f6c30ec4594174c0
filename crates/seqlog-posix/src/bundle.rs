//! The entry-bundle writer: frames sequenced entries into `tile/entries/*`
//! bundles, seeding each new bundle from its own trailing partial sibling.

use std::fs;
use std::path::Path;

use seqlog_core::{Entry, Error, Result, TILE_WIDTH};

use crate::atomic;
use crate::traits::EntriesPath;

/// Append `entries` starting at absolute sequence `from_seq`, returning their
/// leaf hashes in order.
///
/// Bundles fill to exactly [`TILE_WIDTH`] entries before being promoted from
/// partial to full; a run that doesn't end on a bundle boundary leaves a
/// trailing partial bundle in place for the next call to seed from.
pub fn append_entries(
    root: &Path,
    from_seq: u64,
    entries: &[Box<dyn Entry>],
    entries_path: &dyn EntriesPath,
) -> Result<Vec<[u8; 32]>> {
    let w = TILE_WIDTH;
    let mut leaf_hashes = Vec::with_capacity(entries.len());

    let mut bundle_index = from_seq / w;
    let mut in_bundle = from_seq % w;
    let mut buf: Vec<u8> = if in_bundle > 0 {
        read_partial_bundle(root, entries_path, bundle_index, in_bundle as u8)?
    } else {
        Vec::new()
    };

    for (i, entry) in entries.iter().enumerate() {
        let seq = from_seq + i as u64;
        buf.extend_from_slice(&entry.serialize(seq));
        leaf_hashes.push(entry.leaf_hash());
        in_bundle += 1;

        if in_bundle > w {
            return Err(Error::BundleOverflow { seq });
        }
        if in_bundle == w {
            write_bundle(root, entries_path, bundle_index, 0, &buf)?;
            bundle_index += 1;
            in_bundle = 0;
            buf = Vec::new();
        }
    }

    if in_bundle > 0 {
        write_bundle(root, entries_path, bundle_index, in_bundle as u8, &buf)?;
    }

    Ok(leaf_hashes)
}

fn read_partial_bundle(
    root: &Path,
    entries_path: &dyn EntriesPath,
    bundle_index: u64,
    partial: u8,
) -> Result<Vec<u8>> {
    let path = root.join(entries_path.path(bundle_index, partial));
    fs::read(&path).map_err(|e| Error::io(path.display().to_string(), e))
}

fn write_bundle(
    root: &Path,
    entries_path: &dyn EntriesPath,
    index: u64,
    partial: u8,
    bytes: &[u8],
) -> Result<()> {
    let path = root.join(entries_path.path(index, partial));
    atomic::create_exclusive(&path, bytes)?;
    if partial == 0 {
        atomic::relink_partials(&path)?;
    }
    Ok(())
}
