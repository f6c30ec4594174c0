//! Pure, I/O-free mapping from `(kind, index, partial)` to relative paths.
//!
//! Indices are chunked into 3-digit base-1000 groups from the most
//! significant, mirroring how large transparency logs keep any one directory
//! from holding more than 1000 entries. `index=123456789` becomes
//! `x123/x456/789`; `index=0` becomes `000`.

use seqlog_core::TILE_WIDTH;

/// Relative path of the signed checkpoint file.
#[must_use]
pub const fn checkpoint_path() -> &'static str {
    "checkpoint"
}

/// Relative path of entry bundle `bundle_index`, partial suffix `partial`
/// (`0` means full).
#[must_use]
pub fn bundle_path(bundle_index: u64, partial: u8) -> String {
    let mut p = String::from("tile/entries/");
    p.push_str(&chunk_path(bundle_index));
    append_partial(&mut p, u16::from(partial));
    p
}

/// Relative path of the tile at `(level, index)`, partial suffix `partial`
/// (`0` means full).
///
/// Unlike a bundle's suffix, a tile's partial node count can reach exactly
/// `TILE_WIDTH` (all child slots populated, the last child itself still
/// partial) without the tile being full, so this takes a wider integer than
/// [`bundle_path`]'s suffix to keep that count distinct from the `0`/full
/// path.
#[must_use]
pub fn tile_path(level: u8, index: u64, partial: u16) -> String {
    let mut p = format!("tile/{level}/");
    p.push_str(&chunk_path(index));
    append_partial(&mut p, partial);
    p
}

/// Number of populated nodes in the right-edge tile at `(level, index)` for a
/// tree of `tree_size` leaves, or `0` when that tile is full or lies entirely
/// beyond the tree.
///
/// A level-0 tile's nodes are leaf hashes; a level-`ℓ` tile's nodes are the
/// tile-hashes of its up-to-`TILE_WIDTH` level-`ℓ-1` children, each of which
/// covers `TILE_WIDTH^ℓ` leaves.
#[must_use]
pub fn partial_tile_size(level: u8, index: u64, tree_size: u64) -> u64 {
    if tile_is_full(level, index, tree_size) {
        0
    } else {
        populated_nodes(level, index, tree_size)
    }
}

/// Whether tile `(level, index)` has reached its complete leaf range —
/// `tree_size` covers all `TILE_WIDTH^(level+1)` leaves the tile spans —
/// regardless of whether its node count has also reached `TILE_WIDTH`.
///
/// These two conditions diverge above level 0: a tile can have exactly
/// `TILE_WIDTH` populated children while its last child is itself still
/// partial, which must not count as full (spec: a tile is partial whenever
/// the tree size is not a multiple of the tile's full leaf span).
#[must_use]
pub fn tile_is_full(level: u8, index: u64, tree_size: u64) -> bool {
    let tile_width = leaves_per_tile(level);
    let base = u128::from(index) * tile_width;
    let size = u128::from(tree_size);
    size >= base + tile_width
}

/// Number of populated nodes in tile `(level, index)` for a tree of
/// `tree_size` leaves: `0` if the tile lies entirely beyond the tree,
/// `TILE_WIDTH` if it is full, otherwise the partial count.
///
/// Unlike [`partial_tile_size`] this does not collapse the full case to `0`;
/// the tile integrator needs the true count to know how many children to
/// fold in.
#[must_use]
pub(crate) fn populated_nodes(level: u8, index: u64, tree_size: u64) -> u64 {
    let child_width = width_pow(level);
    let tile_width = child_width * u128::from(TILE_WIDTH);
    let base = u128::from(index) * tile_width;
    let size = u128::from(tree_size);

    if size <= base {
        return 0;
    }
    let remaining = size - base;
    if remaining >= tile_width {
        return TILE_WIDTH;
    }
    // ceil(remaining / child_width)
    ((remaining + child_width - 1) / child_width) as u64
}

/// `TILE_WIDTH^level`: leaves covered by a single node at this level.
fn width_pow(level: u8) -> u128 {
    u128::from(TILE_WIDTH).pow(u32::from(level))
}

/// Leaves covered by an entire tile at `level` (`TILE_WIDTH^(level+1)`).
pub(crate) fn leaves_per_tile(level: u8) -> u128 {
    width_pow(level) * u128::from(TILE_WIDTH)
}

fn append_partial(p: &mut String, partial: u16) {
    if partial != 0 {
        p.push_str(".p/");
        p.push_str(&partial.to_string());
    }
}

fn chunk_path(index: u64) -> String {
    let mut groups = Vec::new();
    let mut n = index;
    loop {
        groups.push((n % 1000) as u32);
        n /= 1000;
        if n == 0 {
            break;
        }
    }
    groups.reverse();

    let mut out = String::new();
    let last = groups.len() - 1;
    for (i, g) in groups.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        if i == last {
            out.push_str(&format!("{g:03}"));
        } else {
            out.push('x');
            out.push_str(&format!("{g:03}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_is_flat() {
        assert_eq!(checkpoint_path(), "checkpoint");
    }

    #[test]
    fn bundle_examples_from_spec() {
        assert_eq!(bundle_path(0, 0), "tile/entries/000");
        assert_eq!(bundle_path(123_456_789, 0), "tile/entries/x123/x456/789");
        assert_eq!(bundle_path(1, 1), "tile/entries/001.p/1");
    }

    #[test]
    fn tile_examples_mirror_bundle_chunking() {
        assert_eq!(tile_path(0, 0, 0), "tile/0/000");
        assert_eq!(tile_path(2, 123_456_789, 0), "tile/2/x123/x456/789");
        assert_eq!(tile_path(1, 1, 5), "tile/1/001.p/5");
    }

    #[test]
    fn partial_tile_size_level0() {
        // Tile (0,0) covers leaves [0, 256). Tree of 200 leaves -> 200 populated.
        assert_eq!(partial_tile_size(0, 0, 200), 200);
        // Tree of 256 leaves -> tile is full -> 0.
        assert_eq!(partial_tile_size(0, 0, 256), 0);
        // Tree of 0 leaves -> tile fully beyond the tree -> 0.
        assert_eq!(partial_tile_size(0, 0, 0), 0);
        // Tile (0,1) covers [256, 512); tree of 300 -> 44 populated.
        assert_eq!(partial_tile_size(0, 1, 300), 44);
        // Tile (0,1) with tree of 200 -> tile entirely beyond the tree -> 0.
        assert_eq!(partial_tile_size(0, 1, 200), 0);
    }

    #[test]
    fn partial_tile_size_level1() {
        let w = u64::from(TILE_WIDTH);
        // Tile (1,0) covers leaves [0, W*W). Each node covers W leaves.
        // A tree with 1.5 child-tiles' worth of leaves populates 2 nodes.
        let tree_size = w + 1;
        assert_eq!(partial_tile_size(1, 0, tree_size), 2);
        // Exactly W*W leaves: tile full -> 0.
        assert_eq!(partial_tile_size(1, 0, w * w), 0);
    }

    #[test]
    fn a_tile_with_all_child_slots_populated_but_a_partial_last_child_is_still_partial() {
        // All W child slots exist (so populated_nodes reaches TILE_WIDTH) but
        // the tree hasn't reached the tile's full W*W leaf span yet, because
        // the last child is itself only partially filled. Must still report
        // a nonzero partial size, not collapse to 0 ("full").
        let w = u64::from(TILE_WIDTH);
        let tree_size = (w - 1) * w + 10;
        assert!(tree_size > 255 * 256 && tree_size < 256 * 256);
        assert_eq!(partial_tile_size(1, 0, tree_size), w);

        // The literal case from a real run: a log just past (W-1)*W leaves.
        assert_eq!(partial_tile_size(1, 0, 65_290), 256);
    }
}
