//! Error taxonomy for the `seqlog` workspace.
//!
//! Library crates return [`Result`] with a precise [`Error`] variant; the CLI
//! flattens these into `anyhow::Error` at the top of `main`.

use std::time::Duration;

/// Errors surfaced by `seqlog-core`, `seqlog-tile`, and `seqlog-posix`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any filesystem operation failed. The path is included when known.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path the failing operation targeted, or `<unknown>` if not tracked.
        path: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The on-disk `.state/version` file doesn't match what this build knows.
    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version this build requires.
        expected: u32,
        /// Version read from disk.
        found: u32,
    },

    /// `CheckpointInterval` was configured below the 1 second floor.
    #[error("checkpoint interval too short: {got:?} (minimum {min:?})")]
    IntervalTooShort {
        /// Configured floor.
        min: Duration,
        /// Offending value.
        got: Duration,
    },

    /// A tile had zero or more than `TILE_WIDTH` nodes.
    #[error("tile size out of range at level {level} index {index}: {len} nodes")]
    TileSizeOutOfRange {
        /// Tile level.
        level: u8,
        /// Tile index within its level.
        index: u64,
        /// Offending node count.
        len: usize,
    },

    /// The bundle writer's running count exceeded `TILE_WIDTH` before a flush.
    #[error("bundle overflow: sequence {seq} would exceed a single bundle")]
    BundleOverflow {
        /// Sequence number at which the overflow was detected.
        seq: u64,
    },

    /// The tile integrator needed a tile the callback did not supply and that
    /// isn't legitimately absent (i.e. not simply "not yet written").
    #[error("missing tile at level {level} index {index}")]
    MissingTile {
        /// Tile level.
        level: u8,
        /// Tile index within its level.
        index: u64,
    },

    /// An `Add` was cancelled before or during sequencing.
    #[error("operation cancelled")]
    Cancelled,

    /// `create=true` was used against a path that already holds a log.
    #[error("log already exists at this path")]
    AlreadyExists,

    /// A batch failed as a whole; every future in it resolves to this variant.
    #[error("batch failed: {0}")]
    BatchFailed(String),
}

impl Error {
    /// Wrap an [`std::io::Error`] with the path that produced it.
    #[must_use]
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout `seqlog-core`, `seqlog-tile`, and
/// `seqlog-posix`.
pub type Result<T> = std::result::Result<T, Error>;
