//! Demonstration CLI and bootstrap for the `seqlog` POSIX tiled Merkle log
//! engine.
//!
//! This binary is a thin, opinionated wiring of `seqlog-posix::Storage` over
//! a toy leaf encoding: it exists to exercise the engine end-to-end (create a
//! log, append entries, inspect tree state, watch a checkpoint publish,
//! migrate a log from bundles) and is not itself part of the spec'd engine —
//! leaf encoding and checkpoint signing are both out of scope for the core
//! and are stubbed here with the simplest workable choices.

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use std::io::Read as _;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seqlog_core::{hash::hash_leaf, Entry};
use seqlog_posix::traits::{BundleHasher, CheckpointSigner, DefaultEntriesPath, EntriesPath};
use seqlog_posix::{Config, Storage};

#[derive(Parser, Debug)]
#[command(
    name = "seqlog",
    about = "POSIX-backed append-only tiled Merkle log, reference CLI",
    long_about = "Bootstraps, appends to, inspects, and migrates a seqlog \
        on the local filesystem. Leaf encoding here is a plain length-prefixed \
        byte string and checkpoints are a human-readable size:root line; a \
        real deployment supplies its own Entry and CheckpointSigner.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Create a new, empty log at `path`.
    Init {
        /// Directory to create the log under (must not already hold one).
        #[arg(long)]
        path: PathBuf,

        /// Checkpoint publish interval, in seconds (minimum 1).
        #[arg(long, default_value_t = 10)]
        checkpoint_interval_secs: u64,
    },

    /// Append one entry and print its assigned sequence number.
    Add {
        /// Path to an existing log.
        #[arg(long)]
        path: PathBuf,

        /// Literal payload bytes, taken as UTF-8. Mutually exclusive with
        /// `--file`; reads stdin if neither is given.
        #[arg(long)]
        data: Option<String>,

        /// Read the payload from this file instead of `--data`/stdin.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Print the currently committed `(size, root)`.
    State {
        /// Path to an existing log.
        #[arg(long)]
        path: PathBuf,
    },

    /// Open a log long enough to let the checkpoint publisher run once, then
    /// print the resulting checkpoint file.
    Checkpoint {
        /// Path to an existing log.
        #[arg(long)]
        path: PathBuf,
    },

    /// Copy every bundle from `source` into a fresh log at `target` and
    /// integrate them, verifying the rebuilt root matches the source's.
    Migrate {
        /// An existing, already-sequenced log to migrate from.
        #[arg(long)]
        source: PathBuf,

        /// Destination directory; must not already hold a log.
        #[arg(long)]
        target: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Init {
            path,
            checkpoint_interval_secs,
        } => init(path, checkpoint_interval_secs).await,
        Cmd::Add { path, data, file } => add(path, data, file).await,
        Cmd::State { path } => state(path).await,
        Cmd::Checkpoint { path } => checkpoint(path).await,
        Cmd::Migrate { source, target } => migrate(source, target).await,
    }
}

/// Initialize tracing with an env-driven filter (default INFO).
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_level(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

async fn init(path: PathBuf, checkpoint_interval_secs: u64) -> Result<()> {
    let config = Config {
        checkpoint_interval: Duration::from_secs(checkpoint_interval_secs.max(1)),
        checkpoint_signer: Some(std::sync::Arc::new(DemoSigner)),
        ..Config::default()
    };
    info!(path = %path.display(), "creating new log");
    let storage = Storage::open(path.clone(), true, config)
        .await
        .with_context(|| format!("creating log at {}", path.display()))?;
    let s = storage.state()?;
    storage.shutdown().await;
    println!(
        "Created log at {} (size={}, root={})",
        path.display(),
        s.size,
        hex(&s.root)
    );
    Ok(())
}

async fn add(path: PathBuf, data: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let payload = read_payload(data, file)?;
    let storage = open_existing(&path).await?;
    let fut = storage
        .add(Box::new(DemoEntry(payload)) as Box<dyn Entry>)
        .await;
    let index = fut.await.context("entry failed to sequence")?;
    storage.shutdown().await;
    println!("Assigned sequence number {index}");
    Ok(())
}

async fn state(path: PathBuf) -> Result<()> {
    let storage = open_existing(&path).await?;
    let s = storage.state()?;
    storage.shutdown().await;
    let out = serde_json::json!({ "size": s.size, "root": hex(&s.root) });
    println!("{out}");
    Ok(())
}

async fn checkpoint(path: PathBuf) -> Result<()> {
    let config = Config {
        checkpoint_interval: seqlog_posix::MIN_CHECKPOINT_INTERVAL,
        checkpoint_signer: Some(std::sync::Arc::new(DemoSigner)),
        ..Config::default()
    };
    let storage = Storage::open(path.clone(), false, config)
        .await
        .with_context(|| format!("opening log at {}", path.display()))?;
    // Give the publisher task one full interval to notice and republish.
    tokio::time::sleep(seqlog_posix::MIN_CHECKPOINT_INTERVAL + Duration::from_millis(100)).await;
    storage.shutdown().await;

    let bytes = std::fs::read(path.join("checkpoint")).context("reading checkpoint file")?;
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}

async fn migrate(source: PathBuf, target: PathBuf) -> Result<()> {
    let source_storage = open_existing(&source).await?;
    let source_state = source_storage.state()?;
    source_storage.shutdown().await;

    let config = Config {
        bundle_hasher: Some(std::sync::Arc::new(DemoBundleHasher)),
        checkpoint_signer: None, // migration targets never publish; see DESIGN.md
        ..Config::default()
    };
    let target_storage = Storage::open(target.clone(), true, config)
        .await
        .with_context(|| format!("creating migration target at {}", target.display()))?;
    let migration = target_storage
        .migration_target()
        .context("migration target requires a bundle hasher")?;

    copy_bundles(&source, &target, source_state.size)?;

    let cancel = tokio_util::sync::CancellationToken::new();
    loop {
        let committed = migration.build_tree()?;
        info!(size = committed.size, target = source_state.size, "migration cycle");
        if committed.size >= source_state.size {
            break;
        }
        tokio::select! {
            () = cancel.cancelled() => bail!("migration cancelled"),
            () = tokio::time::sleep(Duration::from_millis(50)) => {},
        }
    }
    let final_state = migration.await_integration(source_state.size, &cancel).await?;
    target_storage.shutdown().await;

    if final_state.root != source_state.root {
        bail!(
            "migrated root {} does not match source root {}",
            hex(&final_state.root),
            hex(&source_state.root)
        );
    }
    println!(
        "Migrated {} entries from {} to {}: root {} verified",
        final_state.size,
        source.display(),
        target.display(),
        hex(&final_state.root)
    );
    Ok(())
}

/// Copy every bundle (full and the trailing partial, if any) from `source`
/// into `target`, verbatim, by direct filesystem path — this CLI stands in
/// for whatever out-of-band bundle transport a real migration driver uses.
fn copy_bundles(source: &std::path::Path, target: &std::path::Path, size: u64) -> Result<()> {
    let path_fn = DefaultEntriesPath;
    let full_bundles = size / seqlog_core::TILE_WIDTH;
    let remainder = size % seqlog_core::TILE_WIDTH;

    for index in 0..full_bundles {
        let rel = path_fn.path(index, 0);
        let bytes = std::fs::read(source.join(&rel))
            .with_context(|| format!("reading source bundle {index}"))?;
        write_target_bundle(target, &rel, &bytes)?;
    }
    if remainder > 0 {
        let rel = path_fn.path(full_bundles, remainder as u8);
        let bytes = std::fs::read(source.join(&rel))
            .with_context(|| format!("reading source partial bundle {full_bundles}"))?;
        write_target_bundle(target, &rel, &bytes)?;
    }
    Ok(())
}

fn write_target_bundle(target: &std::path::Path, rel: &str, bytes: &[u8]) -> Result<()> {
    let dest = target.join(rel);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&dest, bytes)?;
    Ok(())
}

async fn open_existing(path: &std::path::Path) -> Result<Storage> {
    Storage::open(path.to_path_buf(), false, Config::default())
        .await
        .with_context(|| format!("opening log at {}", path.display()))
}

fn read_payload(data: Option<String>, file: Option<PathBuf>) -> Result<Vec<u8>> {
    match (data, file) {
        (Some(_), Some(_)) => bail!("pass only one of --data or --file"),
        (Some(d), None) => Ok(d.into_bytes()),
        (None, Some(f)) => std::fs::read(&f).with_context(|| format!("reading {}", f.display())),
        (None, None) => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("reading payload from stdin")?;
            Ok(buf)
        }
    }
}

fn hex(bytes: &[u8; 32]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A leaf payload framed with a 4-byte little-endian length prefix, so a
/// bundle's bytes can be re-split without an external index. Real callers
/// supply their own [`Entry`]; this is the simplest one that round-trips.
struct DemoEntry(Vec<u8>);

impl Entry for DemoEntry {
    fn serialize(&self, _index: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.0.len());
        out.extend_from_slice(&(self.0.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.0);
        out
    }

    fn leaf_hash(&self) -> [u8; 32] {
        hash_leaf(&self.0)
    }
}

/// Parses [`DemoEntry::serialize`]'s framing back into leaf hashes, for the
/// migration target.
struct DemoBundleHasher;

impl BundleHasher for DemoBundleHasher {
    fn hash(&self, bundle: &[u8]) -> seqlog_core::Result<Vec<[u8; 32]>> {
        let mut hashes = Vec::new();
        let mut rest = bundle;
        while !rest.is_empty() {
            if rest.len() < 4 {
                return Err(seqlog_core::Error::io(
                    "<bundle>",
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "truncated length prefix",
                    ),
                ));
            }
            let (len_bytes, tail) = rest.split_at(4);
            let len = u32::from_le_bytes(len_bytes.try_into().expect("exactly 4 bytes")) as usize;
            if tail.len() < len {
                return Err(seqlog_core::Error::io(
                    "<bundle>",
                    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated payload"),
                ));
            }
            let (payload, tail) = tail.split_at(len);
            hashes.push(hash_leaf(payload));
            rest = tail;
        }
        Ok(hashes)
    }
}

/// Renders a checkpoint as `size:hex(root)`. A real deployment signs this
/// with whatever key material its transparency ecosystem expects; this CLI
/// has no signing key to reach for, so it ships the unsigned commitment.
struct DemoSigner;

impl CheckpointSigner for DemoSigner {
    fn sign(&self, size: u64, root: [u8; 32]) -> seqlog_core::Result<Vec<u8>> {
        Ok(format!("{size}:{}\n", hex(&root)).into_bytes())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn demo_entry_round_trips_through_the_bundle_hasher() {
        let entries: Vec<DemoEntry> = vec![
            DemoEntry(b"alpha".to_vec()),
            DemoEntry(Vec::new()),
            DemoEntry(b"gamma-ray".to_vec()),
        ];
        let mut bundle = Vec::new();
        for (i, e) in entries.iter().enumerate() {
            bundle.extend_from_slice(&e.serialize(i as u64));
        }

        let hashes = DemoBundleHasher.hash(&bundle).unwrap();
        let expected: Vec<[u8; 32]> = entries.iter().map(Entry::leaf_hash).collect();
        assert_eq!(hashes, expected);
    }

    #[test]
    fn bundle_hasher_rejects_a_truncated_payload() {
        let mut bundle = 10u32.to_le_bytes().to_vec();
        bundle.extend_from_slice(b"short");
        assert!(DemoBundleHasher.hash(&bundle).is_err());
    }

    #[test]
    fn demo_signer_renders_size_and_hex_root() {
        let bytes = DemoSigner.sign(3, [0xab; 32]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, format!("3:{}\n", "ab".repeat(32)));
    }
}
