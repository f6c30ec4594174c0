//! POSIX atomic file primitives: exclusive-create-via-rename, advisory whole
//! file locks, and symlink-over-rename relinking.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use seqlog_core::{Error, Result};

/// Write `data` to `path` atomically: write to a sibling `.temp` file, then
/// `rename` onto `path`.
///
/// POSIX `rename(2)` replaces an existing regular-file destination
/// atomically, so a collision (e.g. a retried write) silently overwrites
/// rather than erroring. This crate does not verify byte-equality on
/// collision; see `DESIGN.md` for why.
pub fn create_exclusive(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent.display().to_string(), e))?;
        set_dir_mode(parent)?;
    }
    let tmp = sibling_with_suffix(path, ".temp");
    fs::write(&tmp, data).map_err(|e| Error::io(tmp.display().to_string(), e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path.display().to_string(), e))?;
    set_file_mode(path)?;
    Ok(())
}

/// An exclusive advisory whole-file lock, released when dropped.
///
/// The lock is per-process: closing *any* descriptor to this file within the
/// process releases it, so the underlying [`File`] must be held only for the
/// duration of the critical section and closed exactly once.
pub struct FileLock {
    file: Option<File>,
    path: PathBuf,
}

impl FileLock {
    /// Open (creating if absent) and lock `path`, blocking until acquired.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent.display().to_string(), e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io(path.display().to_string(), e))?;

        loop {
            match FileExt::lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(path.display().to_string(), e)),
            }
        }

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to unlock lock file");
            }
            drop(file);
        }
    }
}

/// Replace every existing partial-size sibling of `full_path` with a symlink
/// to it, so clients holding a URL to an old partial file still resolve to
/// identical bytes.
///
/// `full_path` is the full (non-partial) file that was just written;
/// siblings live under `full_path.p/<k>` for whichever sizes `k` were written
/// before promotion.
pub fn relink_partials(full_path: &Path) -> Result<()> {
    let partial_dir = sibling_with_suffix(full_path, ".p");
    let entries = match fs::read_dir(&partial_dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::io(partial_dir.display().to_string(), e)),
    };

    let tmp_link = sibling_with_suffix(full_path, ".link");
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(partial_dir.display().to_string(), e))?;
        let sibling = entry.path();

        // Idempotent: a previous crash mid-relink may have already replaced
        // this one.
        if sibling
            .symlink_metadata()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
        {
            continue;
        }

        if tmp_link.symlink_metadata().is_ok() {
            fs::remove_file(&tmp_link).map_err(|e| Error::io(tmp_link.display().to_string(), e))?;
        }
        std::os::unix::fs::symlink(full_path, &tmp_link)
            .map_err(|e| Error::io(tmp_link.display().to_string(), e))?;
        fs::rename(&tmp_link, &sibling).map_err(|e| Error::io(sibling.display().to_string(), e))?;
    }
    Ok(())
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

fn set_file_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
        .map_err(|e| Error::io(path.display().to_string(), e))
}

fn set_dir_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| Error::io(path.display().to_string(), e))
}
