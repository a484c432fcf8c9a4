use std::fs::{File, TryLockError};
use std::io;
use std::path::Path;

use log::{debug, warn};
use tempfile::TempDir;

const AREA_PREFIX: &str = "area-";
const LOCK_FILE: &str = ".owner";
const CREATE_ATTEMPTS: usize = 3;

/// A private directory for the spill and result files of one owner, below a root shared with other owners.
///
/// The area holds an exclusive lock on a file inside it for as long as it's alive. The operating system drops that
/// lock when the owning process dies, which is how [`sweep_abandoned_areas`] tells abandoned areas from live ones.
/// The directory and everything in it is removed when the area is dropped.
///
pub struct SpillArea {
    _lock: File,
    dir: TempDir,
}

impl SpillArea {
    /// Creates a new, locked area below `root`, creating `root` if needed.
    ///
    pub fn create_in(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;

        for _ in 0..CREATE_ATTEMPTS {
            let dir = tempfile::Builder::new().prefix(AREA_PREFIX).tempdir_in(root)?;
            let lock_path = dir.path().join(LOCK_FILE);
            let lock = File::create(&lock_path)?;
            match lock.try_lock() {
                // A sweep may have taken the lock and removed the area in between
                Ok(()) if lock_path.exists() => {
                    debug!(" - created spill area {}", dir.path().display());
                    return Ok(Self { dir, _lock: lock });
                }
                Ok(()) | Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Error(err)) => return Err(err),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            format!("unable to claim a spill area in {}", root.display()),
        ))
    }

    /// Location of the area.
    ///
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Removes the areas below `root` whose owner is gone, together with all files left in them.
///
/// Areas that are still locked by a live owner are left alone. A missing root is not an error.
///
/// # Returns
///
/// The number of areas removed.
///
pub fn sweep_abandoned_areas(root: impl AsRef<Path>) -> io::Result<usize> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        let is_area = path.is_dir()
            && path.file_name().map_or(false, |name| name.to_string_lossy().starts_with(AREA_PREFIX));
        if !is_area {
            continue;
        }

        // Without a lock file, the area is still being set up
        let Ok(lock) = File::open(path.join(LOCK_FILE)) else {
            continue;
        };
        match lock.try_lock() {
            // Keep holding the lock while removing, so a new owner can't claim the area halfway
            Ok(()) => match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    debug!(" - removed abandoned spill area {}", path.display());
                    removed += 1;
                }
                Err(err) => warn!("Unable to remove abandoned spill area {}: {}", path.display(), err),
            },
            Err(TryLockError::WouldBlock) => {}
            Err(TryLockError::Error(err)) => warn!("Unable to lock spill area {}: {}", path.display(), err),
        }
    }
    Ok(removed)
}
