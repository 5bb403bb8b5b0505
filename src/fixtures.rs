//! Helpers for tests that depend on the process working directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error};

/// The working directory is process-wide, so guards take turns
static WORKING_DIR_LOCK: Mutex<()> = Mutex::new(());

/// Changes the working directory until dropped
///
/// The previous directory is restored when the guard goes out of scope, also
/// while unwinding from a failed assertion. Only one guard can exist at a
/// time; a second `change_to` blocks until the first guard is dropped.
///
/// ```rust,no_run
/// use pgtestdb::fixtures::WorkingDirGuard;
///
/// # fn example() -> anyhow::Result<()> {
/// let _cwd = WorkingDirGuard::change_to("tests/fixtures/migrations")?;
/// // relative paths now resolve from tests/fixtures/migrations
/// # Ok(())
/// # }
/// ```
#[must_use = "the previous directory is restored as soon as the guard is dropped"]
pub struct WorkingDirGuard {
    previous: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl WorkingDirGuard {
    pub fn change_to(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // A panic in another guarded test poisons the lock, but the directory
        // was still restored by that guard's Drop
        let lock = WORKING_DIR_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let previous =
            std::env::current_dir().context("Failed to read the current working directory")?;
        std::env::set_current_dir(path)
            .with_context(|| format!("Failed to change directory to {}", path.display()))?;
        debug!("Changed working directory to {}", path.display());

        Ok(Self {
            previous,
            _lock: lock,
        })
    }

    /// Directory that will be restored on drop
    pub fn previous(&self) -> &Path {
        &self.previous
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.previous) {
            error!(
                "Failed to restore working directory {}: {}",
                self.previous.display(),
                e
            );
        }
    }
}
