use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

/// Process-wide single-instance guard. Released, and its lock file removed,
/// on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    #[cfg(unix)]
    _guard: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl InstanceLock {
    /// Locks `{temp}/{label}.lock`.
    pub fn acquire(label: &str) -> Result<Self> {
        Self::acquire_at(std::env::temp_dir().join(format!("{label}.lock")))
    }

    #[cfg(unix)]
    pub fn acquire_at(path: impl Into<PathBuf>) -> Result<Self> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open lock file {}", path.display()))?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(guard) => {
                debug!(path = %path.display(), "instance lock acquired");
                Ok(Self {
                    path,
                    _guard: guard,
                })
            }
            Err((_, Errno::EWOULDBLOCK)) => {
                bail!("already running (lock held on {})", path.display())
            }
            Err((_, errno)) => Err(errno)
                .with_context(|| format!("failed to lock {}", path.display())),
        }
    }

    #[cfg(not(unix))]
    pub fn acquire_at(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => Ok(Self { path, _file: file }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                bail!("already running (lock file {} exists)", path.display())
            }
            Err(err) => {
                Err(err).with_context(|| format!("failed to create lock file {}", path.display()))
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to remove lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_lock_reports_already_running() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("changer.lock");
        let first = InstanceLock::acquire_at(&path).unwrap();
        let err = InstanceLock::acquire_at(&path).unwrap_err();
        assert!(err.to_string().contains("already running"));
        drop(first);
        assert!(!path.exists());
        let again = InstanceLock::acquire_at(&path).unwrap();
        assert_eq!(again.path(), path.as_path());
    }
}
