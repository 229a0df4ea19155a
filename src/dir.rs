use crate::error::{ExecError, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Restores the recorded working directory when dropped.
struct RestoreDir {
    original: PathBuf,
}

impl Drop for RestoreDir {
    fn drop(&mut self) {
        if let Err(e) = env::set_current_dir(&self.original) {
            tracing::warn!(
                dir = %self.original.display(),
                error = %e,
                "could not restore working directory"
            );
        }
    }
}

/// Runs `f` with the process working directory temporarily set to `dir`.
///
/// If changing into `dir` fails, `f` is not called and the error is returned.
/// The original directory is restored afterwards even if `f` panics; a failed
/// restore is only logged.
///
/// The working directory is process-wide state: callers must not run this
/// concurrently with anything else that depends on it.
pub fn with_directory<P, F, T>(dir: P, f: F) -> Result<T>
where
    P: AsRef<Path>,
    F: FnOnce() -> T,
{
    let dir = dir.as_ref();
    let original = env::current_dir().map_err(|source| ExecError::WorkingDirectory {
        path: PathBuf::from("."),
        source,
    })?;

    env::set_current_dir(dir).map_err(|source| ExecError::WorkingDirectory {
        path: dir.to_path_buf(),
        source,
    })?;
    let _restore = RestoreDir { original };

    Ok(f())
}
