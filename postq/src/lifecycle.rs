//! Pid-file ownership for a running daemon.

use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use postq_common::{internal, tracing};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("The pid file {path} exists and postq is already running as pid {pid}")]
    AlreadyRunning { path: String, pid: i32 },

    #[error("Unable to manage pid file {path}: {source}")]
    PidFile {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Owns the pid file for as long as it is alive
///
/// The file is written on [`ProcessLifecycle::start`] and removed when the
/// value is dropped, whichever way the daemon exits.
#[derive(Debug)]
pub struct ProcessLifecycle {
    pid_file: PathBuf,
}

impl ProcessLifecycle {
    /// Claim `pid_file` for this process
    ///
    /// A pid file naming a live process stops startup. One left behind by a
    /// process that has gone away is removed first.
    ///
    /// # Errors
    /// [`LifecycleError::AlreadyRunning`] if another instance holds the file,
    /// or an I/O error reading or writing it
    pub fn start(pid_file: impl Into<PathBuf>) -> Result<Self, LifecycleError> {
        let pid_file = pid_file.into();
        let error = |source: io::Error| LifecycleError::PidFile {
            path: pid_file.display().to_string(),
            source,
        };

        match fs::read_to_string(&pid_file) {
            Ok(contents) => match contents.trim().parse::<i32>() {
                Ok(pid) if is_running(pid) => {
                    return Err(LifecycleError::AlreadyRunning {
                        path: pid_file.display().to_string(),
                        pid,
                    });
                }
                _ => {
                    tracing::warn!(
                        pid_file = %pid_file.display(),
                        "postq is not running, removing stale pid file"
                    );
                    fs::remove_file(&pid_file).map_err(error)?;
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(error(e)),
        }

        if let Some(parent) = pid_file.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(error)?;
        }
        fs::write(&pid_file, format!("{}\n", std::process::id())).map_err(error)?;

        internal!(level = DEBUG, "Wrote pid file {}", pid_file.display());
        Ok(Self { pid_file })
    }

    #[must_use]
    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }
}

impl Drop for ProcessLifecycle {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.pid_file)
            && e.kind() != ErrorKind::NotFound
        {
            tracing::warn!(
                pid_file = %self.pid_file.display(),
                "Unable to remove pid file: {e}"
            );
        }
    }
}

/// Whether `pid` names a live process
///
/// Non-positive values address process groups rather than a single process,
/// so they never count.
fn is_running(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 performs only the existence and permission checks
    #[allow(unsafe_code)]
    let result = unsafe { libc::kill(pid, 0) };

    result == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
