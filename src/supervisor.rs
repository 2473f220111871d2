//! Handing the process over to the server.
//!
//! The entrypoint never waits on a child: it replaces its own image with the
//! server launcher, so the container runtime's signals (sent to pid 1) reach
//! the server directly.

use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use tracing::{debug, info};

use crate::redact::SecretsRedactor;

/// PID marker file written inside the application home directory.
pub const PID_FILE_NAME: &str = "docker-app.pid";

/// Errors that prevent the launch.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The command path does not exist.
    #[error("command not found: {}", .0.display())]
    NotFound(PathBuf),
    /// The command exists but has no execute bit or is not a file.
    #[error("command is not executable: {}", .0.display())]
    NotExecutable(PathBuf),
    /// An argument contains an interior NUL byte.
    #[error("argument contains a NUL byte: {0:?}")]
    InvalidArgument(String),
    /// The PID file could not be written.
    #[error("failed to write pid file {}: {source}", path.display())]
    PidFile {
        /// PID file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// `execv` returned.
    #[error("failed to exec {}: {source}", command.display())]
    Exec {
        /// Command path.
        command: PathBuf,
        /// Underlying errno.
        #[source]
        source: Errno,
    },
}

/// What to launch and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Absolute path of the program.
    pub command: PathBuf,
    /// Arguments after argv[0].
    pub args: Vec<String>,
    /// Application home, where the PID file goes.
    pub home_dir: PathBuf,
    /// Human-readable name used in logs.
    pub app_name: String,
    /// Strip sensitive variables before exec.
    pub env_cleanup: bool,
}

impl LaunchSpec {
    /// Full argv, with the command path as argv[0].
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.command.display().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Location of the PID marker file.
    pub fn pid_file(&self) -> PathBuf {
        self.home_dir.join(PID_FILE_NAME)
    }
}

/// Ensure `path` is a regular file with at least one execute bit.
///
/// # Errors
///
/// Returns [`LaunchError::NotFound`] or [`LaunchError::NotExecutable`].
pub fn check_executable(path: &Path) -> Result<(), LaunchError> {
    let meta = std::fs::metadata(path).map_err(|_| LaunchError::NotFound(path.to_path_buf()))?;
    if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
        return Err(LaunchError::NotExecutable(path.to_path_buf()));
    }
    Ok(())
}

/// Write the current process id to the PID file in `home_dir`.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_pidfile(home_dir: &Path) -> Result<PathBuf, LaunchError> {
    let path = home_dir.join(PID_FILE_NAME);
    let pid = std::process::id();
    debug!(path = %path.display(), "writing pid file");
    std::fs::write(&path, pid.to_string()).map_err(|source| LaunchError::PidFile {
        path: path.clone(),
        source,
    })?;
    debug!(path = %path.display(), pid, "pid file written");
    Ok(path)
}

/// Write the PID file, optionally strip secrets, and exec the command.
///
/// Only returns on failure.
///
/// # Errors
///
/// Returns an error if the command is not executable, the PID file cannot be
/// written or `execv` fails.
pub fn launch(spec: &LaunchSpec, redactor: &SecretsRedactor) -> Result<Infallible, LaunchError> {
    debug!(app = %spec.app_name, command = ?spec.argv(), "preparing to execute application");
    check_executable(&spec.command)?;

    let argv = spec
        .argv()
        .into_iter()
        .map(|arg| CString::new(arg.clone()).map_err(|_| LaunchError::InvalidArgument(arg)))
        .collect::<Result<Vec<_>, _>>()?;
    let command = CString::new(spec.command.as_os_str().as_bytes())
        .map_err(|_| LaunchError::InvalidArgument(spec.command.display().to_string()))?;

    write_pidfile(&spec.home_dir)?;

    if spec.env_cleanup {
        redactor.redact_process_env();
    }

    info!(
        app = %spec.app_name,
        command = %spec.command.display(),
        args = ?spec.argv(),
        "running application"
    );
    debug!(
        env_cleanup = if spec.env_cleanup { "enabled" } else { "disabled" },
        "environment variables cleanup"
    );

    nix::unistd::execv(&command, &argv).map_err(|source| LaunchError::Exec {
        command: spec.command.clone(),
        source,
    })
}
