//! Ownership and permission policy for generated files and directories.
//!
//! Applying ownership is best-effort: deployments that run without
//! `CAP_CHOWN` still need the server to start, so EPERM/EACCES are logged
//! and reported as [`PermOutcome::PermissionDenied`]. Anything else is an
//! error.

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::unistd::{Gid, Group, Uid, User};
use tracing::{debug, warn};

/// Errors that abort permission handling.
#[derive(Debug, thiserror::Error)]
pub enum PermError {
    /// The owning user does not exist in the user database.
    #[error("unknown user: {0}")]
    UnknownUser(String),
    /// The owning group does not exist in the group database.
    #[error("unknown group: {0}")]
    UnknownGroup(String),
    /// The user/group database lookup itself failed.
    #[error("failed to look up {name}: {source}")]
    Lookup {
        /// Name being resolved.
        name: String,
        /// Underlying errno.
        #[source]
        source: Errno,
    },
    /// An I/O failure other than a permission problem.
    #[error("failed to set permissions on {}: {source}", path.display())]
    Io {
        /// Path being modified.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Result of applying a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermOutcome {
    /// Ownership and mode were applied everywhere.
    Applied,
    /// At least one chown/chmod was refused; a warning was logged.
    PermissionDenied,
}

impl PermOutcome {
    fn merge(self, other: Self) -> Self {
        if self == Self::PermissionDenied || other == Self::PermissionDenied {
            Self::PermissionDenied
        } else {
            Self::Applied
        }
    }
}

/// A `user:group` owner plus numeric mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    /// Owning user name.
    pub user: String,
    /// Owning group name.
    pub group: String,
    /// Permission bits, e.g. `0o644`.
    pub mode: u32,
}

impl Ownership {
    /// Create a policy.
    pub fn new(user: impl Into<String>, group: impl Into<String>, mode: u32) -> Self {
        Self {
            user: user.into(),
            group: group.into(),
            mode,
        }
    }

    /// `root:root` with the given mode.
    pub fn root(mode: u32) -> Self {
        Self::new("root", "root", mode)
    }

    /// Resolve user and group names to numeric ids.
    ///
    /// # Errors
    ///
    /// Returns [`PermError::UnknownUser`] / [`PermError::UnknownGroup`] for
    /// names that do not resolve.
    pub fn resolve(&self) -> Result<(Uid, Gid), PermError> {
        let user = User::from_name(&self.user)
            .map_err(|source| PermError::Lookup {
                name: self.user.clone(),
                source,
            })?
            .ok_or_else(|| PermError::UnknownUser(self.user.clone()))?;
        let group = Group::from_name(&self.group)
            .map_err(|source| PermError::Lookup {
                name: self.group.clone(),
                source,
            })?
            .ok_or_else(|| PermError::UnknownGroup(self.group.clone()))?;
        Ok((user.uid, group.gid))
    }

    /// Apply owner and mode to a single path.
    ///
    /// # Errors
    ///
    /// Returns an error for unresolvable names and non-permission I/O failures.
    pub fn apply(&self, path: &Path) -> Result<PermOutcome, PermError> {
        let (uid, gid) = self.resolve()?;
        self.apply_ids(path, uid, gid)
    }

    /// Apply owner and mode to `path` and, for a directory, everything below it.
    ///
    /// `path` itself is resolved normally. Symlinks found below it are
    /// neither modified nor followed.
    ///
    /// # Errors
    ///
    /// See [`Ownership::apply`].
    pub fn apply_tree(&self, path: &Path) -> Result<PermOutcome, PermError> {
        let (uid, gid) = self.resolve()?;
        debug!(
            path = %path.display(),
            user = %self.user,
            group = %self.group,
            mode = format_args!("{:o}", self.mode),
            "setting permissions for tree"
        );
        let outcome = self.apply_ids(path, uid, gid)?;
        let meta = fs::metadata(path).map_err(|source| PermError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if !meta.is_dir() {
            return Ok(outcome);
        }
        Ok(outcome.merge(self.apply_children(path, uid, gid)?))
    }

    fn apply_children(&self, dir: &Path, uid: Uid, gid: Gid) -> Result<PermOutcome, PermError> {
        let io_err = |source| PermError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut outcome = PermOutcome::Applied;
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let child = entry.path();
            // file_type() comes from the directory entry and never follows links.
            let file_type = entry.file_type().map_err(|source| PermError::Io {
                path: child.clone(),
                source,
            })?;
            if file_type.is_symlink() {
                debug!(path = %child.display(), "skipping symlink");
                continue;
            }
            outcome = outcome.merge(self.apply_ids(&child, uid, gid)?);
            if file_type.is_dir() {
                outcome = outcome.merge(self.apply_children(&child, uid, gid)?);
            }
        }
        Ok(outcome)
    }

    fn apply_ids(&self, path: &Path, uid: Uid, gid: Gid) -> Result<PermOutcome, PermError> {
        debug!(path = %path.display(), "setting permissions");
        let mut outcome = PermOutcome::Applied;

        match nix::unistd::chown(path, Some(uid), Some(gid)) {
            Ok(()) => {}
            Err(Errno::EPERM | Errno::EACCES) => {
                warn!(
                    path = %path.display(),
                    user = %self.user,
                    group = %self.group,
                    "could not chown path due to insufficient permissions"
                );
                outcome = PermOutcome::PermissionDenied;
            }
            Err(errno) => {
                return Err(PermError::Io {
                    path: path.to_path_buf(),
                    source: io::Error::from(errno),
                })
            }
        }

        match fs::set_permissions(path, fs::Permissions::from_mode(self.mode)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(
                    path = %path.display(),
                    mode = format_args!("{:o}", self.mode),
                    "could not chmod path due to insufficient permissions"
                );
                outcome = PermOutcome::PermissionDenied;
            }
            Err(source) => {
                return Err(PermError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }

        Ok(outcome)
    }
}

/// Returns `true` when `path` is owned by `uid:gid` and has every bit of `mode` set.
///
/// # Errors
///
/// Returns an error if the path cannot be inspected.
pub fn check_perms(path: &Path, uid: Uid, gid: Gid, mode: u32) -> io::Result<bool> {
    let meta = fs::metadata(path)?;
    let result = meta.uid() == uid.as_raw() && meta.gid() == gid.as_raw() && meta.mode() & mode == mode;
    debug!(path = %path.display(), result, "permissions check");
    Ok(result)
}
