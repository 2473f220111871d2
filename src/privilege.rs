//! Dropping root before the server starts.
//!
//! The transition is a typestate: a [`Privileged`] token only exists while
//! the process runs as root, and [`Privileged::drop_to`] consumes it. Once a
//! [`Dropped`] is returned no further transition can be expressed.
//!
//! Group must be set before user: after `setuid` the process no longer has
//! the privilege to change its group.

use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::unistd::{Gid, Uid, User};
use tracing::{debug, info};

use crate::perms::{check_perms, Ownership, PermError, PermOutcome};

/// Mode enforced on the application home directory.
pub const HOME_MODE: u32 = 0o700;

/// Errors raised while preparing or dropping privileges.
#[derive(Debug, thiserror::Error)]
pub enum PrivilegeError {
    /// The run user does not exist.
    #[error("unknown user: {0}")]
    UnknownUser(String),
    /// User database lookup failed.
    #[error("failed to look up user {name}: {source}")]
    Lookup {
        /// User name.
        name: String,
        /// Underlying errno.
        #[source]
        source: Errno,
    },
    /// The home directory could not be inspected.
    #[error("failed to inspect {}: {source}", path.display())]
    Inspect {
        /// Home directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Normalizing home directory ownership failed.
    #[error(transparent)]
    Permissions(#[from] PermError),
    /// A credential-changing syscall failed.
    #[error("{call} failed: {source}")]
    Syscall {
        /// The call that failed.
        call: &'static str,
        /// Underlying errno.
        #[source]
        source: Errno,
    },
    /// The process ids do not match the target after the transition.
    #[error("identity verification failed: expected {expected}, got {actual}")]
    Verification {
        /// Expected `uid:gid`.
        expected: String,
        /// Observed `uid:gid`.
        actual: String,
    },
}

/// The unprivileged identity the server runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    /// User name.
    pub name: String,
    /// User id.
    pub uid: Uid,
    /// Primary group id.
    pub gid: Gid,
    /// Home directory from the user database.
    pub home: PathBuf,
    /// Login shell from the user database.
    pub shell: PathBuf,
}

impl RunIdentity {
    /// Resolve a user name through the system user database.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegeError::UnknownUser`] when the name does not resolve.
    pub fn resolve(name: &str) -> Result<Self, PrivilegeError> {
        let user = User::from_name(name)
            .map_err(|source| PrivilegeError::Lookup {
                name: name.to_owned(),
                source,
            })?
            .ok_or_else(|| PrivilegeError::UnknownUser(name.to_owned()))?;
        Ok(Self {
            name: name.to_owned(),
            uid: user.uid,
            gid: user.gid,
            home: user.dir,
            shell: user.shell,
        })
    }

    /// Identity-related variables to export after the drop.
    pub fn env_vars(&self) -> [(&'static str, String); 4] {
        [
            ("USER", self.name.clone()),
            ("HOME", self.home.display().to_string()),
            ("SHELL", self.shell.display().to_string()),
            ("LOGNAME", self.name.clone()),
        ]
    }
}

/// Proof that the process currently runs as root.
#[derive(Debug)]
pub struct Privileged {
    _private: (),
}

/// Proof that privileges were permanently dropped.
#[derive(Debug)]
pub struct Dropped {
    identity: RunIdentity,
}

impl Dropped {
    /// The identity now in effect.
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }
}

impl Privileged {
    /// Returns a token when the effective user is root.
    pub fn detect() -> Option<Self> {
        nix::unistd::geteuid()
            .is_root()
            .then_some(Self { _private: () })
    }

    /// Give `home_dir` to the run user with mode 0700 unless it already is.
    ///
    /// Returns `None` when nothing needed changing.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be inspected or the owner
    /// cannot be resolved.
    pub fn prepare_home(
        &self,
        home_dir: &Path,
        ownership: &Ownership,
    ) -> Result<Option<PermOutcome>, PrivilegeError> {
        debug!(home = %home_dir.display(), "checking permissions for home directory");
        let (uid, gid) = ownership.resolve()?;
        let ok = check_perms(home_dir, uid, gid, ownership.mode).map_err(|source| {
            PrivilegeError::Inspect {
                path: home_dir.to_path_buf(),
                source,
            }
        })?;
        if ok {
            return Ok(None);
        }

        debug!(home = %home_dir.display(), "home directory permissions differ, updating");
        let outcome = ownership.apply_tree(home_dir)?;
        info!(
            home = %home_dir.display(),
            user = %ownership.user,
            "changed home directory ownership"
        );
        Ok(Some(outcome))
    }

    /// Permanently switch to `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error if any credential call fails or the resulting ids do
    /// not match.
    pub fn drop_to(self, identity: RunIdentity) -> Result<Dropped, PrivilegeError> {
        info!(user = %identity.name, "user is currently root, downgrading run user");
        for (key, value) in identity.env_vars() {
            std::env::set_var(key, value);
        }

        debug!(
            user = %identity.name,
            uid = identity.uid.as_raw(),
            gid = identity.gid.as_raw(),
            "attempting to drop root privileges"
        );

        #[cfg(target_os = "linux")]
        nix::unistd::setgroups(&[identity.gid]).map_err(|source| PrivilegeError::Syscall {
            call: "setgroups",
            source,
        })?;
        nix::unistd::setgid(identity.gid).map_err(|source| PrivilegeError::Syscall {
            call: "setgid",
            source,
        })?;
        nix::unistd::setuid(identity.uid).map_err(|source| PrivilegeError::Syscall {
            call: "setuid",
            source,
        })?;

        verify(&identity)?;
        debug!(
            user = %identity.name,
            uid = identity.uid.as_raw(),
            gid = identity.gid.as_raw(),
            "successfully dropped root privileges"
        );
        Ok(Dropped { identity })
    }
}

fn verify(identity: &RunIdentity) -> Result<(), PrivilegeError> {
    use nix::unistd::{getegid, geteuid, getgid, getuid};

    let ids = [getuid(), geteuid()];
    let gids = [getgid(), getegid()];
    if ids.iter().any(|uid| *uid != identity.uid) || gids.iter().any(|gid| *gid != identity.gid) {
        return Err(PrivilegeError::Verification {
            expected: format!("{}:{}", identity.uid, identity.gid),
            actual: format!("{}/{}:{}/{}", ids[0], ids[1], gids[0], gids[1]),
        });
    }
    Ok(())
}

/// Normalize the home directory and drop to `run_user` when running as root.
///
/// Returns `None` when the process was not privileged; in that case it is
/// assumed to already run as the right user and nothing is changed.
///
/// # Errors
///
/// Returns an error if the user is unknown or the transition fails.
pub fn prepare_and_drop(
    home_dir: &Path,
    run_user: &str,
    run_group: &str,
    set_permissions: bool,
) -> Result<Option<Dropped>, PrivilegeError> {
    let Some(privileged) = Privileged::detect() else {
        debug!("not running as root, skipping privilege drop");
        return Ok(None);
    };

    let identity = RunIdentity::resolve(run_user)?;
    if set_permissions {
        let ownership = Ownership::new(run_user, run_group, HOME_MODE);
        privileged.prepare_home(home_dir, &ownership)?;
    }
    privileged.drop_to(identity).map(Some)
}
