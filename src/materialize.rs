//! Config file materialization.
//!
//! A [`ConfigArtifact`] names a template, a target path and the ownership
//! policy for the result. [`Materializer::materialize`] renders and writes it
//! unless the artifact preserves existing files and the target is already
//! there, which is how user edits survive container restarts.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::env::Environment;
use crate::perms::{Ownership, PermError, PermOutcome};
use crate::template::{Renderer, TemplateError};

/// Default mode for generated files.
pub const DEFAULT_MODE: u32 = 0o644;

/// Errors that abort materialization.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    /// Rendering failed.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// Ownership could not be resolved or applied.
    #[error(transparent)]
    Permissions(#[from] PermError),
    /// Writing failed for a reason other than permissions.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// One generated configuration file and its policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigArtifact {
    /// Template name inside the template directory.
    pub template: String,
    /// Where the rendered file is written.
    pub target: PathBuf,
    /// Ownership and mode applied after writing.
    pub ownership: Ownership,
    /// Replace an existing target.
    pub overwrite: bool,
    /// Extra variables layered over the environment for this artifact only.
    pub extras: BTreeMap<String, String>,
}

impl ConfigArtifact {
    /// Artifact owned by `root:root`, mode `0644`, overwriting existing files.
    pub fn new(template: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            target: target.into(),
            ownership: Ownership::root(DEFAULT_MODE),
            overwrite: true,
            extras: BTreeMap::new(),
        }
    }

    /// Set the owning user and group.
    #[must_use]
    pub fn owned_by(mut self, user: impl Into<String>, group: impl Into<String>) -> Self {
        self.ownership.user = user.into();
        self.ownership.group = group.into();
        self
    }

    /// Set the permission bits.
    #[must_use]
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.ownership.mode = mode;
        self
    }

    /// Keep an existing target instead of regenerating it.
    #[must_use]
    pub fn preserve_existing(mut self) -> Self {
        self.overwrite = false;
        self
    }

    /// Add a template variable for this artifact.
    #[must_use]
    pub fn with_var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extras.insert(key.to_lowercase(), value.into());
        self
    }
}

/// What happened to an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// The file was written; carries the result of applying ownership.
    Written(PermOutcome),
    /// The target existed and overwriting was disabled.
    Skipped,
    /// Writing was refused by the filesystem; a warning was logged.
    WriteDenied,
}

/// Renders and writes [`ConfigArtifact`]s.
#[derive(Debug)]
pub struct Materializer<'a> {
    renderer: &'a Renderer,
    force_overwrite: bool,
}

impl<'a> Materializer<'a> {
    /// Create a materializer.
    ///
    /// With `force_overwrite` every artifact is regenerated, including those
    /// that normally preserve an existing file.
    pub fn new(renderer: &'a Renderer, force_overwrite: bool) -> Self {
        Self {
            renderer,
            force_overwrite,
        }
    }

    /// Materialize one artifact.
    ///
    /// # Errors
    ///
    /// Rendering failures, unresolvable owners and non-permission I/O errors
    /// are fatal. Permission problems are logged and reported in the outcome.
    pub fn materialize(
        &self,
        artifact: &ConfigArtifact,
        env: &Environment,
    ) -> Result<Materialized, MaterializeError> {
        let target = artifact.target.as_path();
        let overwrite = artifact.overwrite || self.force_overwrite;
        debug!(
            target = %target.display(),
            template = %artifact.template,
            overwrite,
            "starting to generate config"
        );

        if !overwrite && target.exists() {
            info!(target = %target.display(), "target exists; skipping");
            return Ok(Materialized::Skipped);
        }

        info!(
            target = %target.display(),
            template = %artifact.template,
            "generating config from template"
        );
        let rendered = if artifact.extras.is_empty() {
            self.renderer.render(&artifact.template, env)?
        } else {
            let mut vars = env.as_map().clone();
            vars.extend(artifact.extras.clone());
            self.renderer.render_map(&artifact.template, &vars)?
        };

        if let Err(e) = std::fs::write(target, rendered) {
            if e.kind() == io::ErrorKind::PermissionDenied {
                warn!(target = %target.display(), error = %e, "permission problem writing config; skipping");
                return Ok(Materialized::WriteDenied);
            }
            return Err(MaterializeError::Write {
                path: target.to_path_buf(),
                source: e,
            });
        }

        let outcome = artifact.ownership.apply_tree(target)?;
        debug!(target = %target.display(), ?outcome, "finished setting permissions");
        Ok(Materialized::Written(outcome))
    }

    /// Materialize several artifacts in order, stopping at the first fatal error.
    ///
    /// # Errors
    ///
    /// See [`Materializer::materialize`].
    pub fn materialize_all<'b, I>(
        &self,
        artifacts: I,
        env: &Environment,
    ) -> Result<Vec<(&'b Path, Materialized)>, MaterializeError>
    where
        I: IntoIterator<Item = &'b ConfigArtifact>,
    {
        artifacts
            .into_iter()
            .map(|artifact| {
                self.materialize(artifact, env)
                    .map(|outcome| (artifact.target.as_path(), outcome))
            })
            .collect()
    }
}
