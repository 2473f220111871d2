//! The startup sequence.
//!
//! Environment -> config files -> JVM flags -> privilege drop -> secret
//! stripping -> exec. Runs once per container start, strictly in order.

use std::convert::Infallible;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::bamboo::{self, BambooError, BambooSettings};
use crate::config::EntrypointConfig;
use crate::env::Environment;
use crate::jvm::{JvmArgs, JVM_ARGS_ENV};
use crate::materialize::{Materialized, MaterializeError, Materializer};
use crate::privilege::{self, PrivilegeError};
use crate::redact::{RedactError, SecretsRedactor};
use crate::supervisor::{self, LaunchError, LaunchSpec};
use crate::template::Renderer;

/// Any fatal startup failure.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Bad or missing settings.
    #[error(transparent)]
    Settings(#[from] BambooError),
    /// The container identifier file exists but is unreadable.
    #[error("failed to read container id: {0}")]
    ContainerId(#[source] std::io::Error),
    /// A config file could not be generated.
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    /// Dropping privileges failed.
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),
    /// The secrets allow-list is invalid.
    #[error(transparent)]
    Redact(#[from] RedactError),
    /// The server could not be launched.
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Everything produced before the privilege drop.
#[derive(Debug)]
pub struct Prepared {
    /// Environment after derived keys were added.
    pub env: Environment,
    /// Settings read from it.
    pub settings: BambooSettings,
    /// Accumulated JVM flags, not yet exported.
    pub jvm: JvmArgs,
    /// Outcome per generated file, in order.
    pub generated: Vec<(PathBuf, Materialized)>,
    /// The launch that follows.
    pub launch: LaunchSpec,
}

/// Generate every config file and work out the JVM flags and launch command.
///
/// Touches only the filesystem; the process environment and identity are
/// left alone.
///
/// # Errors
///
/// Returns the first fatal error.
pub fn generate(config: &EntrypointConfig, mut env: Environment) -> Result<Prepared, PipelineError> {
    env.assign_container_id(&config.paths.container_id)
        .map_err(PipelineError::ContainerId)?;
    let settings = BambooSettings::from_env(&env)?;

    if !settings.skip_config {
        bamboo::ensure_build_number(&mut env, &config.paths.manifest)?;
    }

    let renderer = Renderer::new(&config.paths.template_dir);
    let materializer = Materializer::new(&renderer, settings.force_cfg_update);
    let artifacts = bamboo::artifacts(&settings);
    let generated = materializer
        .materialize_all(&artifacts, &env)?
        .into_iter()
        .map(|(path, outcome)| (path.to_path_buf(), outcome))
        .collect();

    let mut jvm = JvmArgs::new(env.get(JVM_ARGS_ENV).map(str::to_owned));
    bamboo::add_jvm_args(&settings, &mut jvm);
    debug!(jvm_args = jvm.as_str(), "JVM arguments accumulated");

    let launch = LaunchSpec {
        command: settings.start_command(&config.app.start_script),
        args: config.app.start_args.clone(),
        home_dir: settings.home.clone(),
        app_name: config.app.name.clone(),
        env_cleanup: config.app.env_cleanup,
    };

    Ok(Prepared {
        env,
        settings,
        jvm,
        generated,
        launch,
    })
}

/// Run the whole sequence, ending in process replacement.
///
/// # Errors
///
/// Only returns on failure.
pub fn run(config: &EntrypointConfig) -> Result<Infallible, PipelineError> {
    let prepared = generate(config, Environment::load())?;
    info!(
        files = prepared.generated.len(),
        "configuration generated"
    );
    prepared.jvm.export();

    let settings = &prepared.settings;
    if let Some(dropped) = privilege::prepare_and_drop(
        &settings.home,
        &settings.run_user,
        &settings.run_group,
        settings.set_permissions,
    )? {
        debug!(user = %dropped.identity().name, "running unprivileged");
    }

    let redactor = SecretsRedactor::from_env()?;
    supervisor::launch(&prepared.launch, &redactor).map_err(PipelineError::from)
}
