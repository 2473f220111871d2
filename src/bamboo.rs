//! Bamboo server settings and the config files generated for it.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::env::{EnvError, Environment};
use crate::jvm::JvmArgs;
use crate::manifest::{self, ManifestError};
use crate::materialize::ConfigArtifact;

/// JVM flag keeping repository-stored specs from running Docker in Docker.
pub const RSS_IN_DOCKER_FLAG: &str = "-Dbamboo.setup.rss.in.docker=false";

/// JVM flag disabling remote agent authentication.
pub const DISABLE_AGENT_AUTH_FLAG: &str = "-Dbamboo.setup.remote.agent.authentication.enabled=false";

/// Errors building the Bamboo plan.
#[derive(Debug, thiserror::Error)]
pub enum BambooError {
    /// A required variable is missing.
    #[error(transparent)]
    Env(#[from] EnvError),
    /// The build number could not be determined.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    /// `ATL_DB_TYPE` is not a plain identifier.
    #[error("invalid database type: {0:?}")]
    InvalidDbType(String),
}

/// Settings read from the container environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BambooSettings {
    /// User the server runs as.
    pub run_user: String,
    /// Group the server runs as.
    pub run_group: String,
    /// Installation directory.
    pub install_dir: PathBuf,
    /// Bamboo home directory.
    pub home: PathBuf,
    /// Database type selecting the defaults template.
    pub db_type: Option<String>,
    /// Leave `bamboo.cfg.xml` alone entirely.
    pub skip_config: bool,
    /// Generate the unattended setup pre-seeding file.
    pub unattended_setup: bool,
    /// Disable remote agent authentication.
    pub disable_agent_auth: bool,
    /// Regenerate files that are normally preserved.
    pub force_cfg_update: bool,
    /// Normalize home directory ownership before dropping root.
    pub set_permissions: bool,
}

impl BambooSettings {
    /// Read settings from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or `ATL_DB_TYPE`
    /// is not a plain identifier.
    pub fn from_env(env: &Environment) -> Result<Self, BambooError> {
        let db_type = env.get("atl_db_type").map(str::to_owned);
        if let Some(db) = &db_type {
            let valid = !db.is_empty()
                && db
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(BambooError::InvalidDbType(db.clone()));
            }
        }

        Ok(Self {
            run_user: env.require("run_user")?.to_owned(),
            run_group: env.require("run_group")?.to_owned(),
            install_dir: PathBuf::from(env.require("bamboo_install_dir")?),
            home: PathBuf::from(env.require("bamboo_home")?),
            db_type,
            skip_config: env.flag("atl_bamboo_skip_config"),
            unattended_setup: env.flag_or("atl_bamboo_enable_unattended_setup", false),
            disable_agent_auth: env.flag("atl_bamboo_disable_agent_auth"),
            force_cfg_update: env.flag("atl_force_cfg_update"),
            set_permissions: env.flag_or("set_permissions", true),
        })
    }

    /// `<install>/atlassian-bamboo/WEB-INF/classes`.
    pub fn classes_dir(&self) -> PathBuf {
        self.install_dir.join("atlassian-bamboo/WEB-INF/classes")
    }

    /// Location of the unattended setup properties file.
    pub fn unattended_setup_file(&self) -> PathBuf {
        self.home.join("unattended-setup.properties")
    }

    /// Server launcher path.
    pub fn start_command(&self, start_script: &Path) -> PathBuf {
        self.install_dir.join(start_script)
    }
}

/// Make sure `build_number` is set, reading the manifest unless overridden.
///
/// # Errors
///
/// Returns an error if the manifest is needed and unusable.
pub fn ensure_build_number(env: &mut Environment, manifest_path: &Path) -> Result<(), BambooError> {
    if env.contains("build_number") {
        return Ok(());
    }
    let build_number = manifest::read_build_number(manifest_path)?;
    info!(build_number = %build_number, "build number read from manifest");
    env.insert("build_number", &build_number);
    Ok(())
}

/// Every config file generated for this container, in order.
pub fn artifacts(settings: &BambooSettings) -> Vec<ConfigArtifact> {
    let classes = settings.classes_dir();
    let mut artifacts = vec![
        ConfigArtifact::new("server.xml.j2", settings.install_dir.join("conf/server.xml")),
        ConfigArtifact::new("seraph-config.xml.j2", classes.join("seraph-config.xml")),
        ConfigArtifact::new(
            "bamboo-init.properties.j2",
            classes.join("bamboo-init.properties"),
        ),
    ];

    if !settings.skip_config {
        artifacts.push(
            ConfigArtifact::new("bamboo.cfg.xml.j2", settings.home.join("bamboo.cfg.xml"))
                .owned_by(&settings.run_user, &settings.run_group)
                .preserve_existing(),
        );
    }

    if let Some(db) = &settings.db_type {
        artifacts.push(ConfigArtifact::new(
            format!("{db}.properties.j2"),
            classes.join(format!("database-defaults/{db}.properties")),
        ));
    }

    if settings.unattended_setup {
        artifacts.push(
            ConfigArtifact::new(
                "unattended-setup.properties.j2",
                settings.unattended_setup_file(),
            )
            .preserve_existing(),
        );
    }

    artifacts
}

/// Append the Bamboo JVM flags implied by `settings`.
pub fn add_jvm_args(settings: &BambooSettings, jvm: &mut JvmArgs) {
    jvm.push(RSS_IN_DOCKER_FLAG);
    if settings.unattended_setup {
        jvm.push(&format!(
            "-Dbamboo.setup.settings={}",
            settings.unattended_setup_file().display()
        ));
    }
    if settings.disable_agent_auth {
        jvm.push(DISABLE_AGENT_AUTH_FLAG);
    }
}
