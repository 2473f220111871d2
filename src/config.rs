//! Entrypoint configuration.
//!
//! Loads the entrypoint's own settings from `entrypoint.toml` (or
//! `$ENTRYPOINT_CONFIG_PATH`). Environment variables override file values;
//! file values override defaults. A missing file is not an error.
//!
//! The server's settings (ports, database, users) are not configured here;
//! they come straight from the container environment.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::env::str2bool;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/opt/atlassian/etc/entrypoint.toml";

// ── Top-level config ────────────────────────────────────────────

/// Top-level entrypoint configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EntrypointConfig {
    /// Filesystem inputs.
    pub paths: PathsConfig,
    /// How the server is launched.
    pub app: AppConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
    /// Env overrides that were rejected. Logged once the subscriber is up.
    #[serde(skip)]
    pub ignored_overrides: Vec<IgnoredOverride>,
}

/// An environment override whose value could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredOverride {
    /// Variable name.
    pub var: &'static str,
    /// Rejected value.
    pub value: String,
}

impl EntrypointConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using a custom env resolver (for testing).
    ///
    /// # Errors
    ///
    /// See [`EntrypointConfig::load`].
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = Self::config_path_with(&env);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml(&contents)
                .with_context(|| format!("failed to parse config at {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "failed to read config at {}: {e}",
                    path.display()
                ))
            }
        };
        config.apply_overrides(env);
        Ok(config)
    }

    /// Resolve the config file path: `$ENTRYPOINT_CONFIG_PATH` or the default.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("ENTRYPOINT_CONFIG_PATH").map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Invalid values are skipped and recorded in `ignored_overrides`.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ENTRYPOINT_TEMPLATE_DIR") {
            self.paths.template_dir = PathBuf::from(v);
        }
        if let Some(v) = env("ENTRYPOINT_MANIFEST_PATH") {
            self.paths.manifest = PathBuf::from(v);
        }
        if let Some(v) = env("ENTRYPOINT_CONTAINER_ID_PATH") {
            self.paths.container_id = PathBuf::from(v);
        }
        if let Some(v) = env("VERBOSE_LOGS") {
            self.logging.verbose = str2bool(&v);
        }
        if let Some(v) = env("ENTRYPOINT_LOG_FORMAT") {
            match v.to_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "text" => self.logging.format = LogFormat::Text,
                _ => self.ignored_overrides.push(IgnoredOverride {
                    var: "ENTRYPOINT_LOG_FORMAT",
                    value: v,
                }),
            }
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid TOML.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: EntrypointConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

// ── Paths config ────────────────────────────────────────────────

/// Filesystem inputs baked into the image.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the `*.j2` templates.
    pub template_dir: PathBuf,
    /// Packaging manifest carrying the build number.
    pub manifest: PathBuf,
    /// Optional container identifier file.
    pub container_id: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("/opt/atlassian/etc"),
            manifest: PathBuf::from(crate::manifest::MANIFEST_PATH),
            container_id: PathBuf::from(crate::env::CONTAINER_ID_PATH),
        }
    }
}

// ── App config ──────────────────────────────────────────────────

/// How the server is launched.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Name used in logs.
    pub name: String,
    /// Launcher script, relative to the install directory.
    pub start_script: PathBuf,
    /// Arguments passed to the launcher.
    pub start_args: Vec<String>,
    /// Strip sensitive variables before launching.
    pub env_cleanup: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "Bamboo".to_string(),
            start_script: PathBuf::from("bin/start-bamboo.sh"),
            start_args: vec!["-fg".to_string()],
            env_cleanup: true,
        }
    }
}

// ── Logging config ──────────────────────────────────────────────

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Log output settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit debug-level traces.
    pub verbose: bool,
    /// Output format.
    pub format: LogFormat,
}

// ── Tests ───────────────────────────────────────────────────────
