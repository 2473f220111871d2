//! Environment loading.
//!
//! The container is configured entirely through environment variables. They
//! are read once into an [`Environment`], keys lower-cased so templates can
//! refer to `atl_tomcat_port` rather than `ATL_TOMCAT_PORT`. The value is
//! threaded explicitly through every later step; nothing reads a global map.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

/// Keys whose values are `|`-separated IP address lists used as regexes by
/// Tomcat's `RemoteIpValve`.
pub const PROXY_IP_LIST_KEYS: [&str; 2] = ["atl_tomcat_trustedproxies", "atl_tomcat_internalproxies"];

/// Default location of the container identifier file.
pub const CONTAINER_ID_PATH: &str = "/etc/container_id";

/// Errors raised when reading required settings from the environment.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    /// A variable the entrypoint cannot run without is not set.
    #[error("required environment variable {} is not set", .0.to_uppercase())]
    MissingKey(String),
}

/// Lower-cased snapshot of the process environment.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Environment {
    /// Snapshot the current process environment.
    pub fn load() -> Self {
        let vars = std::env::vars_os().filter_map(|(key, value)| {
            match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => Some((key, value)),
                (key, _) => {
                    debug!(key = ?key, "skipping non UTF-8 environment variable");
                    None
                }
            }
        });
        Self::from_vars(vars)
    }

    /// Build an environment from arbitrary name/value pairs.
    ///
    /// Applies the same normalization as [`Environment::load`].
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut env = Self::default();
        for (key, value) in vars {
            env.insert(key.as_ref(), value.as_ref());
        }
        env
    }

    /// Insert a variable, lower-casing the key.
    ///
    /// Proxy IP-list values are unquoted and dot-escaped on the way in.
    pub fn insert(&mut self, key: &str, value: &str) {
        let key = key.to_lowercase();
        let value = if PROXY_IP_LIST_KEYS.contains(&key.as_str()) {
            escape_ips(value.trim_matches('"'))
        } else {
            value.to_owned()
        };
        self.vars.insert(key, value);
    }

    /// Returns the value for a (case-insensitive) key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(&key.to_lowercase()).map(String::as_str)
    }

    /// Returns `true` when the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns a required value or [`EnvError::MissingKey`].
    ///
    /// # Errors
    ///
    /// Returns an error when the key is not set.
    pub fn require(&self, key: &str) -> Result<&str, EnvError> {
        self.get(key)
            .ok_or_else(|| EnvError::MissingKey(key.to_lowercase()))
    }

    /// Interpret a variable as a boolean, `false` when absent.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(str2bool)
    }

    /// Interpret a variable as a boolean, `default` when absent or empty.
    pub fn flag_or(&self, key: &str, default: bool) -> bool {
        str2bool_or(self.get(key).filter(|v| !v.is_empty()), default)
    }

    /// Borrow the underlying map, e.g. as a template context.
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns `true` when no variables are set.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Add a fresh `uuid` and, when available, the `local_container_id`
    /// read from `path`.
    ///
    /// A missing or empty file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn assign_container_id(&mut self, path: &Path) -> std::io::Result<()> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.insert("uuid", &id);

        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let lcid = contents.trim();
                if !lcid.is_empty() {
                    debug!(local_container_id = lcid, "local container id set");
                    self.insert("local_container_id", lcid);
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "container id file not found, skipping");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Snapshot the current process environment.
pub fn load_environment() -> Environment {
    Environment::load()
}

/// Escape the dots in every address of a `|`-separated IP list.
///
/// Tokens that already contain a backslash are left alone, so escaping an
/// escaped list is a no-op.
pub fn escape_ips(ips: &str) -> String {
    debug!(ips, "escaping IP addresses");
    let escaped = ips
        .split('|')
        .map(|ip| {
            if ip.contains('\\') {
                ip.to_owned()
            } else {
                ip.replace('.', "\\.")
            }
        })
        .collect::<Vec<_>>()
        .join("|");
    debug!(escaped = %escaped, "escaped IP addresses");
    escaped
}

/// Interpret common truthy spellings: `yes`, `true`, `t`, `y`, `1`.
pub fn str2bool(s: &str) -> bool {
    matches!(
        s.to_lowercase().as_str(),
        "yes" | "true" | "t" | "y" | "1"
    )
}

/// Like [`str2bool`], falling back to `default` when the value is absent.
pub fn str2bool_or(s: Option<&str>, default: bool) -> bool {
    s.map_or(default, str2bool)
}
