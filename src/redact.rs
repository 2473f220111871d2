//! Stripping credentials from the environment the server inherits.
//!
//! By the time the server is launched every template has consumed what it
//! needs, so variables that look like credentials are removed. Each removal
//! is logged at warn level so operators can see what was stripped.

use regex::Regex;
use tracing::{debug, warn};

/// Substrings (case-insensitive) that mark a variable as sensitive.
pub const SENSITIVE_KEYWORDS: [&str; 3] = ["PASSWORD", "SECRET", "TOKEN"];

/// Comma-separated list of extra variable names to keep.
pub const ALLOWLIST_ENV: &str = "ATL_ALLOWLIST_SENSITIVE_ENV_VARS";

/// Known non-sensitive variables whose names contain a keyword. They point
/// at files or algorithms rather than holding secrets.
const BUILTIN_ALLOWLIST: [&str; 2] = [
    "com_atlassian_db_config_password_ciphers_algorithm_javax_crypto",
    "AWS_WEB_IDENTITY_TOKEN_FILE",
];

/// Errors building the allow-list.
#[derive(Debug, thiserror::Error)]
pub enum RedactError {
    /// The combined allow-list pattern could not be compiled.
    #[error("invalid allow-list pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Decides which environment variables to strip.
#[derive(Debug, Clone)]
pub struct SecretsRedactor {
    allowed: Regex,
}

impl SecretsRedactor {
    /// Build a redactor from a comma-separated list of extra allowed names.
    ///
    /// Names match as case-insensitive prefixes, so `MY_TOKEN` also keeps
    /// `MY_TOKEN_FILE`.
    ///
    /// # Errors
    ///
    /// Returns an error if the combined pattern cannot be compiled.
    pub fn new(extra_allowlist: &str) -> Result<Self, RedactError> {
        let patterns = BUILTIN_ALLOWLIST
            .iter()
            .map(|name| regex::escape(name))
            .chain(
                extra_allowlist
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(regex::escape),
            )
            .collect::<Vec<_>>();
        let allowed = Regex::new(&format!("(?i)^(?:{})", patterns.join("|")))?;
        Ok(Self { allowed })
    }

    /// Build a redactor using [`ALLOWLIST_ENV`] from the process environment.
    ///
    /// # Errors
    ///
    /// See [`SecretsRedactor::new`].
    pub fn from_env() -> Result<Self, RedactError> {
        Self::new(&std::env::var(ALLOWLIST_ENV).unwrap_or_default())
    }

    /// Returns `true` when the name contains a sensitive keyword.
    pub fn is_sensitive(name: &str) -> bool {
        let upper = name.to_uppercase();
        SENSITIVE_KEYWORDS.iter().any(|kw| upper.contains(kw))
    }

    /// Returns `true` when the name is exempt from stripping.
    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed.is_match(name)
    }

    /// Returns `true` when the variable should be removed.
    pub fn should_unset(&self, name: &str) -> bool {
        Self::is_sensitive(name) && !self.is_allowed(name)
    }

    /// Names from `names` that should be removed, in input order.
    pub fn select<I, S>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter(|name| self.should_unset(name.as_ref()))
            .map(|name| name.as_ref().to_owned())
            .collect()
    }

    /// Remove sensitive variables from the process environment.
    ///
    /// Names that are not valid UTF-8 are matched lossily and removed by
    /// their original bytes. Returns the (lossy) names that were removed.
    pub fn redact_process_env(&self) -> Vec<String> {
        debug!("starting to unset secure environment variables");
        let keys = std::env::vars_os().map(|(key, _)| key).collect::<Vec<_>>();
        let mut removed = Vec::new();
        for key in keys {
            let name = key.to_string_lossy().into_owned();
            if self.should_unset(&name) {
                warn!(var = %name, "unsetting environment var");
                std::env::remove_var(&key);
                removed.push(name);
            }
        }
        removed
    }
}
