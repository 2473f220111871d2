//! Extra JVM flags handed to the server launcher.

use tracing::debug;

/// Variable read by the launcher script for additional JVM flags.
pub const JVM_ARGS_ENV: &str = "JVM_SUPPORT_RECOMMENDED_ARGS";

/// Space-separated accumulator of JVM flags.
///
/// Later flags win in the launcher, so order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JvmArgs {
    value: String,
}

impl JvmArgs {
    /// Start from an existing value, e.g. one supplied by the operator.
    pub fn new(existing: Option<String>) -> Self {
        Self {
            value: existing.unwrap_or_default(),
        }
    }

    /// Append a flag.
    pub fn push(&mut self, arg: &str) {
        debug!(arg, "adding JVM argument");
        self.value.push(' ');
        self.value.push_str(arg);
    }

    /// Current accumulated value.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Individual flags, in order.
    pub fn flags(&self) -> impl Iterator<Item = &str> {
        self.value.split_whitespace()
    }

    /// Write the accumulated value back to the process environment.
    pub fn export(&self) {
        std::env::set_var(JVM_ARGS_ENV, &self.value);
    }
}
