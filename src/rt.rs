//! Runtime configuration.
//!
//! Read once per process from environment variables and cached.

use std::sync::OnceLock;
use std::time::Duration;

/// Cached runtime configuration, initialized once from environment variables.
static RUNTIME: OnceLock<RuntimeConfig> = OnceLock::new();

/// Default wait timeout in milliseconds. Unset means wait until settled.
const ENV_TIMEOUT_MS: &str = "FORKWAIT_TIMEOUT_MS";

/// Cached runtime configuration.
#[derive(Debug, Clone, Default)]
pub(crate) struct RuntimeConfig {
    /// Upper bound on the wait protocol, unless a test overrides it.
    pub(crate) default_timeout: Option<Duration>,
}

impl RuntimeConfig {
    /// Build a configuration from a raw `FORKWAIT_TIMEOUT_MS` value.
    ///
    /// Missing, unparsable and zero values all mean "no timeout".
    fn from_timeout_var(raw: Option<&str>) -> Self {
        let default_timeout = raw
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis);

        RuntimeConfig { default_timeout }
    }
}

/// Initialize the runtime from environment variables.
fn init_runtime() -> RuntimeConfig {
    let raw = std::env::var(ENV_TIMEOUT_MS).ok();
    let config = RuntimeConfig::from_timeout_var(raw.as_deref());
    tracing::debug!(default_timeout = ?config.default_timeout, "forkwait runtime configured");
    config
}

/// Returns the cached runtime configuration.
/// Environment variables are read exactly once per process.
#[inline]
pub(crate) fn runtime() -> &'static RuntimeConfig {
    RUNTIME.get_or_init(init_runtime)
}
