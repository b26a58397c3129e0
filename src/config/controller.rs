//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Root directory holding one working copy per subscription
    pub git_root: PathBuf,
    /// git executable used by the CLI transport
    pub git_binary: String,
    /// kustomize executable used to render kustomize roots
    pub kustomize_binary: String,
    /// Ticks after a full resync before the medium tier forces another one
    pub forced_resync_ticks: u32,
    /// Length of the hook history written to subscription status
    pub hook_history_limit: usize,
    /// Requeue interval while pre hooks are still running (seconds)
    pub hook_poll_interval_secs: u64,
    /// Steady-state requeue interval of the subscription reconcile (seconds)
    pub resync_interval_secs: u64,
    /// Maximum status message length
    pub status_message_max_len: usize,
    /// Fibonacci backoff bounds for failed reconciles (seconds)
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            git_root: PathBuf::from(DEFAULT_GIT_ROOT_PATH),
            git_binary: DEFAULT_GIT_BINARY.to_string(),
            kustomize_binary: DEFAULT_KUSTOMIZE_BINARY.to_string(),
            forced_resync_ticks: DEFAULT_FORCED_RESYNC_TICKS,
            hook_history_limit: DEFAULT_HOOK_HISTORY_LIMIT,
            hook_poll_interval_secs: DEFAULT_HOOK_POLL_INTERVAL_SECS,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            status_message_max_len: DEFAULT_STATUS_MESSAGE_MAX_LEN,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            log_level: "INFO".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            git_root: PathBuf::from(env_var_or_default_str(
                "GIT_ROOT_PATH",
                DEFAULT_GIT_ROOT_PATH,
            )),
            git_binary: env_var_or_default_str("GIT_BINARY", DEFAULT_GIT_BINARY),
            kustomize_binary: env_var_or_default_str("KUSTOMIZE_BINARY", DEFAULT_KUSTOMIZE_BINARY),
            // A zero interval would force every tick and disable the skip window entirely
            forced_resync_ticks: env_var_or_default(
                "FORCED_RESYNC_TICKS",
                DEFAULT_FORCED_RESYNC_TICKS,
            )
            .max(1),
            hook_history_limit: env_var_or_default("HOOK_HISTORY_LIMIT", DEFAULT_HOOK_HISTORY_LIMIT),
            hook_poll_interval_secs: env_var_or_default(
                "HOOK_POLL_INTERVAL_SECS",
                DEFAULT_HOOK_POLL_INTERVAL_SECS,
            ),
            resync_interval_secs: env_var_or_default(
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            ),
            status_message_max_len: env_var_or_default(
                "STATUS_MESSAGE_MAX_LEN",
                DEFAULT_STATUS_MESSAGE_MAX_LEN,
            ),
            backoff_min_secs: env_var_or_default("BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "text"),
        }
    }

    /// Get hook poll requeue duration
    #[must_use]
    pub fn hook_poll_interval(&self) -> Duration {
        Duration::from_secs(self.hook_poll_interval_secs)
    }

    /// Get steady-state requeue duration
    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = ControllerConfig::default();
        assert_eq!(config.forced_resync_ticks, 6);
        assert_eq!(config.hook_history_limit, 5);
        assert_eq!(config.status_message_max_len, 2000);
        assert_eq!(config.git_root, PathBuf::from("/tmp/appsub-git"));
    }

    #[test]
    fn test_env_var_or_default_falls_back_on_garbage() {
        // Variable name is unique to this test so parallel tests cannot interfere
        std::env::set_var("GSC_TEST_NOT_A_NUMBER", "abc");
        assert_eq!(env_var_or_default("GSC_TEST_NOT_A_NUMBER", 7_u32), 7);
        assert_eq!(env_var_or_default("GSC_TEST_UNSET_VARIABLE", 3_u64), 3);
    }
}
