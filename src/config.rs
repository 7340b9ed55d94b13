//! Runtime configuration
//!
//! # Example
//!
//! ```
//! use clmetal::{BackendSelection, ContextReleasePolicy, RuntimeConfig};
//!
//! let config = RuntimeConfig::builder()
//!     .backend(BackendSelection::Host)
//!     .context_release(ContextReleasePolicy::Cascade)
//!     .build();
//! assert_eq!(config.host_threads >= 1, true);
//! ```

use log::warn;
use std::str::FromStr;
use typed_builder::TypedBuilder;

/// Which native backend executes the work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendSelection {
    /// Metal when compiled in and a device is present, the host backend otherwise
    #[default]
    Auto,
    /// CPU reference backend
    Host,
    /// Native Metal (feature `metal`, macOS only)
    Metal,
}

impl FromStr for BackendSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "host" | "cpu" => Ok(Self::Host),
            "metal" => Ok(Self::Metal),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// What happens when the last explicit reference of a context with live
/// children is released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextReleasePolicy {
    /// Refuse the release with `ContextInUse`; the count stays unchanged
    #[default]
    Strict,
    /// Force-release every child (queues are drained first), then destroy
    Cascade,
}

impl FromStr for ContextReleasePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "cascade" => Ok(Self::Cascade),
            other => Err(format!("unknown context release policy '{}'", other)),
        }
    }
}

fn default_host_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Configuration of a [`Runtime`](crate::Runtime)
#[derive(Debug, Clone, TypedBuilder)]
pub struct RuntimeConfig {
    /// Backend selection (default: `Auto`)
    #[builder(default)]
    pub backend: BackendSelection,
    /// Context release policy (default: `Strict`)
    #[builder(default)]
    pub context_release: ContextReleasePolicy,
    /// Worker threads used by the host backend (default: available parallelism)
    #[builder(default_code = "default_host_threads()")]
    pub host_threads: usize,
    /// Upper bound on the reported work-group size of host devices
    #[builder(default = 256)]
    pub max_work_group_size: usize,
    /// Name reported for the platform
    #[builder(default = String::from("clmetal"), setter(into))]
    pub platform_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RuntimeConfig {
    pub const ENV_BACKEND: &'static str = "CLMETAL_BACKEND";
    pub const ENV_CONTEXT_RELEASE: &'static str = "CLMETAL_CONTEXT_RELEASE";
    pub const ENV_HOST_THREADS: &'static str = "CLMETAL_HOST_THREADS";
    pub const ENV_MAX_WORK_GROUP_SIZE: &'static str = "CLMETAL_MAX_WORK_GROUP_SIZE";

    /// Build a configuration from the `CLMETAL_*` environment variables
    ///
    /// Unset variables keep their defaults; invalid values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup(Self::ENV_BACKEND) {
            match value.parse() {
                Ok(backend) => config.backend = backend,
                Err(e) => warn!("Ignoring {}: {}", Self::ENV_BACKEND, e),
            }
        }
        if let Some(value) = lookup(Self::ENV_CONTEXT_RELEASE) {
            match value.parse() {
                Ok(policy) => config.context_release = policy,
                Err(e) => warn!("Ignoring {}: {}", Self::ENV_CONTEXT_RELEASE, e),
            }
        }
        if let Some(value) = lookup(Self::ENV_HOST_THREADS) {
            match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.host_threads = n,
                _ => warn!(
                    "Ignoring {}: '{}' is not a positive integer",
                    Self::ENV_HOST_THREADS,
                    value
                ),
            }
        }
        if let Some(value) = lookup(Self::ENV_MAX_WORK_GROUP_SIZE) {
            match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.max_work_group_size = n,
                _ => warn!(
                    "Ignoring {}: '{}' is not a positive integer",
                    Self::ENV_MAX_WORK_GROUP_SIZE,
                    value
                ),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.backend, BackendSelection::Auto);
        assert_eq!(config.context_release, ContextReleasePolicy::Strict);
        assert!(config.host_threads >= 1);
        assert_eq!(config.platform_name, "clmetal");
    }

    #[test]
    fn test_from_env_values() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("CLMETAL_BACKEND", "host"),
            ("CLMETAL_CONTEXT_RELEASE", "Cascade"),
            ("CLMETAL_HOST_THREADS", "3"),
            ("CLMETAL_MAX_WORK_GROUP_SIZE", "64"),
        ]));
        assert_eq!(config.backend, BackendSelection::Host);
        assert_eq!(config.context_release, ContextReleasePolicy::Cascade);
        assert_eq!(config.host_threads, 3);
        assert_eq!(config.max_work_group_size, 64);
    }

    #[test]
    fn test_from_env_ignores_invalid_values() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("CLMETAL_BACKEND", "vulkan"),
            ("CLMETAL_HOST_THREADS", "0"),
            ("CLMETAL_MAX_WORK_GROUP_SIZE", "lots"),
        ]));
        assert_eq!(config.backend, BackendSelection::Auto);
        assert!(config.host_threads >= 1);
        assert_eq!(config.max_work_group_size, 256);
    }
}
