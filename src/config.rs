//! Provisioner Configuration
//!
//! Explicit configuration handed to the controller and the plugin client at
//! construction time.

use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Constants
// =============================================================================

/// Socket used when no plugin socket is configured
pub const DEFAULT_SOCKET_PATH: &str = "/run/docker/plugins/nimble.sock";

/// Socket of the daemon that keeps the managed (V2) plugin registry
pub const DEFAULT_REGISTRY_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Runtime directory holding managed plugin sockets
pub const PLUGIN_RUNTIME_DIR: &str = "/run/docker/plugins";

/// Prefix a class provisioner must carry to be serviced by this instance
pub const DEFAULT_NAME_PREFIX: &str = "hpe.com/";

/// Bytes per GiB, the default unit handed to the plugin for sizes
pub const DEFAULT_FACTOR_FOR_CONVERSION: u64 = 1024 * 1024 * 1024;

// =============================================================================
// Provisioner Configuration
// =============================================================================

/// Configuration for the claim controller
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Provisioner identifier prefix; also prefixes override annotations
    pub name_prefix: String,
    /// Interval between full redeliveries of the claim cache
    pub resync_period: Duration,
    /// Upper bound, in seconds, on the cross-reference poll
    pub max_wait_for_claims: u64,
    /// How long a provisioning task waits for its claim to bind
    pub bind_timeout: Duration,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            resync_period: Duration::from_secs(300),
            max_wait_for_claims: 30,
            bind_timeout: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Plugin Options
// =============================================================================

/// Options for the volume plugin client
#[derive(Debug, Clone)]
pub struct PluginOptions {
    /// Absolute socket path, or the name of a managed plugin
    pub socket_path: String,
    /// Socket of the managed plugin registry
    pub registry_socket_path: PathBuf,
    /// Strip `kubernetes.io` keys from create options
    pub strip_k8s_from_options: bool,
    /// Whether provisioning creates volumes or only adopts existing ones
    pub create_volumes: bool,
    /// Option keys that receive the claim's requested size
    pub storage_resource_options: Vec<String>,
    /// Divisor applied to the requested size in bytes
    pub factor_for_conversion: u64,
    /// Upper bound on a single plugin round trip
    pub request_timeout: Duration,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            registry_socket_path: PathBuf::from(DEFAULT_REGISTRY_SOCKET_PATH),
            strip_k8s_from_options: true,
            create_volumes: true,
            storage_resource_options: vec!["size".to_string()],
            factor_for_conversion: DEFAULT_FACTOR_FOR_CONVERSION,
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProvisionerConfig::default();
        assert_eq!(config.name_prefix, "hpe.com/");
        assert_eq!(config.resync_period, Duration::from_secs(300));
        assert_eq!(config.max_wait_for_claims, 30);

        let options = PluginOptions::default();
        assert_eq!(options.socket_path, DEFAULT_SOCKET_PATH);
        assert!(options.strip_k8s_from_options);
        assert_eq!(options.factor_for_conversion, 1 << 30);
    }
}
