//! Managed Plugin Discovery
//!
//! Resolves a plugin name to the socket it listens on by asking the plugin
//! registry, which is a different daemon from the volume plugin itself.

use crate::config::PLUGIN_RUNTIME_DIR;
use crate::domain::ports::{PluginInfo, PluginRegistry};
use crate::error::{Error, Result};
use crate::plugin::transport::TransportRef;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Tag implied when a plugin is referenced without one
pub const DEFAULT_TAG: &str = "latest";

/// Registry path listing installed plugins
const PLUGINS_URI: &str = "/plugins";

// =============================================================================
// Registry Adapter
// =============================================================================

#[derive(Debug, Deserialize)]
struct RegistryPlugin {
    #[serde(rename = "Id", default)]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Enabled", default)]
    enabled: bool,
    #[serde(rename = "Config", default)]
    config: RegistryPluginConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RegistryPluginConfig {
    #[serde(rename = "Interface", default)]
    interface: RegistryPluginInterface,
}

#[derive(Debug, Default, Deserialize)]
struct RegistryPluginInterface {
    #[serde(rename = "Socket", default)]
    socket: String,
}

impl From<RegistryPlugin> for PluginInfo {
    fn from(plugin: RegistryPlugin) -> Self {
        Self {
            id: plugin.id,
            name: plugin.name,
            enabled: plugin.enabled,
            socket: plugin.config.interface.socket,
        }
    }
}

/// Plugin registry served by the Docker daemon
pub struct DockerPluginRegistry {
    transport: TransportRef,
}

impl DockerPluginRegistry {
    pub fn new(transport: TransportRef) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl PluginRegistry for DockerPluginRegistry {
    async fn list_plugins(&self) -> Result<Vec<PluginInfo>> {
        let reply = self.transport.get(PLUGINS_URI).await?;
        let plugins: Vec<RegistryPlugin> = serde_json::from_value(reply)?;
        Ok(plugins.into_iter().map(PluginInfo::from).collect())
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Socket path of a managed plugin under the runtime directory
pub fn plugin_socket_path(plugin: &PluginInfo) -> PathBuf {
    Path::new(PLUGIN_RUNTIME_DIR)
        .join(&plugin.id)
        .join(&plugin.socket)
}

/// Find the socket of the plugin called `name` (or `name:latest`)
pub async fn resolve_plugin_socket(registry: &dyn PluginRegistry, name: &str) -> Result<PathBuf> {
    let plugins = registry
        .list_plugins()
        .await
        .map_err(|e| Error::Discovery(format!("failed to get V2 plugins: {}", e)))?;

    let tagged = format!("{}:{}", name, DEFAULT_TAG);
    let plugin = plugins
        .iter()
        .find(|p| p.name == name || p.name == tagged)
        .ok_or_else(|| Error::PluginNotFound {
            name: name.to_string(),
        })?;

    let socket_path = plugin_socket_path(plugin);
    if !plugin.enabled {
        return Err(Error::PluginDisabled {
            name: name.to_string(),
            socket_path: socket_path.display().to_string(),
        });
    }

    debug!("Plugin {} ({}) resolved", plugin.name, plugin.id);
    info!("Using V2 plugin {} at {}", name, socket_path.display());
    Ok(socket_path)
}
