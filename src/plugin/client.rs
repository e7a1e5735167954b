//! Volume Plugin Client
//!
//! Typed operations over the volume plugin protocol. Each operation is one
//! round trip; failures are surfaced to the caller and never retried here.

use crate::config::{PluginOptions, DEFAULT_SOCKET_PATH};
use crate::domain::ports::PluginRegistry;
use crate::error::{Error, Result};
use crate::plugin::discovery::{resolve_plugin_socket, DockerPluginRegistry};
use crate::plugin::protocol::*;
use crate::plugin::transport::{SocketTransport, TransportRef};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Option namespace injected by the cluster, never meant for the plugin
pub const K8S_OPTION_PREFIX: &str = "kubernetes.io";

/// Client to a single volume plugin
pub struct VolumePluginClient {
    transport: TransportRef,
    strip_k8s_opts: bool,
}

impl VolumePluginClient {
    /// Create a client over an existing transport
    pub fn new(transport: TransportRef, strip_k8s_opts: bool) -> Self {
        Self {
            transport,
            strip_k8s_opts,
        }
    }

    /// Build a client from options, resolving managed plugins through the
    /// registry socket.
    ///
    /// The returned error slot holds the result of the capabilities probe; the
    /// client is usable (possibly degraded) either way.
    pub async fn connect(options: &PluginOptions) -> Result<(Self, Option<Error>)> {
        let registry = DockerPluginRegistry::new(Arc::new(SocketTransport::new(
            &options.registry_socket_path,
            options.request_timeout,
        )));
        Self::connect_with_registry(options, &registry).await
    }

    /// Same as [`VolumePluginClient::connect`] with an explicit registry
    pub async fn connect_with_registry(
        options: &PluginOptions,
        registry: &dyn PluginRegistry,
    ) -> Result<(Self, Option<Error>)> {
        let socket_path = resolve_socket_path(&options.socket_path, registry).await?;
        info!("Volume plugin socket: {}", socket_path.display());

        let transport = Arc::new(SocketTransport::new(socket_path, options.request_timeout));
        let client = Self::new(transport, options.strip_k8s_from_options);

        // test connectivity
        let probe = client.capabilities().await.err();
        Ok((client, probe))
    }

    /// Activation handshake, returning the implemented subsystems
    pub async fn activate(&self) -> Result<Vec<String>> {
        let res: ActivateResponse = self.call(ACTIVATE_URI, &Request::default()).await?;
        Ok(res.implements)
    }

    /// Capabilities supported by the plugin
    pub async fn capabilities(&self) -> Result<Capabilities> {
        match self.call::<_, CapResponse>(CAPABILITIES_URI, &Request::default()).await {
            Ok(res) => {
                debug!("Plugin capabilities: {:?}", res.capabilities);
                Ok(res.capabilities)
            }
            Err(e) => {
                info!("Unable to get capabilities - {}", e);
                Err(e)
            }
        }
    }

    /// Get a volume by name
    pub async fn get(&self, name: &str) -> Result<Volume> {
        let req = Request {
            name: name.to_string(),
            ..Default::default()
        };
        match self.call::<_, GetResponse>(GET_URI, &req).await {
            Ok(res) => Ok(res.volume),
            Err(e) => {
                info!("Unable to get volume using {} - {}", name, e);
                Err(e)
            }
        }
    }

    /// List all volumes known to the plugin
    pub async fn list(&self) -> Result<Vec<Volume>> {
        match self.call::<_, ListResponse>(LIST_URI, &Request::default()).await {
            Ok(res) => Ok(res.volumes),
            Err(e) => {
                info!("Unable to list volumes - {}", e);
                Err(e)
            }
        }
    }

    /// Build the create request, dropping keys the plugin must not see
    pub fn create_request(&self, name: &str, mut options: VolumeOptions) -> Result<Request> {
        require_name(name)?;
        options.retain(|key, _| {
            key != "name" && !(self.strip_k8s_opts && key.starts_with(K8S_OPTION_PREFIX))
        });
        Ok(Request {
            name: name.to_string(),
            opts: options,
        })
    }

    /// Create a volume, returning its name
    pub async fn create(&self, name: &str, options: VolumeOptions) -> Result<String> {
        let req = self.create_request(name, options)?;
        match self.call::<_, GetResponse>(CREATE_URI, &req).await {
            Ok(res) if res.volume.name.is_empty() => Ok(req.name),
            Ok(res) => Ok(res.volume.name),
            Err(e) => {
                error!("Unable to create volume using {} & {:?} - {}", name, req.opts, e);
                Err(e)
            }
        }
    }

    /// Attach and mount a volume, returning its mount point
    pub async fn mount(&self, name: &str, mount_id: &str) -> Result<String> {
        self.mounter(name, mount_id, MOUNT_URI).await
    }

    /// Unmount and detach a volume
    pub async fn unmount(&self, name: &str, mount_id: &str) -> Result<()> {
        self.mounter(name, mount_id, UNMOUNT_URI).await.map(|_| ())
    }

    /// Remove a volume
    pub async fn delete(&self, name: &str) -> Result<()> {
        require_name(name)?;
        let req = Request {
            name: name.to_string(),
            ..Default::default()
        };
        self.call::<_, GetResponse>(REMOVE_URI, &req)
            .await
            .map(|_| ())
            .map_err(|e| {
                error!("{} failed {} - {}", REMOVE_URI, name, e);
                e
            })
    }

    async fn mounter(&self, name: &str, mount_id: &str, path: &str) -> Result<String> {
        require_name(name)?;
        let req = MountRequest {
            name: name.to_string(),
            id: mount_id.to_string(),
        };
        match self.call::<_, MountResponse>(path, &req).await {
            Ok(res) => Ok(res.mountpoint),
            Err(e) => {
                error!("{} failed {} & {} - {}", path, name, mount_id, e);
                Err(e)
            }
        }
    }

    async fn call<Req, Res>(&self, path: &str, req: &Req) -> Result<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned + PluginResponse,
    {
        let reply = self.transport.post(path, serde_json::to_value(req)?).await?;
        let res: Res = serde_json::from_value(reply)?;
        check_response(res)
    }
}

fn require_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("name is required".into()));
    }
    Ok(())
}

/// Turn the configured socket locator into a concrete path
async fn resolve_socket_path(locator: &str, registry: &dyn PluginRegistry) -> Result<PathBuf> {
    let resolved = if !locator.is_empty() && !locator.starts_with('/') {
        // a managed plugin, so we need to find its socket file
        resolve_plugin_socket(registry, locator).await?
    } else {
        PathBuf::from(locator)
    };

    if resolved.as_os_str().is_empty() {
        return Ok(PathBuf::from(DEFAULT_SOCKET_PATH));
    }
    Ok(resolved)
}
