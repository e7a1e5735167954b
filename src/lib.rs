//! Claim Provisioner - Dynamic Volume Provisioning over a Volume Plugin
//!
//! Watches persistent volume claims cluster-wide and provisions a backing
//! volume through a Docker-style volume plugin for every pending claim whose
//! storage class belongs to this instance.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                             Claim Informer                                   │
//! │                (list + watch + periodic resync, uid cache)                   │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                            Claim Controller                                  │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Phase / Class  │  │  In-flight      │  │   Volume Provisioner        │  │
//! │  │  Filter         │  │  Dedup Table    │  │   (one task per claim)      │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────┬───────────────┘  │
//! ├──────────────────────────────────────────────────────────┼──────────────────┤
//! │                         Volume Plugin Client             │                   │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────┴───────────────┐  │
//! │  │    Protocol     │  │   Discovery     │  │    Unix Socket Transport    │  │
//! │  │  (JSON bodies)  │  │  (V2 plugins)   │  │    (HTTP/1.1, timeouts)     │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: Claim informer, event handler and provisioning tasks
//! - [`claim`]: Claim decoding, class/override resolution, clone source lookup
//! - [`plugin`]: Volume plugin protocol, transport, discovery and client
//! - [`adapters`]: Cluster implementations of the domain ports
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod adapters;
pub mod claim;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod plugin;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use adapters::{KubeClassLookup, KubeEventSink, KubeVolumeSink};

pub use claim::{ClaimObject, PROVISION_REASON};

pub use config::{PluginOptions, ProvisionerConfig};

pub use controller::{
    ClaimCache, ClaimController, ClaimEventHandler, ClaimInformer, VolumeProvisioner,
};

pub use domain::ports::{
    ClaimPhase, ClaimStore, ClassLookup, EventSeverity, EventSink, PluginInfo, PluginRegistry,
    StorageClassInfo, VolumeSink,
};

pub use error::{Error, Result};

pub use metrics::Metrics;

pub use plugin::{
    Capabilities, DockerPluginRegistry, SocketTransport, Volume, VolumeOptions,
    VolumePluginClient,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
