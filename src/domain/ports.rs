//! Domain Ports - Core trait definitions for the claim provisioner
//!
//! These traits define the boundaries between the provisioning logic and the
//! cluster API, the class store and the managed plugin registry. Adapters
//! implement these traits to provide concrete functionality.

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume, PersistentVolumeClaim};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Claim Phase
// =============================================================================

/// Lifecycle phase of a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Lost,
    /// Phase not reported yet, or not one we recognise
    Unknown,
}

impl ClaimPhase {
    /// Phase reported in a claim's status
    pub fn of(claim: &PersistentVolumeClaim) -> Self {
        match claim.status.as_ref().and_then(|s| s.phase.as_deref()) {
            Some("Pending") => ClaimPhase::Pending,
            Some("Bound") => ClaimPhase::Bound,
            Some("Lost") => ClaimPhase::Lost,
            _ => ClaimPhase::Unknown,
        }
    }
}

impl std::fmt::Display for ClaimPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimPhase::Pending => write!(f, "Pending"),
            ClaimPhase::Bound => write!(f, "Bound"),
            ClaimPhase::Lost => write!(f, "Lost"),
            ClaimPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

// =============================================================================
// Storage Class
// =============================================================================

/// Read-only view of a storage class
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageClassInfo {
    /// Class name
    pub name: String,
    /// Provisioner identifier, matched by prefix
    pub provisioner: String,
    /// Provisioning parameters
    pub parameters: BTreeMap<String, String>,
    /// Reclaim policy for volumes of this class
    pub reclaim_policy: Option<String>,
}

/// Port for class-by-name lookup
#[async_trait]
pub trait ClassLookup: Send + Sync {
    /// Get a class by name, failing when it does not exist
    async fn get_class(&self, name: &str) -> Result<StorageClassInfo>;
}

// =============================================================================
// Event Recording Port
// =============================================================================

/// Severity of a user-visible event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventSeverity {
    Normal,
    Warning,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSeverity::Normal => write!(f, "Normal"),
            EventSeverity::Warning => write!(f, "Warning"),
        }
    }
}

/// Port for user-visible events attached to cluster objects
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Record an event against an object
    async fn record(
        &self,
        object: &ObjectReference,
        severity: EventSeverity,
        reason: &str,
        message: &str,
    ) -> Result<()>;
}

// =============================================================================
// Volume Publication Port
// =============================================================================

/// Port for publishing provisioned volumes to the cluster
#[async_trait]
pub trait VolumeSink: Send + Sync {
    /// Create the volume object
    async fn create_volume(&self, volume: &PersistentVolume) -> Result<PersistentVolume>;
}

// =============================================================================
// Plugin Registry Port
// =============================================================================

/// A managed plugin as reported by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Registry identifier, used as the runtime directory name
    pub id: String,
    /// Plugin name, usually carrying a tag such as `:latest`
    pub name: String,
    /// Whether the plugin is enabled
    pub enabled: bool,
    /// Socket file name declared by the plugin interface
    pub socket: String,
}

/// Port for querying the managed plugin registry
#[async_trait]
pub trait PluginRegistry: Send + Sync {
    /// List all known plugins
    async fn list_plugins(&self) -> Result<Vec<PluginInfo>>;
}

// =============================================================================
// Claim Store Port
// =============================================================================

/// Read-only snapshot access to the locally cached claims
pub trait ClaimStore: Send + Sync {
    /// All cached claims, in no particular order
    fn list(&self) -> Vec<Arc<PersistentVolumeClaim>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClassLookupRef = Arc<dyn ClassLookup>;
pub type EventSinkRef = Arc<dyn EventSink>;
pub type VolumeSinkRef = Arc<dyn VolumeSink>;
pub type PluginRegistryRef = Arc<dyn PluginRegistry>;
pub type ClaimStoreRef = Arc<dyn ClaimStore>;
