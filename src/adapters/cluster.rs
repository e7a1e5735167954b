//! Cluster Adapters
//!
//! Storage class lookup, event recording and volume publication through the
//! Kubernetes API.

use crate::domain::ports::{ClassLookup, EventSeverity, EventSink, StorageClassInfo, VolumeSink};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::PostParams;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client};
use tracing::debug;

/// Action recorded on provisioning events
pub const EVENT_ACTION: &str = "Provisioning";

// =============================================================================
// Class Lookup
// =============================================================================

/// Storage class lookup over the storage API
pub struct KubeClassLookup {
    api: Api<StorageClass>,
}

impl KubeClassLookup {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

/// Read-only view of a storage class object
pub fn class_info(class: StorageClass) -> StorageClassInfo {
    StorageClassInfo {
        name: class.metadata.name.unwrap_or_default(),
        provisioner: class.provisioner,
        parameters: class.parameters.unwrap_or_default(),
        reclaim_policy: class.reclaim_policy,
    }
}

#[async_trait]
impl ClassLookup for KubeClassLookup {
    async fn get_class(&self, name: &str) -> Result<StorageClassInfo> {
        let class = self.api.get(name).await.map_err(|e| Error::ClassLookup {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(class_info(class))
    }
}

// =============================================================================
// Event Sink
// =============================================================================

/// Records events attributed to this provisioner
pub struct KubeEventSink {
    client: Client,
    reporter: Reporter,
}

impl KubeEventSink {
    pub fn new(client: Client, controller: &str) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller.to_string(),
                instance: std::env::var("HOSTNAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn record(
        &self,
        object: &ObjectReference,
        severity: EventSeverity,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        debug!("Recording {} event {} on {:?}", severity, reason, object.name);
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), object.clone());
        recorder
            .publish(Event {
                type_: match severity {
                    EventSeverity::Normal => EventType::Normal,
                    EventSeverity::Warning => EventType::Warning,
                },
                reason: reason.to_string(),
                note: Some(message.to_string()),
                action: EVENT_ACTION.to_string(),
                secondary: None,
            })
            .await?;
        Ok(())
    }
}

// =============================================================================
// Volume Sink
// =============================================================================

/// Publishes persistent volumes
pub struct KubeVolumeSink {
    api: Api<PersistentVolume>,
}

impl KubeVolumeSink {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl VolumeSink for KubeVolumeSink {
    async fn create_volume(&self, volume: &PersistentVolume) -> Result<PersistentVolume> {
        Ok(self.api.create(&PostParams::default(), volume).await?)
    }
}
