//! Test doubles for the domain ports

use crate::domain::ports::*;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ObjectReference, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimStatus, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Build a claim with the fields the provisioner looks at
pub fn claim(namespace: &str, name: &str, uid: &str, phase: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity("10Gi".to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: Some(PersistentVolumeClaimStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

/// Same claim with a structured class reference
pub fn claim_of_class(
    namespace: &str,
    name: &str,
    uid: &str,
    phase: &str,
    class: &str,
) -> PersistentVolumeClaim {
    let mut claim = claim(namespace, name, uid, phase);
    if let Some(spec) = claim.spec.as_mut() {
        spec.storage_class_name = Some(class.to_string());
    }
    claim
}

// =============================================================================
// Claim Store
// =============================================================================

#[derive(Default)]
pub struct StaticClaims(pub Mutex<Vec<Arc<PersistentVolumeClaim>>>);

impl StaticClaims {
    pub fn with(claims: Vec<PersistentVolumeClaim>) -> Self {
        Self(Mutex::new(claims.into_iter().map(Arc::new).collect()))
    }
}

impl ClaimStore for StaticClaims {
    fn list(&self) -> Vec<Arc<PersistentVolumeClaim>> {
        self.0.lock().clone()
    }
}

// =============================================================================
// Event Sink
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub object: ObjectReference,
    pub severity: EventSeverity,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
pub struct RecordingEvents(pub Mutex<Vec<RecordedEvent>>);

impl RecordingEvents {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.0.lock().clone()
    }
}

#[async_trait]
impl EventSink for RecordingEvents {
    async fn record(
        &self,
        object: &ObjectReference,
        severity: EventSeverity,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        self.0.lock().push(RecordedEvent {
            object: object.clone(),
            severity,
            reason: reason.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}

// =============================================================================
// Class Lookup
// =============================================================================

#[derive(Default)]
pub struct StaticClasses(pub BTreeMap<String, StorageClassInfo>);

impl StaticClasses {
    pub fn with(classes: Vec<StorageClassInfo>) -> Self {
        Self(classes.into_iter().map(|c| (c.name.clone(), c)).collect())
    }
}

#[async_trait]
impl ClassLookup for StaticClasses {
    async fn get_class(&self, name: &str) -> Result<StorageClassInfo> {
        self.0.get(name).cloned().ok_or_else(|| Error::ClassLookup {
            name: name.to_string(),
            reason: "not found".to_string(),
        })
    }
}

pub fn class(name: &str, provisioner: &str, parameters: &[(&str, &str)]) -> StorageClassInfo {
    StorageClassInfo {
        name: name.to_string(),
        provisioner: provisioner.to_string(),
        parameters: parameters
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        reclaim_policy: None,
    }
}

// =============================================================================
// Volume Sink
// =============================================================================

#[derive(Default)]
pub struct RecordingVolumes(pub Mutex<Vec<PersistentVolume>>);

impl RecordingVolumes {
    pub fn volumes(&self) -> Vec<PersistentVolume> {
        self.0.lock().clone()
    }
}

#[async_trait]
impl VolumeSink for RecordingVolumes {
    async fn create_volume(&self, volume: &PersistentVolume) -> Result<PersistentVolume> {
        self.0.lock().push(volume.clone());
        Ok(volume.clone())
    }
}
