//! Volume Provisioning
//!
//! The unit of work dispatched for every accepted claim: build the plugin
//! options, create (or adopt) the backing volume, publish the matching
//! `PersistentVolume` and wait for the claim to bind.

use crate::claim::{match_labels, override_options, requested_bytes, resolve_source_claim};
use crate::config::{PluginOptions, ProvisionerConfig};
use crate::domain::ports::{
    ClaimPhase, ClaimStoreRef, EventSinkRef, StorageClassInfo, VolumeSinkRef,
};
use crate::error::{Error, Result};
use crate::plugin::{VolumeOptions, VolumePluginClient};
use k8s_openapi::api::core::v1::{
    FlexPersistentVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Class parameter listing the option keys a claim may override
pub const ALLOW_OVERRIDES_PARAMETER: &str = "allowOverrides";

/// Option naming the claim to clone from
pub const CLONE_OF_PVC_OPTION: &str = "cloneOfPVC";

/// Option handed to the plugin with the source volume of a clone
pub const CLONE_OF_OPTION: &str = "cloneOf";

/// Suffix of the annotation carrying the plugin volume name
pub const DOCKER_VOLUME_NAME_ANNOTATION: &str = "docker-volume-name";

/// Reclaim policy used when the class names none
pub const DEFAULT_RECLAIM_POLICY: &str = "Delete";

// =============================================================================
// Object References
// =============================================================================

/// Reference to a claim, for events and volume claim refs
pub fn claim_reference(claim: &PersistentVolumeClaim) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("PersistentVolumeClaim".to_string()),
        name: claim.metadata.name.clone(),
        namespace: claim.metadata.namespace.clone(),
        uid: claim.metadata.uid.clone(),
        resource_version: claim.metadata.resource_version.clone(),
        ..Default::default()
    }
}

/// Reference to a volume that may not exist yet
pub fn volume_reference(name: &str, namespace: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("PersistentVolume".to_string()),
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Plugin volume name for a claim of a class
pub fn volume_name(class: &StorageClassInfo, claim: &PersistentVolumeClaim) -> String {
    format!(
        "{}-{}",
        class.name,
        claim.metadata.uid.as_deref().unwrap_or_default()
    )
}

// =============================================================================
// Option Building
// =============================================================================

/// Keys listed in the class's `allowOverrides` parameter
pub fn allowed_overrides(class: &StorageClassInfo) -> Vec<String> {
    class
        .parameters
        .get(ALLOW_OVERRIDES_PARAMETER)
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Plugin options for a claim: class parameters, claim overrides, then size
pub fn build_options(
    prefix: &str,
    plugin: &PluginOptions,
    class: &StorageClassInfo,
    claim: &PersistentVolumeClaim,
) -> Result<VolumeOptions> {
    let mut options: VolumeOptions = class
        .parameters
        .iter()
        .filter(|(key, _)| key.as_str() != ALLOW_OVERRIDES_PARAMETER)
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();

    options = override_options(prefix, claim, &allowed_overrides(class), options);

    if let Some(bytes) = requested_bytes(claim)? {
        let factor = plugin.factor_for_conversion.max(1);
        let size = bytes.div_ceil(factor).to_string();
        for key in &plugin.storage_resource_options {
            options
                .entry(key.clone())
                .or_insert_with(|| Value::String(size.clone()));
        }
    }
    Ok(options)
}

// =============================================================================
// Volume Building
// =============================================================================

/// The `PersistentVolume` backing `claim` with plugin volume `name`
pub fn build_volume(
    prefix: &str,
    name: &str,
    class: &StorageClassInfo,
    claim: &PersistentVolumeClaim,
) -> Result<PersistentVolume> {
    let spec = claim.spec.as_ref();
    let capacity = spec
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get(crate::claim::STORAGE_RESOURCE))
        .cloned()
        .ok_or_else(|| {
            Error::Validation(format!(
                "claim {:?} does not request storage",
                claim.metadata.name
            ))
        })?;

    let labels = match_labels(claim);
    let annotations = BTreeMap::from([
        (
            format!("{}{}", prefix, DOCKER_VOLUME_NAME_ANNOTATION),
            name.to_string(),
        ),
        (
            "pv.kubernetes.io/provisioned-by".to_string(),
            class.provisioner.clone(),
        ),
    ]);

    Ok(PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: (!labels.is_empty()).then_some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            capacity: Some(BTreeMap::from([(
                crate::claim::STORAGE_RESOURCE.to_string(),
                capacity,
            )])),
            access_modes: spec.and_then(|s| s.access_modes.clone()),
            claim_ref: Some(claim_reference(claim)),
            persistent_volume_reclaim_policy: Some(
                class
                    .reclaim_policy
                    .clone()
                    .unwrap_or_else(|| DEFAULT_RECLAIM_POLICY.to_string()),
            ),
            storage_class_name: Some(class.name.clone()),
            flex_volume: Some(FlexPersistentVolumeSource {
                driver: class.provisioner.clone(),
                options: Some(BTreeMap::from([("name".to_string(), name.to_string())])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

// =============================================================================
// Volume Provisioner
// =============================================================================

/// Provisions one volume per accepted claim
pub struct VolumeProvisioner {
    config: ProvisionerConfig,
    options: PluginOptions,
    plugin: Arc<VolumePluginClient>,
    claims: ClaimStoreRef,
    events: EventSinkRef,
    volumes: VolumeSinkRef,
}

impl VolumeProvisioner {
    pub fn new(
        config: ProvisionerConfig,
        options: PluginOptions,
        plugin: Arc<VolumePluginClient>,
        claims: ClaimStoreRef,
        events: EventSinkRef,
        volumes: VolumeSinkRef,
    ) -> Self {
        Self {
            config,
            options,
            plugin,
            claims,
            events,
            volumes,
        }
    }

    /// Provision a volume for `claim` and wait for the claim to bind.
    ///
    /// `updates` carries later versions of the claim. Binding not observed
    /// within the bind timeout is logged, not failed.
    pub async fn provision(
        &self,
        claim: &PersistentVolumeClaim,
        class: &StorageClassInfo,
        updates: watch::Receiver<Arc<PersistentVolumeClaim>>,
    ) -> Result<PersistentVolume> {
        let namespace = claim.metadata.namespace.clone().unwrap_or_default();
        let name = volume_name(class, claim);
        let prefix = self.config.name_prefix.as_str();

        let mut options = build_options(prefix, &self.options, class, claim)?;
        if let Some(source) = options.remove(CLONE_OF_PVC_OPTION) {
            let source = source.as_str().unwrap_or_default().to_string();
            let source_volume = self.clone_source(&name, &namespace, &source).await?;
            options.insert(CLONE_OF_OPTION.to_string(), Value::String(source_volume));
        }

        info!("Provisioning volume {} for claim {}/{:?}", name, namespace, claim.metadata.name);
        let volume_name = if self.options.create_volumes {
            self.plugin.create(&name, options).await?
        } else {
            debug!("Volume creation disabled, adopting {}", name);
            self.plugin.get(&name).await?.name
        };

        let volume = build_volume(prefix, &volume_name, class, claim)?;
        let created = match self.volumes.create_volume(&volume).await {
            Ok(created) => created,
            Err(e) if e.is_conflict() => {
                info!("Persistent volume {} already published", volume_name);
                volume
            }
            Err(e) => {
                if self.options.create_volumes {
                    if let Err(cleanup) = self.plugin.delete(&volume_name).await {
                        warn!("Unable to remove volume {} - {}", volume_name, cleanup);
                    }
                }
                return Err(e);
            }
        };
        info!("Published persistent volume {}", volume_name);

        if wait_for_bound(updates, self.config.bind_timeout).await {
            info!("Claim {}/{:?} bound to {}", namespace, claim.metadata.name, volume_name);
        } else {
            warn!(
                "Claim {}/{:?} not bound to {} after {}s",
                namespace,
                claim.metadata.name,
                volume_name,
                self.config.bind_timeout.as_secs()
            );
        }
        Ok(created)
    }

    async fn clone_source(&self, target: &str, namespace: &str, source: &str) -> Result<String> {
        let source_claim = resolve_source_claim(
            self.claims.as_ref(),
            self.events.as_ref(),
            &volume_reference(target, namespace),
            namespace,
            source,
            self.config.max_wait_for_claims,
        )
        .await?;

        source_claim
            .spec
            .as_ref()
            .and_then(|s| s.volume_name.clone())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "PersistentVolume".to_string(),
                name: format!("bound to claim {}/{}", namespace, source),
            })
    }
}

/// Wait until the watched claim reports Bound; false on timeout or when the
/// sender is gone.
pub async fn wait_for_bound(
    mut updates: watch::Receiver<Arc<PersistentVolumeClaim>>,
    timeout: std::time::Duration,
) -> bool {
    let bound = async {
        loop {
            if ClaimPhase::of(&updates.borrow_and_update()) == ClaimPhase::Bound {
                return true;
            }
            if updates.changed().await.is_err() {
                return false;
            }
        }
    };
    tokio::time::timeout(timeout, bound).await.unwrap_or(false)
}
