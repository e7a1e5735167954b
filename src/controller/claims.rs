//! Claim Controller
//!
//! Filters claim events down to the ones this instance owns and dispatches a
//! provisioning task per claim, keeping at most one task in flight per uid.

use crate::claim::{class_name, ClaimObject, PROVISION_REASON};
use crate::config::ProvisionerConfig;
use crate::controller::informer::{claim_key, ClaimEventHandler};
use crate::controller::provision::{claim_reference, VolumeProvisioner};
use crate::domain::ports::{ClaimPhase, ClassLookupRef, EventSeverity, EventSinkRef};
use crate::metrics::Metrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

type ClaimSender = watch::Sender<Arc<PersistentVolumeClaim>>;

/// Event handler driving provisioning for claims of this instance's classes
#[derive(Clone)]
pub struct ClaimController {
    inner: Arc<Dispatcher>,
}

struct Dispatcher {
    config: ProvisionerConfig,
    classes: ClassLookupRef,
    events: EventSinkRef,
    provisioner: Arc<VolumeProvisioner>,
    /// Claims with a provisioning task running, by uid
    in_flight: DashMap<String, ClaimSender>,
    metrics: Arc<Metrics>,
}

impl ClaimController {
    pub fn new(
        config: ProvisionerConfig,
        classes: ClassLookupRef,
        events: EventSinkRef,
        provisioner: Arc<VolumeProvisioner>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Dispatcher {
                config,
                classes,
                events,
                provisioner,
                in_flight: DashMap::new(),
                metrics,
            }),
        }
    }

    /// Number of claims currently being provisioned
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Whether a provisioning task for `uid` is running
    pub fn is_in_flight(&self, uid: &str) -> bool {
        self.inner.in_flight.contains_key(uid)
    }
}

impl ClaimEventHandler for ClaimController {
    fn on_add(&self, claim: ClaimObject) {
        self.inner.metrics.observed();
        let claim = match claim.into_claim() {
            Ok(claim) => claim,
            Err(e) => {
                error!("Unable to decode added claim: {}", e);
                self.inner.metrics.skipped("decode");
                return;
            }
        };

        let phase = ClaimPhase::of(&claim);
        if phase != ClaimPhase::Pending {
            info!("Skipping claim {:?} in phase {}", claim.metadata.name, phase);
            self.inner.metrics.skipped("phase");
            return;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.process_added(claim).await });
    }

    fn on_update(&self, _old: ClaimObject, new: ClaimObject) {
        let claim = match new.into_claim() {
            Ok(claim) => claim,
            Err(e) => {
                error!("Unable to decode updated claim: {}", e);
                return;
            }
        };
        self.inner.notify(claim);
    }
}

impl Dispatcher {
    async fn process_added(&self, claim: Arc<PersistentVolumeClaim>) {
        let name = class_name(&claim);
        let class = match self.classes.get_class(&name).await {
            Ok(class) => class,
            Err(e) => {
                error!("Unable to get storage class for {:?}: {}", claim.metadata.name, e);
                self.metrics.skipped("class");
                return;
            }
        };

        if !class.provisioner.starts_with(&self.config.name_prefix) {
            info!(
                "Class {} is provisioned by {}, not by {}*",
                class.name, class.provisioner, self.config.name_prefix
            );
            self.metrics.skipped("provisioner");
            return;
        }

        let uid = claim_key(&claim);
        let updates = match self.in_flight.entry(uid.clone()) {
            Entry::Occupied(_) => {
                info!("Claim {} is already being provisioned", uid);
                self.metrics.skipped("in_flight");
                return;
            }
            Entry::Vacant(slot) => {
                let (sender, receiver) = watch::channel(claim.clone());
                slot.insert(sender);
                receiver
            }
        };

        info!(
            "Processing claim {:?} of class {} ({})",
            claim.metadata.name, class.name, uid
        );
        let result = self.provisioner.provision(&claim, &class, updates).await;
        self.in_flight.remove(&uid);

        match result {
            Ok(_) => self.metrics.provisioned("success"),
            Err(e) => {
                error!("Failed to provision claim {:?}: {}", claim.metadata.name, e);
                self.metrics.provisioned("failure");
                let message = format!(
                    "failed to provision volume with StorageClass {:?}: {}",
                    class.name, e
                );
                let reference = claim_reference(&claim);
                if let Err(e) = self
                    .events
                    .record(&reference, EventSeverity::Warning, PROVISION_REASON, &message)
                    .await
                {
                    warn!("Unable to record event for {:?}: {}", claim.metadata.name, e);
                }
            }
        }
    }

    /// Hand a newer version of a claim to its provisioning task, if any
    fn notify(&self, claim: Arc<PersistentVolumeClaim>) {
        if let Some(sender) = self.in_flight.get(&claim_key(&claim)) {
            debug!("Claim {:?} updated while in flight", claim.metadata.name);
            sender.send_replace(claim);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginOptions;
    use crate::plugin::protocol::CREATE_URI;
    use crate::plugin::testing::FakePlugin;
    use crate::plugin::VolumePluginClient;
    use crate::testing::{self, RecordingEvents, RecordingVolumes, StaticClaims, StaticClasses};
    use std::time::Duration;

    struct Harness {
        plugin: Arc<FakePlugin>,
        events: Arc<RecordingEvents>,
        volumes: Arc<RecordingVolumes>,
        metrics: Arc<Metrics>,
        controller: ClaimController,
    }

    fn harness() -> Harness {
        let plugin = Arc::new(FakePlugin::new());
        let events = Arc::new(RecordingEvents::default());
        let volumes = Arc::new(RecordingVolumes::default());
        let metrics = Arc::new(Metrics::new().unwrap());
        let config = ProvisionerConfig {
            bind_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let classes = StaticClasses::with(vec![
            testing::class("gold", "hpe.com/nimble", &[]),
            testing::class("foreign", "example.com/other", &[]),
        ]);

        let provisioner = Arc::new(VolumeProvisioner::new(
            config.clone(),
            PluginOptions::default(),
            Arc::new(VolumePluginClient::new(plugin.clone(), true)),
            Arc::new(StaticClaims::default()),
            events.clone(),
            volumes.clone(),
        ));
        let controller = ClaimController::new(
            config,
            Arc::new(classes),
            events.clone(),
            provisioner,
            metrics.clone(),
        );

        Harness {
            plugin,
            events,
            volumes,
            metrics,
            controller,
        }
    }

    fn claim(class: &str, phase: &str) -> PersistentVolumeClaim {
        testing::claim_of_class("ns", "data", "uid-1", phase, class)
    }

    fn exposition(metrics: &Metrics) -> String {
        String::from_utf8(metrics.encode().unwrap()).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_pending_claim_is_skipped() {
        let h = harness();
        h.controller.on_add(claim("gold", "Bound").into());
        settle().await;

        assert!(h.plugin.requests().is_empty());
        assert!(exposition(&h.metrics).contains("reason=\"phase\"} 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_class_is_skipped() {
        let h = harness();
        h.controller.on_add(claim("missing", "Pending").into());
        settle().await;

        assert!(h.plugin.requests().is_empty());
        assert_eq!(h.controller.in_flight(), 0);
        assert!(exposition(&h.metrics).contains("reason=\"class\"} 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_provisioner_is_skipped() {
        let h = harness();
        h.controller.on_add(claim("foreign", "Pending").into());
        settle().await;

        assert!(h.plugin.requests().is_empty());
        assert!(exposition(&h.metrics).contains("reason=\"provisioner\"} 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_claim_is_provisioned_until_bound() {
        let h = harness();
        h.controller.on_add(claim("gold", "Pending").into());
        settle().await;

        assert!(h.plugin.has_volume("gold-uid-1"));
        assert_eq!(h.volumes.volumes().len(), 1);
        assert!(h.controller.is_in_flight("uid-1"));

        let pending = ClaimObject::from(claim("gold", "Pending"));
        h.controller.on_update(pending, claim("gold", "Bound").into());
        settle().await;

        assert_eq!(h.controller.in_flight(), 0);
        assert!(exposition(&h.metrics).contains("outcome=\"success\"} 1"));
        assert!(h.events.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_add_is_deduplicated() {
        let h = harness();
        h.controller.on_add(claim("gold", "Pending").into());
        settle().await;
        h.controller.on_add(claim("gold", "Pending").into());
        settle().await;

        assert_eq!(h.plugin.requests_to(CREATE_URI).len(), 1);
        assert!(exposition(&h.metrics).contains("reason=\"in_flight\"} 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_emits_warning_and_clears_entry() {
        let h = harness();
        *h.plugin.fail_with.lock() = Some("array offline".to_string());
        h.controller.on_add(claim("gold", "Pending").into());
        settle().await;

        assert_eq!(h.controller.in_flight(), 0);
        let events = h.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, EventSeverity::Warning);
        assert_eq!(events[0].reason, PROVISION_REASON);
        assert_eq!(events[0].object.uid.as_deref(), Some("uid-1"));
        assert!(events[0].message.contains("array offline"));
        assert!(exposition(&h.metrics).contains("outcome=\"failure\"} 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_without_task_is_ignored() {
        let h = harness();
        let c = claim("gold", "Bound");
        h.controller.on_update(c.clone().into(), c.into());
        settle().await;
        assert!(h.plugin.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_claim_payload_is_dropped() {
        let h = harness();
        let object = kube::core::DynamicObject {
            types: Some(kube::core::TypeMeta {
                api_version: "v1".into(),
                kind: "ConfigMap".into(),
            }),
            metadata: kube::core::ObjectMeta {
                name: Some("settings".into()),
                ..Default::default()
            },
            data: serde_json::json!({}),
        };
        h.controller.on_add(ClaimObject::from(object));
        settle().await;

        assert!(h.plugin.requests().is_empty());
        assert_eq!(h.controller.in_flight(), 0);
        assert!(exposition(&h.metrics).contains("reason=\"decode\"} 1"));
    }
}
