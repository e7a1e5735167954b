//! Cross-claim resolution for clone requests
//!
//! The claim cache trails the API server, so the source of a clone may not be
//! visible yet. Lookups poll the cache in one second steps up to a bound.

use crate::domain::ports::{ClaimPhase, ClaimStore, EventSeverity, EventSink};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolumeClaim};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Step between two scans of the claim cache
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Reason attached to events emitted while provisioning
pub const PROVISION_REASON: &str = "ProvisionStorage";

/// Bound claim called `name` in `namespace`, if cached
pub fn find_bound_claim(
    store: &dyn ClaimStore,
    namespace: &str,
    name: &str,
) -> Option<Arc<PersistentVolumeClaim>> {
    store.list().into_iter().find(|claim| {
        debug!(
            "Handling claim {:?} with namespace {:?} and phase {}",
            claim.metadata.name,
            claim.metadata.namespace,
            ClaimPhase::of(claim)
        );
        claim.metadata.name.as_deref() == Some(name)
            && claim.metadata.namespace.as_deref() == Some(namespace)
            && ClaimPhase::of(claim) == ClaimPhase::Bound
    })
}

/// Locate the bound source claim of a clone, waiting up to `max_wait_secs`.
///
/// On timeout a warning is attached to `target` and a not-found error is
/// returned.
pub async fn resolve_source_claim(
    store: &dyn ClaimStore,
    events: &dyn EventSink,
    target: &ObjectReference,
    namespace: &str,
    claim_name: &str,
    max_wait_secs: u64,
) -> Result<Arc<PersistentVolumeClaim>> {
    debug!("Resolving source claim {}/{}", namespace, claim_name);

    let mut waited = 0;
    loop {
        if let Some(claim) = find_bound_claim(store, namespace, claim_name) {
            debug!("Claim {} matched in namespace {}", claim_name, namespace);
            return Ok(claim);
        }
        if waited >= max_wait_secs {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
        waited += 1;
    }

    let message = format!(
        "clone of a pvc({}) for namespace({}) was requested but we couldn't find it",
        claim_name, namespace
    );
    error!("{} after waiting for {} seconds", message, waited);
    if let Err(e) = events
        .record(target, EventSeverity::Warning, PROVISION_REASON, &message)
        .await
    {
        warn!("Unable to record event for {:?}: {}", target.name, e);
    }

    Err(Error::ClaimNotFound {
        namespace: namespace.to_string(),
        name: claim_name.to_string(),
        waited_secs: waited,
    })
}
