//! Claim Informer
//!
//! Lists and watches claims in every namespace, keeps a local cache keyed by
//! uid and turns watch events into add/update callbacks. The cache is
//! redelivered as updates every resync period to cover missed events.

use crate::claim::ClaimObject;
use crate::domain::ports::ClaimStore;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Event Handler
// =============================================================================

/// Receives claim lifecycle callbacks, one at a time
pub trait ClaimEventHandler: Send + Sync {
    /// A claim was seen for the first time
    fn on_add(&self, claim: ClaimObject);

    /// A known claim was observed again
    fn on_update(&self, old: ClaimObject, new: ClaimObject);
}

// =============================================================================
// Claim Cache
// =============================================================================

/// Locally cached claims, keyed by uid
#[derive(Debug, Clone, Default)]
pub struct ClaimCache {
    claims: Arc<RwLock<BTreeMap<String, Arc<PersistentVolumeClaim>>>>,
}

/// Cache key of a claim: its uid, or `namespace/name` before one is assigned
pub fn claim_key(claim: &PersistentVolumeClaim) -> String {
    match claim.metadata.uid.as_deref() {
        Some(uid) if !uid.is_empty() => uid.to_string(),
        _ => format!(
            "{}/{}",
            claim.metadata.namespace.as_deref().unwrap_or_default(),
            claim.metadata.name.as_deref().unwrap_or_default()
        ),
    }
}

impl ClaimCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached claims
    pub fn len(&self) -> usize {
        self.claims.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.read().is_empty()
    }

    fn upsert(&self, claim: Arc<PersistentVolumeClaim>) -> Option<Arc<PersistentVolumeClaim>> {
        self.claims.write().insert(claim_key(&claim), claim)
    }

    fn remove(&self, claim: &PersistentVolumeClaim) -> Option<Arc<PersistentVolumeClaim>> {
        self.claims.write().remove(&claim_key(claim))
    }

    fn retain_keys(&self, keep: &BTreeSet<String>) {
        self.claims.write().retain(|key, _| keep.contains(key));
    }
}

impl ClaimStore for ClaimCache {
    fn list(&self) -> Vec<Arc<PersistentVolumeClaim>> {
        self.claims.read().values().cloned().collect()
    }
}

// =============================================================================
// Event Application
// =============================================================================

fn deliver(cache: &ClaimCache, handler: &dyn ClaimEventHandler, claim: PersistentVolumeClaim) {
    let claim = Arc::new(claim);
    match cache.upsert(claim.clone()) {
        Some(old) => handler.on_update(old.into(), claim.into()),
        None => handler.on_add(claim.into()),
    }
}

/// Apply one watch event to the cache and notify the handler
pub fn apply_event(
    cache: &ClaimCache,
    handler: &dyn ClaimEventHandler,
    event: Event<PersistentVolumeClaim>,
) {
    match event {
        Event::Applied(claim) => deliver(cache, handler, claim),
        Event::Deleted(claim) => {
            debug!("Claim {:?} deleted", claim.metadata.name);
            cache.remove(&claim);
        }
        Event::Restarted(claims) => {
            info!("Claim watch (re)listed {} claims", claims.len());
            let keep: BTreeSet<String> = claims.iter().map(claim_key).collect();
            cache.retain_keys(&keep);
            for claim in claims {
                deliver(cache, handler, claim);
            }
        }
    }
}

/// Redeliver every cached claim as an update
pub fn resync(cache: &ClaimCache, handler: &dyn ClaimEventHandler) {
    let claims = cache.list();
    debug!("Resyncing {} claims", claims.len());
    for claim in claims {
        handler.on_update(claim.clone().into(), claim.into());
    }
}

// =============================================================================
// Claim Informer
// =============================================================================

/// Watch/resync loop over claims with a start and a stop step
pub struct ClaimInformer {
    cache: ClaimCache,
    resync_period: Duration,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClaimInformer {
    /// Create an informer; nothing is watched until [`ClaimInformer::start`]
    pub fn new(resync_period: Duration) -> Self {
        Self {
            cache: ClaimCache::new(),
            resync_period,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Read-only view of the cached claims
    pub fn store(&self) -> ClaimCache {
        self.cache.clone()
    }

    /// Start watching claims in all namespaces
    pub fn start(&self, client: Client, handler: Arc<dyn ClaimEventHandler>) {
        let api: Api<PersistentVolumeClaim> = Api::all(client);
        let stream = watcher(api);
        self.start_with(stream, handler);
    }

    /// Start the loop over an arbitrary watch event stream
    pub fn start_with<S, E>(&self, stream: S, handler: Arc<dyn ClaimEventHandler>)
    where
        S: Stream<Item = Result<Event<PersistentVolumeClaim>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("Claim informer already started");
            return;
        }

        info!(
            "Starting claim informer (resync every {}s)",
            self.resync_period.as_secs()
        );
        *task = Some(tokio::spawn(run(
            self.cache.clone(),
            stream,
            handler,
            self.resync_period,
            self.cancel.clone(),
        )));
    }

    /// Stop watching and wait for the loop to exit
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("Claim informer stopped");
    }
}

fn watcher(
    api: Api<PersistentVolumeClaim>,
) -> impl Stream<Item = Result<Event<PersistentVolumeClaim>, watcher::Error>> + Send + 'static {
    watcher::watcher(api, watcher::Config::default()).default_backoff()
}

async fn run<S, E>(
    cache: ClaimCache,
    stream: S,
    handler: Arc<dyn ClaimEventHandler>,
    resync_period: Duration,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Event<PersistentVolumeClaim>, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let mut stream = Box::pin(stream);
    let mut ticker = interval_at(Instant::now() + resync_period, resync_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => resync(&cache, handler.as_ref()),
            next = stream.next() => match next {
                Some(Ok(event)) => apply_event(&cache, handler.as_ref(), event),
                Some(Err(e)) => warn!("Error streaming claim events: {}", e),
                None => {
                    warn!("Claim watch stream ended");
                    break;
                }
            },
        }
    }
}
