//! Provisioner Metrics
//!
//! Prometheus counters owned by a dedicated registry, served on the metrics
//! endpoint.

use crate::error::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters describing controller activity
pub struct Metrics {
    registry: Registry,
    claims_observed: IntCounter,
    claims_skipped: IntCounterVec,
    provisions: IntCounterVec,
}

impl Metrics {
    /// Create the counters and register them
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let claims_observed = IntCounter::new(
            "claim_provisioner_claims_observed_total",
            "Claims delivered to the add handler",
        )?;
        let claims_skipped = IntCounterVec::new(
            Opts::new(
                "claim_provisioner_claims_skipped_total",
                "Claims not provisioned, by reason",
            ),
            &["reason"],
        )?;
        let provisions = IntCounterVec::new(
            Opts::new(
                "claim_provisioner_provisions_total",
                "Finished provisioning attempts, by outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(claims_observed.clone()))?;
        registry.register(Box::new(claims_skipped.clone()))?;
        registry.register(Box::new(provisions.clone()))?;

        Ok(Self {
            registry,
            claims_observed,
            claims_skipped,
            provisions,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn observed(&self) {
        self.claims_observed.inc();
    }

    pub fn skipped(&self, reason: &str) {
        self.claims_skipped.with_label_values(&[reason]).inc();
    }

    pub fn provisioned(&self, outcome: &str) {
        self.provisions.with_label_values(&[outcome]).inc();
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}
