//! Claim event payloads
//!
//! Watch handlers receive claims in a few shapes. They are funnelled through
//! one conversion that yields a shared typed claim or a decode error.

use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::Resource;
use kube::core::DynamicObject;
use std::sync::Arc;

/// Accepted representations of a claim in an event
#[derive(Debug, Clone)]
pub enum ClaimObject {
    /// Shared typed claim, as kept in the claim cache
    Shared(Arc<PersistentVolumeClaim>),
    /// Owned typed claim
    Owned(PersistentVolumeClaim),
    /// Untyped object that must describe a claim
    Dynamic(DynamicObject),
}

impl ClaimObject {
    /// Convert into a shared typed claim
    pub fn into_claim(self) -> Result<Arc<PersistentVolumeClaim>> {
        match self {
            ClaimObject::Shared(claim) => Ok(claim),
            ClaimObject::Owned(claim) => Ok(Arc::new(claim)),
            ClaimObject::Dynamic(object) => {
                let kind = object.types.as_ref().map(|t| t.kind.as_str());
                if let Some(kind) = kind {
                    if kind != PersistentVolumeClaim::KIND {
                        return Err(Error::ClaimDecode(format!(
                            "unexpected kind {} for {}",
                            kind,
                            object.metadata.name.as_deref().unwrap_or("<unnamed>")
                        )));
                    }
                }
                let value = serde_json::to_value(&object)?;
                serde_json::from_value(value)
                    .map(Arc::new)
                    .map_err(|e| Error::ClaimDecode(e.to_string()))
            }
        }
    }
}

impl From<Arc<PersistentVolumeClaim>> for ClaimObject {
    fn from(claim: Arc<PersistentVolumeClaim>) -> Self {
        ClaimObject::Shared(claim)
    }
}

impl From<PersistentVolumeClaim> for ClaimObject {
    fn from(claim: PersistentVolumeClaim) -> Self {
        ClaimObject::Owned(claim)
    }
}

impl From<DynamicObject> for ClaimObject {
    fn from(object: DynamicObject) -> Self {
        ClaimObject::Dynamic(object)
    }
}
