//! Controller Module
//!
//! The watch loop over claims, the handler that filters and deduplicates
//! claim events, and the provisioning work it dispatches.

pub mod claims;
pub mod informer;
pub mod provision;

pub use claims::ClaimController;
pub use informer::{apply_event, claim_key, ClaimCache, ClaimEventHandler, ClaimInformer};
pub use provision::{build_options, build_volume, claim_reference, VolumeProvisioner};
