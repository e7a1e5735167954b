//! Volume Plugin Module
//!
//! Speaks the Docker volume plugin protocol over a local Unix socket, and
//! locates managed plugins through the plugin registry.

pub mod client;
pub mod discovery;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::*;
pub use discovery::*;
pub use protocol::{Capabilities, Volume, VolumeOptions, NOT_FOUND};
pub use transport::*;
