//! Adapters
//!
//! Implementations of the domain ports against a live cluster.

pub mod cluster;

pub use cluster::{KubeClassLookup, KubeEventSink, KubeVolumeSink};
