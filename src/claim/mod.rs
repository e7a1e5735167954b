//! Claim Module
//!
//! Everything the controller needs to know about a single claim: payload
//! decoding, class and override resolution, and clone source lookup.

pub mod crossref;
pub mod object;
pub mod resolver;

pub use crossref::*;
pub use object::*;
pub use resolver::*;
