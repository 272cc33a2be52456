//! In-memory storage layer for Warden
//!
//! [`MemoryStore`] implements the role, resource and action repositories and
//! the schema provider, with transaction tokens that stage writes until
//! commit.

pub mod repositories;
pub mod snapshot;
pub mod store;

pub use snapshot::*;
pub use store::MemoryStore;
