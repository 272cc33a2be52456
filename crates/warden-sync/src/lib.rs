//! Warden Sync - Keeps the permission registry in step with persisted roles
//!
//! [`SyncEngine`] runs the startup rebuild and applies [`LifecycleEvent`]s
//! incrementally.

pub mod engine;
pub mod events;

pub use engine::*;
pub use events::*;

#[cfg(test)]
mod tests;
