//! Warden ACL - Grant storage, decisions and association cascades
//!
//! [`PermissionRegistry`] answers checks from a [`GrantTable`] plus ordered
//! skip rules and role strategies. [`CascadeResolver`] turns explicit grants
//! into derived ones using the [`AssociationRuleTable`]. [`Acl`] is the
//! shared, lock-guarded handle the sync engine writes through and request
//! handlers read from.

pub mod cascade;
pub mod grant_table;
pub mod handle;
pub mod registry;
pub mod rules;
pub mod skip;

pub use cascade::*;
pub use grant_table::*;
pub use handle::*;
pub use registry::*;
pub use rules::*;
pub use skip::*;
