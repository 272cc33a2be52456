//! Collaborator trait implementations for [`MemoryStore`](crate::MemoryStore)

pub mod action;
pub mod resource;
pub mod role;
pub mod schema;
pub mod unit_of_work;
