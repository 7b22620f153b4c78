//! Warden - permissions service fronting a ReBAC relation engine.
//!
//! A declarative policy document compiles into a relation-engine schema;
//! role and role-binding operations dual-write operator-facing metadata to
//! the relational store and relationship tuples to the relation engine.
//! All modules are exposed for testing purposes.

pub mod api;
pub mod gid;
pub mod iapl;
pub mod query;
pub mod settings;
pub mod spicedb;
pub mod storage;
pub mod testutil;
pub mod types;
