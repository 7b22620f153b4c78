//! Relation engine integration: the wire contract, an in-process engine for
//! tests and development, and the schema emitter.

pub mod client;
pub mod memory;
pub mod schema;

pub use client::{
    ClientError, ObjectRef, RelationEngine, Relationship, RelationshipFilter, RelationshipOp,
    RelationshipUpdate, SubjectFilter, SubjectRef, ZedToken,
};
pub use memory::MemoryRelationEngine;
pub use schema::{generate_schema, SchemaError};
