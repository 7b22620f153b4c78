use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference to an object held by the relation engine, rendered
/// `namespace/type:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// Reference to a subject: an object, optionally narrowed to one of its
/// relations (`group:g1#member`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectRef {
    pub object: ObjectRef,
    pub relation: Option<String>,
}

impl SubjectRef {
    pub fn object(object: ObjectRef) -> Self {
        Self {
            object,
            relation: None,
        }
    }
}

impl std::fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.object)?;
        if let Some(relation) = &self.relation {
            write!(f, "#{relation}")?;
        }
        Ok(())
    }
}

/// One relationship tuple: `resource#relation@subject`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relationship {
    pub resource: ObjectRef,
    pub relation: String,
    pub subject: SubjectRef,
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}@{}", self.resource, self.relation, self.subject)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipOp {
    /// Idempotent create.
    Touch,
    /// Idempotent delete.
    Delete,
}

#[derive(Debug, Clone)]
pub struct RelationshipUpdate {
    pub op: RelationshipOp,
    pub relationship: Relationship,
}

impl RelationshipUpdate {
    pub fn touch(relationship: Relationship) -> Self {
        Self {
            op: RelationshipOp::Touch,
            relationship,
        }
    }

    pub fn delete(relationship: Relationship) -> Self {
        Self {
            op: RelationshipOp::Delete,
            relationship,
        }
    }
}

/// Filter for reading relationships. `resource_type` is required; everything
/// else narrows the match.
#[derive(Debug, Clone, Default)]
pub struct RelationshipFilter {
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub relation: Option<String>,
    pub subject: Option<SubjectFilter>,
}

#[derive(Debug, Clone, Default)]
pub struct SubjectFilter {
    pub subject_type: String,
    pub subject_id: Option<String>,
    pub relation: Option<String>,
}

/// Opaque consistency token returned by every write; later reads may pass it
/// back for at-least-as-fresh semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZedToken(pub String);

#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
    /// Transient: the engine could not be reached; the caller decides retry.
    #[error("relation engine unavailable: {0}")]
    #[diagnostic(code(warden::spicedb::unavailable))]
    Unavailable(String),

    #[error("relation engine rejected the request: {0}")]
    #[diagnostic(code(warden::spicedb::rejected))]
    Rejected(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Unavailable(_))
    }
}

/// The three calls the service issues against the relation engine.
#[async_trait]
pub trait RelationEngine: Send + Sync {
    async fn write_relationships(
        &self,
        updates: Vec<RelationshipUpdate>,
    ) -> Result<ZedToken, ClientError>;

    async fn read_relationships(
        &self,
        filter: RelationshipFilter,
    ) -> Result<Vec<Relationship>, ClientError>;

    async fn check_permission(
        &self,
        resource: ObjectRef,
        permission: &str,
        subject: SubjectRef,
        consistency: Option<ZedToken>,
    ) -> Result<bool, ClientError>;
}
