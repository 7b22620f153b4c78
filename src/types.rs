use serde::{Deserialize, Serialize};

use crate::gid::PrefixedId;

/// A typed reference to a concrete entity, resolved from a prefixed id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: PrefixedId,
    pub resource_type: String,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

/// A resource type in the normalized policy, ready for schema emission.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceType {
    pub name: String,
    pub id_prefix: String,
    pub relationships: Vec<Relationship>,
    pub actions: Vec<Action>,
}

/// A typed, directed edge recognized by the relation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub relation: String,
    pub targets: Vec<TargetType>,
}

/// One permitted subject of a relationship. `subject_identifier` carries
/// wildcard subjects (`user:*`); `subject_relation` carries userset
/// references (`group#member`). Both render verbatim into the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetType {
    pub name: String,
    pub subject_identifier: Option<String>,
    pub subject_relation: Option<String>,
}

impl TargetType {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject_identifier: None,
            subject_relation: None,
        }
    }

    pub fn wildcard(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject_identifier: Some("*".to_string()),
            subject_relation: None,
        }
    }
}

/// A named action with the disjunction of conditions that grant it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub conditions: Vec<Condition>,
}

/// One alternative for granting an action. Alternatives are OR-ed across an
/// action; the role-binding variants AND the binding marker with the
/// relationship walk they carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    RelationshipAction(RelationshipAction),
    RoleBindingV1(RelationshipAction),
    RoleBindingV2(RelationshipAction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipAction {
    pub relation: String,
    pub action_name: Option<String>,
}

impl RelationshipAction {
    pub fn relation(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            action_name: None,
        }
    }

    pub fn walk(relation: impl Into<String>, action_name: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            action_name: Some(action_name.into()),
        }
    }
}

/// A role groups actions under an owner resource. Metadata (name, audit
/// columns) comes from the relational store; actions come from the relation
/// engine. Either side may be absent when the stores disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: PrefixedId,
    pub name: String,
    pub actions: Vec<String>,
    pub resource_id: Option<PrefixedId>,
    pub created_by: Option<PrefixedId>,
    pub updated_by: Option<PrefixedId>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A grant of a role to subjects on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub id: PrefixedId,
    pub role_id: PrefixedId,
    pub resource_id: PrefixedId,
    pub subjects: Vec<RoleBindingSubject>,
    pub created_by: Option<PrefixedId>,
    pub updated_by: Option<PrefixedId>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleBindingSubject {
    pub subject_id: PrefixedId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_relation: Option<String>,
}
