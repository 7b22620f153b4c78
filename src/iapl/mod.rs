//! IAPL, the declarative policy language.
//!
//! Operators author a YAML document of resource types, unions, actions, and
//! action bindings. The compiler in [`policy`] validates the document,
//! expands unions, synthesizes the RBAC v2 resource types, and produces the
//! normalized resource types consumed by the schema emitter and the query
//! engine.

pub mod errors;
pub mod loader;
pub mod policy;
pub mod rbac;

pub use policy::Policy;
pub use rbac::{default_rbac, Rbac, RbacResource};

use serde::Deserialize;

/// Top-level policy document as authored by operators.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub rbac: Option<Rbac>,
    #[serde(default)]
    pub unions: Vec<Union>,
    #[serde(default, rename = "resourcetypes")]
    pub resource_types: Vec<ResourceType>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default, rename = "actionbindings")]
    pub action_bindings: Vec<ActionBinding>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceType {
    pub name: String,
    #[serde(default, rename = "idprefix")]
    pub id_prefix: String,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default, rename = "rolebindingv2")]
    pub role_binding_v2: Option<RoleBindingV2Config>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Relationship {
    pub relation: String,
    #[serde(default, rename = "targettypes")]
    pub target_types: Vec<TargetType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TargetType {
    pub name: String,
    #[serde(default, rename = "subjectrelation")]
    pub subject_relation: Option<String>,
}

/// A named set of resource types usable wherever a type name is expected in
/// an action binding.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Union {
    pub name: String,
    #[serde(default, rename = "resourcetypenames")]
    pub resource_type_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Action {
    pub name: String,
}

/// Attaches an action to a resource type or union, with the conditions that
/// grant it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionBinding {
    #[serde(rename = "actionname")]
    pub action_name: String,
    #[serde(rename = "typename")]
    pub type_name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// One disjunctive alternative for granting an action. The present variants
/// are AND-ed together; alternatives are OR-ed across the binding.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Condition {
    #[serde(default, rename = "relationshipaction")]
    pub relationship_action: Option<ConditionRelationshipAction>,
    #[serde(default, rename = "rolebinding")]
    pub role_binding: Option<ConditionRoleBinding>,
    #[serde(default, rename = "rolebindingv2")]
    pub role_binding_v2: Option<ConditionRoleBindingV2>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConditionRelationshipAction {
    pub relation: String,
    #[serde(default, rename = "actionname")]
    pub action_name: Option<String>,
}

/// v1 role-binding marker: the action flows through an action relation
/// declared on the type itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConditionRoleBinding {}

/// v2 role-binding marker: the action flows through the type's `grant`
/// relation to a role binding.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConditionRoleBindingV2 {}

/// Opts a resource type into v2 role bindings and permission inheritance.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleBindingV2Config {
    #[serde(default, rename = "inheritpermissionsfrom")]
    pub inherit_permissions_from: Vec<String>,
    #[serde(default, rename = "inheritallactions")]
    pub inherit_all_actions: bool,
}
