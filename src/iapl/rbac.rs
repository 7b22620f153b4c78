use serde::Deserialize;

use super::TargetType;

/// Relation linking a role to the resource that owns it.
pub const ROLE_OWNER_RELATION: &str = "owner";
/// Relation linking a role binding to its role.
pub const ROLE_BINDING_ROLE_RELATION: &str = "role";
/// Relation linking a role binding to its subjects.
pub const ROLE_BINDING_SUBJECT_RELATION: &str = "subject";
/// Relation linking a role binding to the resource it grants on.
pub const ROLE_BINDING_PARENT_RELATION: &str = "parent";
/// Relation linking a bindable resource to its role bindings.
pub const GRANT_RELATION: &str = "grant";

/// RBAC v2 configuration: which synthesized types carry roles and role
/// bindings, who may own roles, and who may be granted them.
#[derive(Debug, Clone, Deserialize)]
pub struct Rbac {
    #[serde(rename = "roleresource")]
    pub role_resource: RbacResource,
    #[serde(rename = "rolebindingresource")]
    pub role_binding_resource: RbacResource,
    #[serde(default, rename = "rolesubjecttypes")]
    pub role_subject_types: Vec<String>,
    #[serde(default, rename = "roleowners")]
    pub role_owners: Vec<String>,
    #[serde(default, rename = "rolebindingsubjects")]
    pub role_binding_subjects: Vec<TargetType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RbacResource {
    pub name: String,
    #[serde(rename = "idprefix")]
    pub id_prefix: String,
}

/// The default RBAC wiring: v2 roles owned by tenants, grantable to users
/// and clients, with group-member usersets as binding subjects.
pub fn default_rbac() -> Rbac {
    Rbac {
        role_resource: RbacResource {
            name: "rolev2".to_string(),
            id_prefix: "permrv2".to_string(),
        },
        role_binding_resource: RbacResource {
            name: "rolebinding".to_string(),
            id_prefix: "permrbn".to_string(),
        },
        role_subject_types: vec!["user".to_string(), "client".to_string()],
        role_owners: vec!["tenant".to_string()],
        role_binding_subjects: vec![
            TargetType {
                name: "user".to_string(),
                subject_relation: None,
            },
            TargetType {
                name: "client".to_string(),
                subject_relation: None,
            },
            TargetType {
                name: "group".to_string(),
                subject_relation: Some("member".to_string()),
            },
        ],
    }
}

/// Name of the relation on the role type carrying an action's subjects.
pub fn action_relation(action: &str) -> String {
    format!("{action}_rel")
}

/// Inverse of [`action_relation`].
pub fn relation_action(relation: &str) -> Option<&str> {
    relation.strip_suffix("_rel")
}
