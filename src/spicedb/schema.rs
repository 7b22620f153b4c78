use std::fmt::Write as _;

use miette::Diagnostic;
use thiserror::Error;

use crate::iapl::rbac::ROLE_BINDING_SUBJECT_RELATION;
use crate::types::{Condition, ResourceType, TargetType};

#[derive(Debug, Error, Diagnostic)]
pub enum SchemaError {
    #[error("no namespace provided")]
    #[diagnostic(
        code(warden::spicedb::no_namespace),
        help("every relation engine definition lives under a namespace, e.g. `warden/tenant`")
    )]
    NoNamespace,
}

/// Render the normalized resource types as a relation-engine schema string.
/// Output is byte-for-byte stable for a given input.
pub fn generate_schema(
    namespace: &str,
    resource_types: &[ResourceType],
) -> Result<String, SchemaError> {
    if namespace.is_empty() {
        return Err(SchemaError::NoNamespace);
    }

    let mut out = String::new();
    for rt in resource_types {
        // infallible: writing to a String cannot fail
        let _ = writeln!(out, "definition {namespace}/{} {{", rt.name);

        for rel in &rt.relationships {
            let targets: Vec<String> = rel
                .targets
                .iter()
                .map(|t| render_target(namespace, t))
                .collect();
            let _ = writeln!(out, "    relation {}: {}", rel.relation, targets.join(" | "));
        }

        for action in &rt.actions {
            let terms: Vec<String> = action.conditions.iter().map(render_condition).collect();
            if !terms.is_empty() {
                let _ = writeln!(out, "    permission {} = {}", action.name, terms.join(" + "));
            }
        }

        out.push_str("}\n");
    }

    Ok(out)
}

fn render_target(namespace: &str, target: &TargetType) -> String {
    let mut rendered = format!("{namespace}/{}", target.name);
    if let Some(id) = &target.subject_identifier {
        let _ = write!(rendered, ":{id}");
    }
    if let Some(relation) = &target.subject_relation {
        let _ = write!(rendered, "#{relation}");
    }
    rendered
}

fn render_condition(condition: &Condition) -> String {
    match condition {
        Condition::RelationshipAction(ra) => match &ra.action_name {
            Some(action) => format!("{}->{}", ra.relation, action),
            None => ra.relation.clone(),
        },
        // v1: the action relation on the type itself carries the grant
        Condition::RoleBindingV1(ra) => ra.relation.clone(),
        // v2: the bound subject AND the role's action relation
        Condition::RoleBindingV2(ra) => match &ra.action_name {
            Some(action) => format!(
                "{} & {}->{}",
                ROLE_BINDING_SUBJECT_RELATION, ra.relation, action
            ),
            None => format!("{} & {}", ROLE_BINDING_SUBJECT_RELATION, ra.relation),
        },
    }
}
