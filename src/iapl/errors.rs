use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PolicyError {
    #[error("resource type or union `{0}` already exists")]
    #[diagnostic(code(warden::iapl::type_exists))]
    TypeExists(String),

    #[error("unknown resource type `{0}`")]
    #[diagnostic(code(warden::iapl::unknown_type))]
    UnknownType(String),

    #[error("unknown relation `{relation}` on `{type_name}`")]
    #[diagnostic(code(warden::iapl::unknown_relation))]
    UnknownRelation {
        type_name: String,
        relation: String,
    },

    #[error("unknown action `{action}` for `{type_name}`")]
    #[diagnostic(code(warden::iapl::unknown_action))]
    UnknownAction { type_name: String, action: String },

    #[error("invalid condition on `{type_name}.{action}`: {reason}")]
    #[diagnostic(
        code(warden::iapl::invalid_condition),
        help("a condition needs a relationship walk, a role-binding marker paired with one, or a grant relationship on the type")
    )]
    InvalidCondition {
        type_name: String,
        action: String,
        reason: String,
    },

    #[error("invalid RBAC config: {0}")]
    #[diagnostic(
        code(warden::iapl::invalid_rbac_config),
        help("declare every role owner as a resource type and configure at least one")
    )]
    InvalidRbacConfig(String),

    #[error("failed to read policy file `{path}`")]
    #[diagnostic(code(warden::iapl::policy_load))]
    PolicyLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy document: {0}")]
    #[diagnostic(code(warden::iapl::policy_parse))]
    PolicyParse(#[from] serde_yaml::Error),
}
