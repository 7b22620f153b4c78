use std::path::Path;

use super::errors::PolicyError;
use super::PolicyDocument;

/// Load a policy document from a YAML file.
pub fn load_policy_document(path: &Path) -> Result<PolicyDocument, PolicyError> {
    let contents = std::fs::read_to_string(path).map_err(|source| PolicyError::PolicyLoad {
        path: path.display().to_string(),
        source,
    })?;
    let doc: PolicyDocument = serde_yaml::from_str(&contents)?;

    tracing::info!(
        path = %path.display(),
        resource_types = doc.resource_types.len(),
        unions = doc.unions.len(),
        actions = doc.actions.len(),
        bindings = doc.action_bindings.len(),
        "loaded policy document"
    );

    Ok(doc)
}

/// Load and merge several policy files; lists append in file order. Only one
/// file may carry the `rbac` block.
pub fn load_policy_documents<P: AsRef<Path>>(paths: &[P]) -> Result<PolicyDocument, PolicyError> {
    let mut merged = PolicyDocument::default();

    for path in paths {
        let doc = load_policy_document(path.as_ref())?;

        if doc.rbac.is_some() {
            if merged.rbac.is_some() {
                return Err(PolicyError::InvalidRbacConfig(
                    "rbac configured more than once across policy files".to_string(),
                ));
            }
            merged.rbac = doc.rbac;
        }

        merged.unions.extend(doc.unions);
        merged.resource_types.extend(doc.resource_types);
        merged.actions.extend(doc.actions);
        merged.action_bindings.extend(doc.action_bindings);
    }

    Ok(merged)
}
