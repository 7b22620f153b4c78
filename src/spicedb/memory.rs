use std::sync::Mutex;

use async_trait::async_trait;

use crate::iapl::rbac;

use super::client::{
    ClientError, ObjectRef, RelationEngine, Relationship, RelationshipFilter, RelationshipOp,
    RelationshipUpdate, SubjectRef, ZedToken,
};

const MAX_DEPTH: usize = 10;

/// In-process relation engine for tests and development runs.
///
/// Tuples are held in insertion order; permission checks evaluate the
/// conventions the service writes: direct relations, userset expansion
/// (`group#member`), wildcard subjects, grant walks through role bindings,
/// and parent/owner inheritance.
#[derive(Default)]
pub struct MemoryRelationEngine {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    tuples: Vec<Relationship>,
    revision: u64,
}

impl MemoryRelationEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelationEngine for MemoryRelationEngine {
    async fn write_relationships(
        &self,
        updates: Vec<RelationshipUpdate>,
    ) -> Result<ZedToken, ClientError> {
        let mut state = self.lock()?;
        for update in updates {
            match update.op {
                RelationshipOp::Touch => {
                    if !state.tuples.contains(&update.relationship) {
                        state.tuples.push(update.relationship);
                    }
                }
                RelationshipOp::Delete => {
                    state.tuples.retain(|t| *t != update.relationship);
                }
            }
        }
        state.revision += 1;
        Ok(ZedToken(format!("memtok{}", state.revision)))
    }

    async fn read_relationships(
        &self,
        filter: RelationshipFilter,
    ) -> Result<Vec<Relationship>, ClientError> {
        let state = self.lock()?;
        Ok(state
            .tuples
            .iter()
            .filter(|t| matches_filter(t, &filter))
            .cloned()
            .collect())
    }

    async fn check_permission(
        &self,
        resource: ObjectRef,
        permission: &str,
        subject: SubjectRef,
        _consistency: Option<ZedToken>,
    ) -> Result<bool, ClientError> {
        let state = self.lock()?;
        Ok(state.allowed(&resource, permission, &subject.object, 0))
    }
}

impl MemoryRelationEngine {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, ClientError> {
        self.state
            .lock()
            .map_err(|_| ClientError::Rejected("engine state poisoned".to_string()))
    }
}

fn matches_filter(t: &Relationship, f: &RelationshipFilter) -> bool {
    if t.resource.object_type != f.resource_type {
        return false;
    }
    if let Some(id) = &f.resource_id {
        if t.resource.object_id != *id {
            return false;
        }
    }
    if let Some(relation) = &f.relation {
        if t.relation != *relation {
            return false;
        }
    }
    if let Some(sf) = &f.subject {
        if t.subject.object.object_type != sf.subject_type {
            return false;
        }
        if let Some(id) = &sf.subject_id {
            if t.subject.object.object_id != *id {
                return false;
            }
        }
        if let Some(relation) = &sf.relation {
            if t.subject.relation.as_deref() != Some(relation.as_str()) {
                return false;
            }
        }
    }
    true
}

impl State {
    fn subjects_for<'a>(
        &'a self,
        object: &'a ObjectRef,
        relation: &'a str,
    ) -> impl Iterator<Item = &'a SubjectRef> {
        self.tuples
            .iter()
            .filter(move |t| t.resource == *object && t.relation == relation)
            .map(|t| &t.subject)
    }

    /// Recursive userset walk, bounded by depth.
    fn has_relation(
        &self,
        object: &ObjectRef,
        relation: &str,
        principal: &ObjectRef,
        depth: usize,
    ) -> bool {
        if depth >= MAX_DEPTH {
            return false;
        }
        for subject in self.subjects_for(object, relation) {
            match &subject.relation {
                None => {
                    if subject.object == *principal {
                        return true;
                    }
                    // wildcard subject, e.g. foo/user:*
                    if subject.object.object_id == "*"
                        && subject.object.object_type == principal.object_type
                    {
                        return true;
                    }
                }
                Some(sub_relation) => {
                    if self.has_relation(&subject.object, sub_relation, principal, depth + 1) {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn allowed(
        &self,
        resource: &ObjectRef,
        permission: &str,
        principal: &ObjectRef,
        depth: usize,
    ) -> bool {
        if depth >= MAX_DEPTH {
            return false;
        }

        // a relation of the permission's own name grants it directly
        if self.has_relation(resource, permission, principal, depth) {
            return true;
        }

        // grants through role bindings attached to this resource
        for binding in self.subjects_for(resource, rbac::GRANT_RELATION) {
            if self.binding_allows(&binding.object, permission, principal) {
                return true;
            }
        }

        // inheritance up the parent/owner hierarchy
        for relation in [rbac::ROLE_BINDING_PARENT_RELATION, rbac::ROLE_OWNER_RELATION] {
            for parent in self.subjects_for(resource, relation) {
                if self.allowed(&parent.object, permission, principal, depth + 1) {
                    return true;
                }
            }
        }

        false
    }

    /// A binding grants an action when the principal is among its subjects
    /// and its role carries the action's relation.
    fn binding_allows(&self, binding: &ObjectRef, action: &str, principal: &ObjectRef) -> bool {
        if !self.has_relation(binding, rbac::ROLE_BINDING_SUBJECT_RELATION, principal, 0) {
            return false;
        }
        let action_rel = rbac::action_relation(action);
        self.subjects_for(binding, rbac::ROLE_BINDING_ROLE_RELATION)
            .any(|role| self.has_relation(&role.object, &action_rel, principal, 0))
    }
}
