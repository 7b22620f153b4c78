use std::collections::HashMap;

use futures::future::join_all;

use crate::gid::PrefixedId;
use crate::iapl::rbac;
use crate::spicedb::{
    ObjectRef, Relationship, RelationshipFilter, RelationshipUpdate, SubjectFilter, SubjectRef,
};
use crate::storage::{RoleBindingRow, StorageError};
use crate::types::{Resource, RoleBinding, RoleBindingSubject};

use super::{Engine, QueryError};

impl Engine {
    /// Grant `role` on `resource` to `subjects`. Writes the binding's role,
    /// parent, and subject tuples plus the resource-side grant edge, with the
    /// storage row created in the same transaction window.
    pub async fn create_role_binding(
        &self,
        actor: &Resource,
        resource: &Resource,
        role: &Resource,
        subjects: &[RoleBindingSubject],
    ) -> Result<RoleBinding, QueryError> {
        self.check_role_type(role)?;
        let rbac_cfg = self.rbac()?;

        // the role must exist before it can be bound
        self.store
            .get_role_by_id(self.store.connection(), &role.id)
            .await?;

        let binding_id = PrefixedId::new(&rbac_cfg.role_binding_resource.id_prefix)?;
        let binding_ref = self.binding_ref(&binding_id)?;
        let resource_ref = self.object_ref(resource);

        let mut updates = vec![
            RelationshipUpdate::touch(Relationship {
                resource: binding_ref.clone(),
                relation: rbac::ROLE_BINDING_ROLE_RELATION.to_string(),
                subject: self.subject_ref(role),
            }),
            RelationshipUpdate::touch(Relationship {
                resource: binding_ref.clone(),
                relation: rbac::ROLE_BINDING_PARENT_RELATION.to_string(),
                subject: SubjectRef::object(resource_ref.clone()),
            }),
            RelationshipUpdate::touch(Relationship {
                resource: resource_ref,
                relation: rbac::GRANT_RELATION.to_string(),
                subject: SubjectRef::object(binding_ref.clone()),
            }),
        ];
        for subject in subjects {
            updates.push(RelationshipUpdate::touch(Relationship {
                resource: binding_ref.clone(),
                relation: rbac::ROLE_BINDING_SUBJECT_RELATION.to_string(),
                subject: self.binding_subject_ref(subject)?,
            }));
        }

        let txn = self.store.begin().await?;

        let row = match self
            .store
            .create_role_binding(&txn, &actor.id, &binding_id, &role.id, &resource.id)
            .await
        {
            Ok(row) => row,
            Err(err) => {
                Self::rollback_logged(txn).await;
                return Err(err.into());
            }
        };

        let token = match self.write(updates).await {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(binding = %binding_id, error = %err, "relationship write failed, rolling back binding creation");
                Self::rollback_logged(txn).await;
                return Err(err);
            }
        };

        if let Err(err) = txn.commit().await {
            tracing::warn!(binding = %binding_id, error = %err, "storage commit failed after relationship write");
            return Err(StorageError::Db(err).into());
        }

        self.remember_token(&binding_id, &token);
        self.remember_token(&resource.id, &token);

        Ok(binding_from_parts(row, subjects.to_vec()))
    }

    /// Fetch one binding, joining the storage row with the subject tuples.
    pub async fn get_role_binding(&self, binding: &Resource) -> Result<RoleBinding, QueryError> {
        self.check_binding_type(binding)?;

        let (row, relationships) = tokio::join!(
            async {
                self.store
                    .get_role_binding(self.store.connection(), &binding.id)
                    .await
            },
            self.binding_relationships(&binding.id)
        );
        let row = row?;
        let subjects = self.subjects_from_relationships(&relationships?)?;

        Ok(binding_from_parts(row, subjects))
    }

    /// All bindings granting on `resource`, optionally narrowed to one role.
    /// Binding ids without a storage row are discarded.
    pub async fn list_role_bindings(
        &self,
        resource: &Resource,
        role: Option<&Resource>,
    ) -> Result<Vec<RoleBinding>, QueryError> {
        let rbac_cfg = self.rbac()?;

        let (grants, rows) = tokio::join!(
            self.read(RelationshipFilter {
                resource_type: self.namespaced(&resource.resource_type),
                resource_id: Some(resource.id.to_string()),
                relation: Some(rbac::GRANT_RELATION.to_string()),
                subject: Some(SubjectFilter {
                    subject_type: self.namespaced(&rbac_cfg.role_binding_resource.name),
                    subject_id: None,
                    relation: None,
                }),
            }),
            async {
                self.store
                    .list_resource_role_bindings(self.store.connection(), &resource.id)
                    .await
            }
        );
        let grants = grants?;
        let mut rows_by_id: HashMap<PrefixedId, RoleBindingRow> = rows?
            .into_iter()
            .map(|row| (row.id.clone(), row))
            .collect();

        let lookups = grants.iter().map(|grant| {
            let raw_id = grant.subject.object.object_id.clone();
            async move {
                let id = PrefixedId::parse(&raw_id)?;
                let relationships = self.binding_relationships(&id).await?;
                Ok::<(PrefixedId, Vec<Relationship>), QueryError>((id, relationships))
            }
        });

        let mut fetched = Vec::with_capacity(grants.len());
        let mut first_err = None;
        for result in join_all(lookups).await {
            match result {
                Ok(pair) => fetched.push(pair),
                Err(err) if first_err.is_none() => first_err = Some(err),
                Err(err) => tracing::warn!(error = %err, "additional binding lookup failed"),
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }

        let mut bindings = Vec::with_capacity(fetched.len());
        for (id, relationships) in fetched {
            let Some(row) = rows_by_id.remove(&id) else {
                tracing::warn!(binding = %id, "role binding in relation engine has no storage row");
                continue;
            };
            let subjects = self.subjects_from_relationships(&relationships)?;
            bindings.push(binding_from_parts(row, subjects));
        }

        if let Some(role) = role {
            bindings.retain(|b| b.role_id == role.id);
        }

        Ok(bindings)
    }

    /// Apply a subject diff to a binding: tuples for `add` are touched,
    /// tuples for `remove` are deleted, and the storage row's audit columns
    /// are bumped in the same transaction window.
    pub async fn assign_subjects(
        &self,
        actor: &Resource,
        binding: &Resource,
        add: &[RoleBindingSubject],
        remove: &[RoleBindingSubject],
    ) -> Result<RoleBinding, QueryError> {
        self.check_binding_type(binding)?;

        let binding_ref = self.binding_ref(&binding.id)?;
        let current = self
            .subjects_from_relationships(&self.binding_relationships(&binding.id).await?)?;

        let mut updates = Vec::new();
        for subject in add {
            if !current.contains(subject) {
                updates.push(RelationshipUpdate::touch(Relationship {
                    resource: binding_ref.clone(),
                    relation: rbac::ROLE_BINDING_SUBJECT_RELATION.to_string(),
                    subject: self.binding_subject_ref(subject)?,
                }));
            }
        }
        for subject in remove {
            if current.contains(subject) {
                updates.push(RelationshipUpdate::delete(Relationship {
                    resource: binding_ref.clone(),
                    relation: rbac::ROLE_BINDING_SUBJECT_RELATION.to_string(),
                    subject: self.binding_subject_ref(subject)?,
                }));
            }
        }

        let txn = self.store.begin().await?;

        let row = match self
            .store
            .touch_role_binding(&txn, &actor.id, &binding.id)
            .await
        {
            Ok(row) => row,
            Err(err) => {
                Self::rollback_logged(txn).await;
                return Err(err.into());
            }
        };

        if !updates.is_empty() {
            match self.write(updates).await {
                Ok(token) => {
                    self.remember_token(&binding.id, &token);
                    self.remember_token(&row.resource_id, &token);
                }
                Err(err) => {
                    Self::rollback_logged(txn).await;
                    return Err(err);
                }
            }
        }

        if let Err(err) = txn.commit().await {
            tracing::warn!(binding = %binding.id, error = %err, "storage commit failed after subject update");
            return Err(StorageError::Db(err).into());
        }

        let mut subjects: Vec<RoleBindingSubject> = current
            .into_iter()
            .filter(|s| !remove.contains(s))
            .collect();
        for subject in add {
            if !subjects.contains(subject) {
                subjects.push(subject.clone());
            }
        }

        Ok(binding_from_parts(row, subjects))
    }

    /// Remove a binding's tuples and storage row. Deleting a binding that no
    /// longer exists anywhere succeeds.
    pub async fn delete_role_binding(&self, binding: &Resource) -> Result<(), QueryError> {
        self.check_binding_type(binding)?;

        let relationships = self.binding_relationships(&binding.id).await?;
        let row = match self
            .store
            .get_role_binding(self.store.connection(), &binding.id)
            .await
        {
            Ok(row) => Some(row),
            Err(StorageError::NotFound { .. }) => None,
            Err(err) => return Err(err.into()),
        };

        if row.is_none() && relationships.is_empty() {
            return Ok(());
        }

        // the grant edge lives on the resource side; locate the resource
        // through the stored row, or the parent tuple when the row is gone
        let resource_ref = match &row {
            Some(row) => {
                let resource = self.new_resource_from_id(row.resource_id.clone())?;
                Some(self.object_ref(&resource))
            }
            None => relationships
                .iter()
                .find(|rel| rel.relation == rbac::ROLE_BINDING_PARENT_RELATION)
                .map(|rel| rel.subject.object.clone()),
        };

        let binding_ref = self.binding_ref(&binding.id)?;
        let mut updates: Vec<RelationshipUpdate> = relationships
            .into_iter()
            .map(RelationshipUpdate::delete)
            .collect();
        if let Some(resource_ref) = resource_ref {
            updates.push(RelationshipUpdate::delete(Relationship {
                resource: resource_ref,
                relation: rbac::GRANT_RELATION.to_string(),
                subject: SubjectRef::object(binding_ref),
            }));
        }

        let txn = self.store.begin().await?;
        if let Err(err) = self.store.delete_role_binding(&txn, &binding.id).await {
            Self::rollback_logged(txn).await;
            return Err(err.into());
        }
        let token = match self.write(updates).await {
            Ok(token) => token,
            Err(err) => {
                Self::rollback_logged(txn).await;
                return Err(err);
            }
        };
        if let Err(err) = txn.commit().await {
            tracing::warn!(binding = %binding.id, error = %err, "storage commit failed after relationship delete");
            return Err(StorageError::Db(err).into());
        }

        self.remember_token(&binding.id, &token);
        if let Some(row) = row {
            self.remember_token(&row.resource_id, &token);
        }
        Ok(())
    }

    /// All tuples where the binding is the resource: role, parent, subjects.
    async fn binding_relationships(
        &self,
        binding_id: &PrefixedId,
    ) -> Result<Vec<Relationship>, QueryError> {
        let rbac_cfg = self.rbac()?;
        self.read(RelationshipFilter {
            resource_type: self.namespaced(&rbac_cfg.role_binding_resource.name),
            resource_id: Some(binding_id.to_string()),
            ..Default::default()
        })
        .await
    }

    fn subjects_from_relationships(
        &self,
        relationships: &[Relationship],
    ) -> Result<Vec<RoleBindingSubject>, QueryError> {
        let mut subjects = Vec::new();
        for rel in relationships {
            if rel.relation != rbac::ROLE_BINDING_SUBJECT_RELATION {
                continue;
            }
            subjects.push(RoleBindingSubject {
                subject_id: PrefixedId::parse(&rel.subject.object.object_id)?,
                subject_relation: rel.subject.relation.clone(),
            });
        }
        Ok(subjects)
    }

    fn binding_subject_ref(&self, subject: &RoleBindingSubject) -> Result<SubjectRef, QueryError> {
        let resource = self.new_resource_from_id(subject.subject_id.clone())?;
        Ok(SubjectRef {
            object: self.object_ref(&resource),
            relation: subject.subject_relation.clone(),
        })
    }

    fn binding_ref(&self, binding_id: &PrefixedId) -> Result<ObjectRef, QueryError> {
        let rbac_cfg = self.rbac()?;
        Ok(ObjectRef::new(
            self.namespaced(&rbac_cfg.role_binding_resource.name),
            binding_id.as_str(),
        ))
    }

    fn check_binding_type(&self, binding: &Resource) -> Result<(), QueryError> {
        let rbac_cfg = self.rbac()?;
        if binding.resource_type != rbac_cfg.role_binding_resource.name {
            return Err(QueryError::InvalidType(format!(
                "{} is not a valid role binding",
                binding.resource_type
            )));
        }
        Ok(())
    }
}

fn binding_from_parts(row: RoleBindingRow, subjects: Vec<RoleBindingSubject>) -> RoleBinding {
    RoleBinding {
        id: row.id,
        role_id: row.role_id,
        resource_id: row.resource_id,
        subjects,
        created_by: Some(row.created_by),
        updated_by: Some(row.updated_by),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}
