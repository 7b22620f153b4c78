use std::collections::HashMap;

use futures::future::join_all;

use crate::gid::PrefixedId;
use crate::iapl::rbac;
use crate::spicedb::{
    ObjectRef, Relationship, RelationshipFilter, RelationshipUpdate, SubjectFilter, SubjectRef,
};
use crate::storage::StorageError;
use crate::types::{Resource, Role};

use super::{Engine, QueryError};

impl Engine {
    /// Create a v2 role owned by `owner`, granting `actions`.
    ///
    /// The storage row and the relationship writes share the transaction
    /// window: a relationship failure rolls the row back, while a commit
    /// failure after a successful relationship write strands unreferenced
    /// tuples (no binding can name the discarded role, and reads join
    /// against storage).
    pub async fn create_role_v2(
        &self,
        actor: &Resource,
        owner: &Resource,
        name: &str,
        actions: &[String],
    ) -> Result<Role, QueryError> {
        let rbac_cfg = self.rbac()?;
        let name = name.trim();
        let role_id = PrefixedId::new(&rbac_cfg.role_resource.id_prefix)?;

        let mut updates = self.role_action_relationships(&role_id, actions)?;
        updates.push(self.role_owner_relationship(&role_id, owner)?);

        let txn = self.store.begin().await?;

        let db_role = match self
            .store
            .create_role(&txn, &actor.id, &role_id, name, &owner.id)
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
                tracing::warn!(role = %role_id, error = %err, "relationship write failed, rolling back role creation");
                Self::rollback_logged(txn).await;
                return Err(err);
            }
        };

        if let Err(err) = txn.commit().await {
            tracing::warn!(role = %role_id, error = %err, "storage commit failed after relationship write");
            return Err(StorageError::Db(err).into());
        }

        self.remember_token(&role_id, &token);
        self.remember_token(&owner.id, &token);

        Ok(Role {
            id: role_id,
            name: name.to_string(),
            actions: actions.to_vec(),
            resource_id: Some(db_role.resource_id),
            created_by: Some(db_role.created_by),
            updated_by: Some(db_role.updated_by),
            created_at: db_role.created_at,
            updated_at: db_role.updated_at,
        })
    }

    /// All v2 roles owned by `owner`, joined across both stores: storage is
    /// the source of truth for names and audit columns, the relation engine
    /// for actions. A role present on only one side is kept, with the other
    /// side's fields empty, and logged.
    pub async fn list_roles_v2(&self, owner: &Resource) -> Result<Vec<Role>, QueryError> {
        let (engine_side, store_side) = tokio::join!(self.list_engine_roles(owner), async {
            self.store
                .list_resource_roles(self.store.connection(), &owner.id)
                .await
        });
        let engine_roles = engine_side?;
        let store_rows = store_side?;

        let mut rows_by_id: HashMap<PrefixedId, _> = store_rows
            .into_iter()
            .map(|row| (row.id.clone(), row))
            .collect();

        let mut roles = Vec::with_capacity(engine_roles.len());
        for role in engine_roles {
            match rows_by_id.remove(&role.id) {
                Some(row) => roles.push(Role {
                    id: row.id,
                    name: row.name,
                    actions: role.actions,
                    resource_id: Some(row.resource_id),
                    created_by: Some(row.created_by),
                    updated_by: Some(row.updated_by),
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                }),
                None => {
                    tracing::warn!(role = %role.id, "role in relation engine has no storage row");
                    roles.push(role);
                }
            }
        }

        let mut leftovers: Vec<_> = rows_by_id.into_values().collect();
        leftovers.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        for row in leftovers {
            tracing::warn!(role = %row.id, "role in storage is missing from the relation engine");
            roles.push(Role {
                id: row.id,
                name: row.name,
                actions: Vec::new(),
                resource_id: Some(row.resource_id),
                created_by: Some(row.created_by),
                updated_by: Some(row.updated_by),
                created_at: row.created_at,
                updated_at: row.updated_at,
            });
        }

        Ok(roles)
    }

    /// Fetch one v2 role, joining actions from the relation engine with
    /// metadata from storage.
    pub async fn get_role_v2(&self, role: &Resource) -> Result<Role, QueryError> {
        self.check_role_type(role)?;

        let (actions, row) = tokio::join!(self.list_role_actions(&role.id), async {
            self.store
                .get_role_by_id(self.store.connection(), &role.id)
                .await
        });
        let actions = actions?;
        let row = row?;

        Ok(Role {
            id: row.id,
            name: row.name,
            actions,
            resource_id: Some(row.resource_id),
            created_by: Some(row.created_by),
            updated_by: Some(row.updated_by),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    /// Delete a role, its owner relationship, and its action relationships.
    /// A role still referenced by bindings cannot be deleted.
    pub async fn delete_role_v2(&self, role: &Resource) -> Result<(), QueryError> {
        self.check_role_type(role)?;
        let rbac_cfg = self.rbac()?;

        let references = self
            .read(RelationshipFilter {
                resource_type: self.namespaced(&rbac_cfg.role_binding_resource.name),
                relation: Some(rbac::ROLE_BINDING_ROLE_RELATION.to_string()),
                subject: Some(SubjectFilter {
                    subject_type: self.namespaced(&rbac_cfg.role_resource.name),
                    subject_id: Some(role.id.to_string()),
                    relation: None,
                }),
                ..Default::default()
            })
            .await?;
        if !references.is_empty() {
            return Err(QueryError::Precondition(format!(
                "role {} is referenced by {} role binding(s)",
                role.id,
                references.len()
            )));
        }

        let relationships = self
            .read(RelationshipFilter {
                resource_type: self.namespaced(&rbac_cfg.role_resource.name),
                resource_id: Some(role.id.to_string()),
                ..Default::default()
            })
            .await?;
        let updates: Vec<RelationshipUpdate> = relationships
            .into_iter()
            .map(RelationshipUpdate::delete)
            .collect();

        let txn = self.store.begin().await?;
        if let Err(err) = self.store.delete_role(&txn, &role.id).await {
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
            tracing::warn!(role = %role.id, error = %err, "storage commit failed after relationship delete");
            return Err(StorageError::Db(err).into());
        }

        self.remember_token(&role.id, &token);
        Ok(())
    }

    /// Actions granted by a role, read from its action relations. Every
    /// subject type carries the same set, so one suffices.
    pub(crate) async fn list_role_actions(
        &self,
        role_id: &PrefixedId,
    ) -> Result<Vec<String>, QueryError> {
        let rbac_cfg = self.rbac()?;
        let Some(subject_type) = rbac_cfg.role_subject_types.first() else {
            return Ok(Vec::new());
        };

        let relationships = self
            .read(RelationshipFilter {
                resource_type: self.namespaced(&rbac_cfg.role_resource.name),
                resource_id: Some(role_id.to_string()),
                subject: Some(SubjectFilter {
                    subject_type: self.namespaced(subject_type),
                    subject_id: Some("*".to_string()),
                    relation: None,
                }),
                ..Default::default()
            })
            .await?;

        Ok(relationships
            .iter()
            .filter_map(|rel| rbac::relation_action(&rel.relation))
            .map(str::to_string)
            .collect())
    }

    /// Roles from the relation engine only, actions fetched concurrently per
    /// role. Every lookup runs to completion; the first failure is reported
    /// and the rest are logged.
    async fn list_engine_roles(&self, owner: &Resource) -> Result<Vec<Role>, QueryError> {
        let rbac_cfg = self.rbac()?;

        let relationships = self
            .read(RelationshipFilter {
                resource_type: self.namespaced(&rbac_cfg.role_resource.name),
                relation: Some(rbac::ROLE_OWNER_RELATION.to_string()),
                subject: Some(SubjectFilter {
                    subject_type: self.namespaced(&owner.resource_type),
                    subject_id: Some(owner.id.to_string()),
                    relation: None,
                }),
                ..Default::default()
            })
            .await?;

        let lookups = relationships.iter().map(|rel| {
            let raw_id = rel.resource.object_id.clone();
            async move {
                let id = PrefixedId::parse(&raw_id)?;
                let actions = self.list_role_actions(&id).await?;
                Ok::<Role, QueryError>(Role {
                    id,
                    name: String::new(),
                    actions,
                    resource_id: None,
                    created_by: None,
                    updated_by: None,
                    created_at: 0,
                    updated_at: 0,
                })
            }
        });

        let mut roles = Vec::with_capacity(relationships.len());
        let mut first_err = None;
        for result in join_all(lookups).await {
            match result {
                Ok(role) => roles.push(role),
                Err(err) if first_err.is_none() => first_err = Some(err),
                Err(err) => tracing::warn!(error = %err, "additional role action lookup failed"),
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }

        Ok(roles)
    }

    fn role_owner_relationship(
        &self,
        role_id: &PrefixedId,
        owner: &Resource,
    ) -> Result<RelationshipUpdate, QueryError> {
        let rbac_cfg = self.rbac()?;
        Ok(RelationshipUpdate::touch(Relationship {
            resource: ObjectRef::new(
                self.namespaced(&rbac_cfg.role_resource.name),
                role_id.as_str(),
            ),
            relation: rbac::ROLE_OWNER_RELATION.to_string(),
            subject: self.subject_ref(owner),
        }))
    }

    /// One wildcard tuple per action and subject type, e.g.
    /// `rolev2:r#loadbalancer_get_rel@user:*`.
    fn role_action_relationships(
        &self,
        role_id: &PrefixedId,
        actions: &[String],
    ) -> Result<Vec<RelationshipUpdate>, QueryError> {
        let rbac_cfg = self.rbac()?;
        let role_ref = ObjectRef::new(
            self.namespaced(&rbac_cfg.role_resource.name),
            role_id.as_str(),
        );

        let mut updates = Vec::with_capacity(actions.len() * rbac_cfg.role_subject_types.len());
        for action in actions {
            for subject_type in &rbac_cfg.role_subject_types {
                updates.push(RelationshipUpdate::touch(Relationship {
                    resource: role_ref.clone(),
                    relation: rbac::action_relation(action),
                    subject: SubjectRef::object(ObjectRef::new(
                        self.namespaced(subject_type),
                        "*",
                    )),
                }));
            }
        }
        Ok(updates)
    }

    pub(crate) fn check_role_type(&self, role: &Resource) -> Result<(), QueryError> {
        let rbac_cfg = self.rbac()?;
        if role.resource_type != rbac_cfg.role_resource.name {
            return Err(QueryError::InvalidType(format!(
                "{} is not a valid v2 role",
                role.resource_type
            )));
        }
        Ok(())
    }
}
