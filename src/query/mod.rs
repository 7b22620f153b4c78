//! The relation engine adapter: translates typed role and role-binding
//! operations into relation-engine calls, coordinating dual writes against
//! the relational store with a best-effort two-phase protocol.

pub mod bindings;
pub mod errors;
pub mod roles;

pub use errors::QueryError;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use sea_orm::DatabaseTransaction;

use crate::gid::PrefixedId;
use crate::iapl::{Policy, Rbac};
use crate::spicedb::{
    ObjectRef, RelationEngine, Relationship, RelationshipFilter, RelationshipUpdate, SubjectRef,
    ZedToken,
};
use crate::storage::Storage;
use crate::types::Resource;

/// Outcome of a permission check: the decision and the consistency bound it
/// was evaluated at.
#[derive(Debug, Clone)]
pub struct PermissionCheck {
    pub allowed: bool,
    pub zed_token: Option<ZedToken>,
}

/// Owns the relation-engine client and the storage handle. Safe to share
/// across requests; the only mutable state is the consistency-token cache.
pub struct Engine {
    namespace: String,
    policy: Policy,
    client: Arc<dyn RelationEngine>,
    store: Storage,
    zed_tokens: RwLock<HashMap<PrefixedId, ZedToken>>,
    call_timeout: Duration,
}

impl Engine {
    pub fn new(
        namespace: String,
        policy: Policy,
        client: Arc<dyn RelationEngine>,
        store: Storage,
        call_timeout: Duration,
    ) -> Self {
        Self {
            namespace,
            policy,
            client,
            store,
            zed_tokens: RwLock::new(HashMap::new()),
            call_timeout,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Resolve a prefixed id to a typed resource through the policy's prefix
    /// table.
    pub fn new_resource_from_id(&self, id: PrefixedId) -> Result<Resource, QueryError> {
        match self.policy.type_name_for_prefix(id.prefix()) {
            Some(name) => Ok(Resource {
                resource_type: name.to_string(),
                id,
            }),
            None => Err(QueryError::InvalidType(format!(
                "no resource type registered for prefix `{}`",
                id.prefix()
            ))),
        }
    }

    /// Direct permission check against the relation engine, bounded by the
    /// caller's token or the freshest one this process has seen for the
    /// resource.
    pub async fn subject_has_permission(
        &self,
        subject: &Resource,
        action: &str,
        resource: &Resource,
        consistency: Option<ZedToken>,
    ) -> Result<PermissionCheck, QueryError> {
        let token = consistency.or_else(|| self.consistency_token(&resource.id));
        let allowed = self
            .check(
                self.object_ref(resource),
                action,
                self.subject_ref(subject),
                token.clone(),
            )
            .await?;
        Ok(PermissionCheck {
            allowed,
            zed_token: token,
        })
    }

    /// The freshest consistency token observed for an entity, if any.
    pub fn consistency_token(&self, entity: &PrefixedId) -> Option<ZedToken> {
        self.zed_tokens
            .read()
            .ok()
            .and_then(|tokens| tokens.get(entity).cloned())
    }

    fn remember_token(&self, entity: &PrefixedId, token: &ZedToken) {
        match self.zed_tokens.write() {
            Ok(mut tokens) => {
                tokens.insert(entity.clone(), token.clone());
            }
            Err(err) => tracing::warn!(%entity, error = %err, "consistency token cache poisoned"),
        }
    }

    fn rbac(&self) -> Result<&Rbac, QueryError> {
        self.policy
            .rbac()
            .ok_or_else(|| QueryError::Internal("policy has no RBAC configuration".to_string()))
    }

    fn namespaced(&self, name: &str) -> String {
        format!("{}/{}", self.namespace, name)
    }

    fn object_ref(&self, resource: &Resource) -> ObjectRef {
        ObjectRef::new(
            self.namespaced(&resource.resource_type),
            resource.id.as_str(),
        )
    }

    fn subject_ref(&self, resource: &Resource) -> SubjectRef {
        SubjectRef::object(self.object_ref(resource))
    }

    // Every relation-engine call runs under the per-call deadline; an elapsed
    // deadline surfaces as the cancellation error.

    async fn write(&self, updates: Vec<RelationshipUpdate>) -> Result<ZedToken, QueryError> {
        tokio::time::timeout(self.call_timeout, self.client.write_relationships(updates))
            .await
            .map_err(|_| QueryError::Canceled)?
            .map_err(Into::into)
    }

    async fn read(&self, filter: RelationshipFilter) -> Result<Vec<Relationship>, QueryError> {
        tokio::time::timeout(self.call_timeout, self.client.read_relationships(filter))
            .await
            .map_err(|_| QueryError::Canceled)?
            .map_err(Into::into)
    }

    async fn check(
        &self,
        resource: ObjectRef,
        permission: &str,
        subject: SubjectRef,
        consistency: Option<ZedToken>,
    ) -> Result<bool, QueryError> {
        tokio::time::timeout(
            self.call_timeout,
            self.client
                .check_permission(resource, permission, subject, consistency),
        )
        .await
        .map_err(|_| QueryError::Canceled)?
        .map_err(Into::into)
    }

    /// Rollback failures are logged and never override the original error.
    async fn rollback_logged(txn: DatabaseTransaction) {
        if let Err(err) = txn.rollback().await {
            tracing::warn!(error = %err, "storage rollback failed");
        }
    }
}
