#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;

use warden::gid::PrefixedId;
use warden::iapl::{
    default_rbac, Action, ActionBinding, Condition, ConditionRelationshipAction,
    ConditionRoleBindingV2, Policy, PolicyDocument, Relationship, ResourceType,
    RoleBindingV2Config, TargetType,
};
use warden::query::Engine;
use warden::settings::Database;
use warden::spicedb::MemoryRelationEngine;
use warden::storage::Storage;
use warden::types::{Resource, RoleBindingSubject};

pub const NAMESPACE: &str = "foo";

/// A query engine wired to a throwaway sqlite database and the in-process
/// relation engine, with direct access to the latter for seeding tuples.
pub struct TestEngine {
    pub engine: Arc<Engine>,
    pub client: Arc<MemoryRelationEngine>,
    _temp: NamedTempFile,
}

impl TestEngine {
    /// A fresh typed resource under the given prefix.
    pub fn resource(&self, prefix: &str) -> Resource {
        self.engine
            .new_resource_from_id(PrefixedId::new(prefix).expect("valid prefix"))
            .expect("registered prefix")
    }

    pub fn subject(&self, resource: &Resource) -> RoleBindingSubject {
        RoleBindingSubject {
            subject_id: resource.id.clone(),
            subject_relation: None,
        }
    }
}

pub async fn test_engine() -> TestEngine {
    let temp = NamedTempFile::new().expect("temp file");
    let storage = Storage::init(&Database {
        url: format!("sqlite://{}?mode=rwc", temp.path().display()),
    })
    .await
    .expect("storage init");

    let client = Arc::new(MemoryRelationEngine::new());
    let engine = Engine::new(
        NAMESPACE.to_string(),
        test_policy(),
        client.clone(),
        storage,
        Duration::from_secs(5),
    );

    TestEngine {
        engine: Arc::new(engine),
        client,
        _temp: temp,
    }
}

/// Tenants own roles; load balancers take v2 bindings and inherit from their
/// owning tenant.
pub fn test_policy() -> Policy {
    let doc = PolicyDocument {
        rbac: Some(default_rbac()),
        resource_types: vec![
            ResourceType {
                name: "tenant".to_string(),
                id_prefix: "tnntten".to_string(),
                ..Default::default()
            },
            ResourceType {
                name: "user".to_string(),
                id_prefix: "idntusr".to_string(),
                ..Default::default()
            },
            ResourceType {
                name: "client".to_string(),
                id_prefix: "idntcli".to_string(),
                ..Default::default()
            },
            ResourceType {
                name: "loadbalancer".to_string(),
                id_prefix: "loadbal".to_string(),
                relationships: vec![Relationship {
                    relation: "owner".to_string(),
                    target_types: vec![TargetType {
                        name: "tenant".to_string(),
                        subject_relation: None,
                    }],
                }],
                role_binding_v2: Some(RoleBindingV2Config {
                    inherit_permissions_from: vec!["owner".to_string()],
                    inherit_all_actions: false,
                }),
            },
        ],
        actions: vec![
            Action {
                name: "loadbalancer_get".to_string(),
            },
            Action {
                name: "loadbalancer_create".to_string(),
            },
            Action {
                name: "port_get".to_string(),
            },
        ],
        action_bindings: vec![ActionBinding {
            action_name: "loadbalancer_get".to_string(),
            type_name: "loadbalancer".to_string(),
            conditions: vec![
                Condition {
                    relationship_action: Some(ConditionRelationshipAction {
                        relation: "owner".to_string(),
                        action_name: Some("loadbalancer_get".to_string()),
                    }),
                    role_binding: None,
                    role_binding_v2: None,
                },
                Condition {
                    relationship_action: None,
                    role_binding: None,
                    role_binding_v2: Some(ConditionRoleBindingV2 {}),
                },
            ],
        }],
        ..Default::default()
    };

    Policy::compile(doc).expect("test policy compiles")
}
