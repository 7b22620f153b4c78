mod helpers;

use helpers::test_engine;
use warden::query::QueryError;
use warden::storage::StorageError;

#[tokio::test]
async fn test_create_and_get_role_round_trip() {
    let t = test_engine().await;
    let actor = t.resource("idntusr");
    let tenant = t.resource("tnntten");
    let actions = vec![
        "loadbalancer_get".to_string(),
        "loadbalancer_create".to_string(),
    ];

    let role = t
        .engine
        .create_role_v2(&actor, &tenant, "  admin  ", &actions)
        .await
        .unwrap();
    assert!(!role.id.as_str().is_empty());
    assert_eq!(role.id.prefix(), "permrv2");
    assert_eq!(role.name, "admin");

    let role_resource = t.engine.new_resource_from_id(role.id.clone()).unwrap();
    let fetched = t.engine.get_role_v2(&role_resource).await.unwrap();
    assert_eq!(fetched.name, "admin");
    assert_eq!(fetched.resource_id, Some(tenant.id.clone()));
    assert_eq!(fetched.created_by, Some(actor.id.clone()));
    assert!(fetched.created_at > 0);

    // actions come back as a set
    let mut got = fetched.actions.clone();
    got.sort();
    let mut want = actions.clone();
    want.sort();
    assert_eq!(got, want);
}

#[tokio::test]
async fn test_list_roles_contains_created_roles() {
    let t = test_engine().await;
    let actor = t.resource("idntusr");
    let tenant = t.resource("tnntten");

    let admin = t
        .engine
        .create_role_v2(
            &actor,
            &tenant,
            "admin",
            &["loadbalancer_create".to_string()],
        )
        .await
        .unwrap();
    let viewer = t
        .engine
        .create_role_v2(&actor, &tenant, "viewer", &["loadbalancer_get".to_string()])
        .await
        .unwrap();

    let roles = t.engine.list_roles_v2(&tenant).await.unwrap();
    assert_eq!(roles.len(), 2);

    let listed_admin = roles.iter().find(|r| r.id == admin.id).unwrap();
    assert_eq!(listed_admin.name, "admin");
    assert_eq!(listed_admin.actions, vec!["loadbalancer_create"]);
    assert!(roles.iter().any(|r| r.id == viewer.id));

    // other owners see nothing
    let other = t.resource("tnntten");
    assert!(t.engine.list_roles_v2(&other).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_role_rejects_non_role_ids() {
    let t = test_engine().await;
    let tenant = t.resource("tnntten");

    let err = t.engine.get_role_v2(&tenant).await.unwrap_err();
    assert!(matches!(err, QueryError::InvalidType(_)));
}

#[tokio::test]
async fn test_duplicate_role_name_conflicts() {
    let t = test_engine().await;
    let actor = t.resource("idntusr");
    let tenant = t.resource("tnntten");

    t.engine
        .create_role_v2(&actor, &tenant, "admin", &["loadbalancer_get".to_string()])
        .await
        .unwrap();
    let err = t
        .engine
        .create_role_v2(&actor, &tenant, "admin", &["port_get".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueryError::Storage(StorageError::Conflict(_))
    ));

    // the conflicting attempt must not leave a partial role behind
    assert_eq!(t.engine.list_roles_v2(&tenant).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_role() {
    let t = test_engine().await;
    let actor = t.resource("idntusr");
    let tenant = t.resource("tnntten");

    let role = t
        .engine
        .create_role_v2(&actor, &tenant, "admin", &["loadbalancer_get".to_string()])
        .await
        .unwrap();
    let role_resource = t.engine.new_resource_from_id(role.id.clone()).unwrap();

    t.engine.delete_role_v2(&role_resource).await.unwrap();

    let err = t.engine.get_role_v2(&role_resource).await.unwrap_err();
    assert!(matches!(
        err,
        QueryError::Storage(StorageError::NotFound { .. })
    ));
    assert!(t.engine.list_roles_v2(&tenant).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_role_with_live_binding_is_refused() {
    let t = test_engine().await;
    let actor = t.resource("idntusr");
    let tenant = t.resource("tnntten");
    let user = t.resource("idntusr");

    let role = t
        .engine
        .create_role_v2(&actor, &tenant, "admin", &["loadbalancer_get".to_string()])
        .await
        .unwrap();
    let role_resource = t.engine.new_resource_from_id(role.id.clone()).unwrap();

    let binding = t
        .engine
        .create_role_binding(&actor, &tenant, &role_resource, &[t.subject(&user)])
        .await
        .unwrap();

    let err = t.engine.delete_role_v2(&role_resource).await.unwrap_err();
    assert!(matches!(err, QueryError::Precondition(_)));

    // once the binding is gone the role can be deleted
    let binding_resource = t.engine.new_resource_from_id(binding.id).unwrap();
    t.engine
        .delete_role_binding(&binding_resource)
        .await
        .unwrap();
    t.engine.delete_role_v2(&role_resource).await.unwrap();
}
