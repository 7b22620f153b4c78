mod helpers;

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::util::ServiceExt;

use helpers::test_engine;
use warden::api::{self, SUBJECT_HEADER};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, actor: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(actor) = actor {
        builder = builder.header(SUBJECT_HEADER, actor);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_role_crud_over_http() {
    let t = test_engine().await;
    let router = api::router(t.engine.clone(), Duration::from_secs(5));
    let actor = t.resource("idntusr");
    let tenant = t.resource("tnntten");

    // create
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v2/resources/{}/roles", tenant.id),
            Some(actor.id.as_str()),
            json!({"name": "admin", "actions": ["loadbalancer_get", "loadbalancer_create"]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let role = body_json(response).await;
    assert_eq!(role["name"], "admin");
    let role_id = role["id"].as_str().unwrap().to_string();
    assert!(role_id.starts_with("permrv2"));

    // read it back
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v2/roles/{role_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["name"], "admin");

    // list under the owner
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v2/resources/{}/roles", tenant.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    // delete
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v2/roles/{role_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_create_role_requires_subject_header() {
    let t = test_engine().await;
    let router = api::router(t.engine.clone(), Duration::from_secs(5));
    let tenant = t.resource("tnntten");

    let response = router
        .oneshot(json_request(
            "POST",
            &format!("/api/v2/resources/{}/roles", tenant.id),
            None,
            json!({"name": "admin", "actions": []}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_role_is_404() {
    let t = test_engine().await;
    let router = api::router(t.engine.clone(), Duration::from_secs(5));
    let missing = t.resource("permrv2");

    let response = router
        .oneshot(
            Request::builder()
                .uri(format!("/api/v2/roles/{}", missing.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_id_is_400() {
    let t = test_engine().await;
    let router = api::router(t.engine.clone(), Duration::from_secs(5));

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/v2/roles/short")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_allow_endpoint_reflects_bindings() {
    let t = test_engine().await;
    let router = api::router(t.engine.clone(), Duration::from_secs(5));
    let actor = t.resource("idntusr");
    let tenant = t.resource("tnntten");
    let user = t.resource("idntusr");

    // role + binding through the API
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v2/resources/{}/roles", tenant.id),
            Some(actor.id.as_str()),
            json!({"name": "viewer", "actions": ["loadbalancer_get"]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let role_id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v2/resources/{}/rolebindings", tenant.id),
            Some(actor.id.as_str()),
            json!({"role_id": role_id, "subjects": [{"subject_id": user.id.as_str()}]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v2/allow",
            None,
            json!({"subject": user.id.as_str(), "action": "loadbalancer_get", "resource": tenant.id.as_str()}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let decision = body_json(response).await;
    assert_eq!(decision["allowed"], true);

    // an action the role does not grant
    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v2/allow",
            None,
            json!({"subject": user.id.as_str(), "action": "port_get", "resource": tenant.id.as_str()}),
        ))
        .await
        .unwrap();
    let decision = body_json(response).await;
    assert_eq!(decision["allowed"], false);
}
