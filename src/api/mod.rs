//! HTTP surface: the v2 role and role-binding routes, the permission check
//! endpoint, and the error/cancellation translation around them.

pub mod errors;

pub use errors::ApiError;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use serde::{Deserialize, Serialize};

use crate::gid::PrefixedId;
use crate::query::Engine;
use crate::settings::Settings;
use crate::spicedb::ZedToken;
use crate::types::{Resource, Role, RoleBinding, RoleBindingSubject};

/// Header carrying the acting subject's id; authentication happens upstream.
pub const SUBJECT_HEADER: &str = "x-subject-id";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn router(engine: Arc<Engine>, request_timeout: Duration) -> Router {
    let state = AppState { engine };

    Router::new()
        .route(
            "/api/v2/resources/{id}/roles",
            post(create_role).get(list_roles),
        )
        .route("/api/v2/roles/{id}", get(get_role).delete(delete_role))
        .route(
            "/api/v2/resources/{id}/rolebindings",
            post(create_role_binding).get(list_role_bindings),
        )
        .route(
            "/api/v2/rolebindings/{id}",
            get(get_role_binding)
                .patch(update_role_binding)
                .delete(delete_role_binding),
        )
        .route("/api/v2/allow", post(check_allow))
        .route("/healthz", get(health))
        .layer(middleware::from_fn(move |request: Request, next: Next| {
            request_deadline(request_timeout, request, next)
        }))
        .with_state(state)
}

/// Cancellation guard: a request that outlives its deadline answers with the
/// uniform 422 cancellation response instead of hanging.
async fn request_deadline(timeout: Duration, request: Request, next: Next) -> Response {
    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError::Canceled.into_response(),
    }
}

pub async fn serve(settings: &Settings, engine: Arc<Engine>) -> miette::Result<()> {
    let app = router(
        engine,
        Duration::from_millis(settings.server.request_timeout_ms),
    );

    let addr: std::net::SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    tracing::info!(%addr, "permissions API listening");
    axum::serve(listener, app).await.into_diagnostic()?;

    Ok(())
}

// ---------- request/response types ----------

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleBindingRequest {
    pub role_id: PrefixedId,
    #[serde(default)]
    pub subjects: Vec<RoleBindingSubject>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRoleBindingRequest {
    #[serde(default)]
    pub add: Vec<RoleBindingSubject>,
    #[serde(default)]
    pub remove: Vec<RoleBindingSubject>,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub subject: PrefixedId,
    pub action: String,
    pub resource: PrefixedId,
    #[serde(default)]
    pub consistency_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency_token: Option<String>,
}

// ---------- handlers ----------

async fn create_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CreateRoleRequest>,
) -> Result<Json<Role>, ApiError> {
    let actor = actor_from_headers(&state, &headers)?;
    let owner = state.engine.new_resource_from_id(PrefixedId::parse(&id)?)?;
    let role = state
        .engine
        .create_role_v2(&actor, &owner, &request.name, &request.actions)
        .await?;
    Ok(Json(role))
}

async fn list_roles(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Role>>, ApiError> {
    let owner = state.engine.new_resource_from_id(PrefixedId::parse(&id)?)?;
    Ok(Json(state.engine.list_roles_v2(&owner).await?))
}

async fn get_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Role>, ApiError> {
    let role = state.engine.new_resource_from_id(PrefixedId::parse(&id)?)?;
    Ok(Json(state.engine.get_role_v2(&role).await?))
}

async fn delete_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let role = state.engine.new_resource_from_id(PrefixedId::parse(&id)?)?;
    state.engine.delete_role_v2(&role).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_role_binding(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CreateRoleBindingRequest>,
) -> Result<Json<RoleBinding>, ApiError> {
    let actor = actor_from_headers(&state, &headers)?;
    let resource = state.engine.new_resource_from_id(PrefixedId::parse(&id)?)?;
    let role = state.engine.new_resource_from_id(request.role_id)?;
    let binding = state
        .engine
        .create_role_binding(&actor, &resource, &role, &request.subjects)
        .await?;
    Ok(Json(binding))
}

async fn list_role_bindings(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<RoleBinding>>, ApiError> {
    let resource = state.engine.new_resource_from_id(PrefixedId::parse(&id)?)?;
    Ok(Json(state.engine.list_role_bindings(&resource, None).await?))
}

async fn get_role_binding(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RoleBinding>, ApiError> {
    let binding = state.engine.new_resource_from_id(PrefixedId::parse(&id)?)?;
    Ok(Json(state.engine.get_role_binding(&binding).await?))
}

async fn update_role_binding(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<UpdateRoleBindingRequest>,
) -> Result<Json<RoleBinding>, ApiError> {
    let actor = actor_from_headers(&state, &headers)?;
    let binding = state.engine.new_resource_from_id(PrefixedId::parse(&id)?)?;
    let binding = state
        .engine
        .assign_subjects(&actor, &binding, &request.add, &request.remove)
        .await?;
    Ok(Json(binding))
}

async fn delete_role_binding(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let binding = state.engine.new_resource_from_id(PrefixedId::parse(&id)?)?;
    state.engine.delete_role_binding(&binding).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn check_allow(
    State(state): State<AppState>,
    Json(request): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    let subject = state.engine.new_resource_from_id(request.subject)?;
    let resource = state.engine.new_resource_from_id(request.resource)?;
    let token = request.consistency_token.map(ZedToken);

    let check = state
        .engine
        .subject_has_permission(&subject, &request.action, &resource, token)
        .await?;

    Ok(Json(CheckResponse {
        allowed: check.allowed,
        consistency_token: check.zed_token.map(|t| t.0),
    }))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn actor_from_headers(state: &AppState, headers: &HeaderMap) -> Result<Resource, ApiError> {
    let value = headers
        .get(SUBJECT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::http(
                StatusCode::UNAUTHORIZED,
                format!("missing {SUBJECT_HEADER} header"),
            )
        })?;
    let id = PrefixedId::parse(value)?;
    Ok(state.engine.new_resource_from_id(id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use serde_json::Value;
    use tower::util::ServiceExt;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Routes exercising each error-translation path, wrapped in a 500 ms
    /// request deadline.
    fn test_router() -> Router {
        Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route(
                "/teapot",
                get(|| async {
                    Err::<&'static str, ApiError>(ApiError::http(
                        StatusCode::IM_A_TEAPOT,
                        "i'm a teapot",
                    ))
                }),
            )
            .route(
                "/other",
                get(|| async {
                    Err::<&'static str, ApiError>(ApiError::Internal(
                        "unexpected EOF".to_string(),
                    ))
                }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    "done"
                }),
            )
            .route(
                "/bad-gateway",
                get(|| async {
                    Err::<&'static str, ApiError>(ApiError::http(
                        StatusCode::BAD_GATEWAY,
                        "upstream failed",
                    ))
                }),
            )
            .layer(middleware::from_fn(|request: Request, next: Next| {
                request_deadline(Duration::from_millis(500), request, next)
            }))
    }

    async fn send(router: Router, path: &str) -> Response {
        router
            .oneshot(
                HttpRequest::builder()
                    .uri(path)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_passthrough_when_no_error() {
        let response = send(test_router(), "/ok").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_explicit_status_is_preserved() {
        let response = send(test_router(), "/teapot").await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);

        let body = body_json(response).await;
        assert_eq!(body["error"], "code=418, message=i'm a teapot");
        assert_eq!(body["message"], "i'm a teapot");
    }

    #[tokio::test]
    async fn test_other_errors_become_500() {
        let response = send(test_router(), "/other").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "unexpected EOF");
        assert_eq!(body["message"], "unexpected EOF");
    }

    #[tokio::test]
    async fn test_deadline_maps_to_422() {
        // the handler sleeps past the 500 ms request deadline
        let response = send(test_router(), "/slow").await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = body_json(response).await;
        assert_eq!(body, serde_json::json!({"error": "request canceled"}));
    }

    #[tokio::test]
    async fn test_explicit_5xx_passes_through_unchanged() {
        let response = send(test_router(), "/bad-gateway").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = body_json(response).await;
        assert_eq!(body["error"], "code=502, message=upstream failed");
        assert_eq!(body["message"], "upstream failed");
    }
}
