//! 授权、角色、用户与 Webhook 管理

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use simrs_core::{GrantSubject, NewUser, Principal, SimrsError, UserInfo, UserUpdate};
use simrs_integration::{WebhookManager, WebhookSubscriptionRequest};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GrantQueryParams {
    pub role: Option<String>,
    pub user_id: Option<Uuid>,
}

impl GrantQueryParams {
    fn subject(self) -> Option<GrantSubject> {
        match (self.role, self.user_id) {
            (Some(role), _) => Some(GrantSubject::Role(role)),
            (None, Some(id)) => Some(GrantSubject::User(id)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub subject: GrantSubject,
    pub feature: String,
}

pub async fn list_grants(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<GrantQueryParams>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "access:manage").await?;
    let subject = params.subject();
    let grants = state.access.list_grants(subject.as_ref()).await?;
    Ok(Json(json!({
        "total": grants.len(),
        "grants": grants,
    })))
}

pub async fn grant(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<GrantRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "access:manage").await?;
    let grant = state
        .access
        .grant(request.subject, request.feature.trim(), Some(principal.user_id))
        .await?;
    tracing::info!(feature = %grant.feature, by = %principal.username, "Feature granted");
    Ok((StatusCode::CREATED, Json(grant)))
}

pub async fn revoke(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<GrantRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "access:manage").await?;
    state
        .access
        .revoke(&request.subject, request.feature.trim())
        .await?;
    tracing::info!(feature = %request.feature, by = %principal.username, "Feature revoked");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn matrix(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "access:manage").await?;
    Ok(Json(state.access.matrix().await?))
}

#[derive(Debug, Deserialize)]
pub struct NewRoleRequest {
    pub name: String,
    pub description: Option<String>,
}

pub async fn list_roles(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "users:manage").await?;
    let roles = state.roles.list_roles().await?;
    Ok(Json(json!({
        "total": roles.len(),
        "roles": roles,
    })))
}

pub async fn create_role(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<NewRoleRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "users:manage").await?;
    let role = state
        .roles
        .create_role(&request.name, request.description)
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn delete_role(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "users:manage").await?;
    state.roles.delete_role(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UserQueryParams {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<UserQueryParams>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "users:manage").await?;
    let users: Vec<UserInfo> = state
        .users
        .list_users(params.include_inactive)
        .await?
        .iter()
        .map(UserInfo::from)
        .collect();
    Ok(Json(json!({
        "total": users.len(),
        "users": users,
    })))
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<NewUser>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "users:manage").await?;
    let user = state.users.create_user(request).await?;
    Ok((StatusCode::CREATED, Json(UserInfo::from(&user))))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "users:manage").await?;
    let user = state.users.get_user(id).await?;
    Ok(Json(UserInfo::from(&user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(update): Json<UserUpdate>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "users:manage").await?;
    let user = state.users.update_user(id, update).await?;
    Ok(Json(UserInfo::from(&user)))
}

/// 管理员重置密码，或用户修改自己的密码
pub async fn set_password(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(request): Json<PasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    if id != principal.user_id {
        state.access.require(&principal, "users:manage").await?;
    }
    state.users.set_password(id, &request.password).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn deactivate_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "users:manage").await?;
    if id == principal.user_id {
        return Err(SimrsError::Conflict("cannot deactivate your own account".to_string()).into());
    }
    let user = state.users.deactivate(id).await?;
    Ok(Json(UserInfo::from(&user)))
}

fn webhooks(state: &AppState) -> Result<Arc<WebhookManager>, SimrsError> {
    state
        .webhooks
        .clone()
        .ok_or_else(|| SimrsError::NotFound("webhooks are disabled".to_string()))
}

pub async fn list_webhooks(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "webhooks:manage").await?;
    let subscriptions = webhooks(&state)?.list_subscriptions().await;
    Ok(Json(json!({
        "total": subscriptions.len(),
        "webhooks": subscriptions,
    })))
}

pub async fn create_webhook(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<WebhookSubscriptionRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "webhooks:manage").await?;
    let subscription = webhooks(&state)?.subscribe(request).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn delete_webhook(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "webhooks:manage").await?;
    webhooks(&state)?.unsubscribe(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
