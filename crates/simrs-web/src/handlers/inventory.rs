//! 库存与盘点

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use simrs_core::{ItemFilter, ItemUpdate, MovementFilter, NewItem, OpnameStatus, Principal};
use simrs_inventory::ReceiveStock;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list_items(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(filter): Query<ItemFilter>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "stock:read").await?;
    let items = state.stock.list_items(&filter).await?;
    Ok(Json(json!({
        "total": items.len(),
        "items": items,
    })))
}

pub async fn create_item(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<NewItem>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "stock:manage").await?;
    let item = state.stock.create_item(request).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn get_item(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "stock:read").await?;
    Ok(Json(state.stock.get_item(id).await?))
}

pub async fn update_item(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(update): Json<ItemUpdate>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "stock:manage").await?;
    Ok(Json(state.stock.update_item(id, update).await?))
}

pub async fn receive(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReceiveStock>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "stock:receive").await?;
    let movement = state
        .stock
        .receive(id, request, Some(principal.user_id))
        .await?;
    Ok((StatusCode::CREATED, Json(movement)))
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub delta: i64,
    pub reason: Option<String>,
}

pub async fn adjust(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(request): Json<AdjustRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "stock:adjust").await?;
    let movement = state
        .stock
        .adjust(id, request.delta, request.reason, Some(principal.user_id))
        .await?;
    Ok((StatusCode::CREATED, Json(movement)))
}

#[derive(Debug, Deserialize)]
pub struct CorrectRequest {
    pub actual: i64,
    pub reason: Option<String>,
}

/// 把结存校正为实际数量，无差异时 `movement` 为 null
pub async fn correct(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(request): Json<CorrectRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "stock:adjust").await?;
    let movement = state
        .stock
        .correct_to(id, request.actual, request.reason, Some(principal.user_id))
        .await?;
    let item = state.stock.get_item(id).await?;
    Ok(Json(json!({
        "item": item,
        "movement": movement,
    })))
}

#[derive(Debug, Deserialize)]
pub struct BatchQueryParams {
    #[serde(default)]
    pub include_exhausted: bool,
}

pub async fn batches(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Query(params): Query<BatchQueryParams>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "stock:read").await?;
    let batches = state.stock.batches(id, params.include_exhausted).await?;
    Ok(Json(json!({
        "total": batches.len(),
        "batches": batches,
    })))
}

pub async fn movements(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(filter): Query<MovementFilter>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "stock:read").await?;
    let movements = state.stock.movements(&filter).await?;
    Ok(Json(json!({
        "total": movements.len(),
        "movements": movements,
    })))
}

#[derive(Debug, Deserialize)]
pub struct NewOpnameRequest {
    pub title: String,
    pub notes: Option<String>,
    /// 为空时盘点全部在用物品
    pub item_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize)]
pub struct OpnameQueryParams {
    pub status: Option<OpnameStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CountRequest {
    pub item_id: Uuid,
    pub physical_quantity: i64,
    pub note: Option<String>,
}

pub async fn list_opnames(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<OpnameQueryParams>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "stock:read").await?;
    let opnames = state.opnames.list(params.status).await?;
    Ok(Json(json!({
        "total": opnames.len(),
        "opnames": opnames,
    })))
}

pub async fn create_opname(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<NewOpnameRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "opname:manage").await?;
    let opname = state
        .opnames
        .create(
            request.title,
            request.notes,
            request.item_ids,
            Some(principal.user_id),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(opname)))
}

pub async fn get_opname(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "stock:read").await?;
    Ok(Json(state.opnames.get(id).await?))
}

pub async fn start_opname(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "opname:manage").await?;
    Ok(Json(state.opnames.start(id).await?))
}

pub async fn record_count(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(request): Json<CountRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "opname:count").await?;
    let opname = state
        .opnames
        .record_count(
            id,
            request.item_id,
            request.physical_quantity,
            request.note,
            Some(principal.user_id),
        )
        .await?;
    Ok(Json(opname))
}

pub async fn complete_opname(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "opname:manage").await?;
    Ok(Json(state.opnames.complete(id, Some(principal.user_id)).await?))
}

pub async fn cancel_opname(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "opname:manage").await?;
    Ok(Json(state.opnames.cancel(id).await?))
}
