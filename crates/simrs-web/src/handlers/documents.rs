//! 文件夹与文档
//!
//! 上传使用原始请求体，元数据放在查询参数中，`Content-Type` 作为 MIME 类型。

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use simrs_core::{AccessRuleSpec, DocumentUpdate, Principal, RuleScope, SimrsError};
use simrs_storage::UploadDocument;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Deserialize)]
pub struct FolderQueryParams {
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct NewFolderRequest {
    pub name: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RenameFolderRequest {
    pub name: String,
}

pub async fn list_folders(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<FolderQueryParams>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:read").await?;
    let folders = state.documents.list_folders(params.parent_id).await?;
    Ok(Json(json!({
        "total": folders.len(),
        "folders": folders,
    })))
}

pub async fn create_folder(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<NewFolderRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:write").await?;
    let folder = state
        .documents
        .create_folder(&principal, &request.name, request.parent_id)
        .await?;
    Ok((StatusCode::CREATED, Json(folder)))
}

pub async fn get_folder(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:read").await?;
    Ok(Json(state.documents.get_folder(id).await?))
}

pub async fn rename_folder(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(request): Json<RenameFolderRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:write").await?;
    let folder = state
        .documents
        .rename_folder(&principal, id, &request.name)
        .await?;
    Ok(Json(folder))
}

pub async fn delete_folder(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:write").await?;
    state.documents.delete_folder(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn folder_rules(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:read").await?;
    let rules = state
        .documents
        .rules(&principal, RuleScope::Folder(id))
        .await?;
    Ok(Json(json!({ "rules": rules })))
}

pub async fn set_folder_rules(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(specs): Json<Vec<AccessRuleSpec>>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:write").await?;
    let rules = state
        .documents
        .set_rules(&principal, RuleScope::Folder(id), specs)
        .await?;
    Ok(Json(json!({ "rules": rules })))
}

#[derive(Debug, Deserialize)]
pub struct DocumentQueryParams {
    pub folder_id: Option<Uuid>,
}

/// 上传参数
#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub folder_id: Option<Uuid>,
    pub title: Option<String>,
    pub file_name: String,
    #[serde(default)]
    pub is_public: bool,
}

pub async fn list_documents(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<DocumentQueryParams>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:read").await?;
    let documents = state
        .documents
        .list_documents(&principal, params.folder_id)
        .await?;
    Ok(Json(json!({
        "total": documents.len(),
        "documents": documents,
    })))
}

pub async fn upload(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:write").await?;
    if body.is_empty() {
        return Err(SimrsError::Validation("document content is empty".to_string()).into());
    }

    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string();
    let title = params.title.unwrap_or_else(|| params.file_name.clone());

    let request = UploadDocument {
        folder_id: params.folder_id,
        title,
        file_name: params.file_name,
        mime_type,
        is_public: params.is_public,
    };
    let document = state.documents.upload(&principal, request, &body).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn get_document(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:read").await?;
    Ok(Json(state.documents.get(&principal, id).await?))
}

pub async fn download(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:read").await?;
    let (document, content) = state.documents.download(&principal, id).await?;

    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(&document.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MIME_TYPE));
    headers.insert(header::CONTENT_TYPE, content_type);
    let file_name = document.file_name.replace('"', "");
    if let Ok(disposition) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    Ok((headers, content))
}

pub async fn update_document(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(update): Json<DocumentUpdate>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:write").await?;
    Ok(Json(state.documents.update(&principal, id, update).await?))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:write").await?;
    state.documents.delete(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn document_rules(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:read").await?;
    let rules = state
        .documents
        .rules(&principal, RuleScope::Document(id))
        .await?;
    Ok(Json(json!({ "rules": rules })))
}

pub async fn set_document_rules(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(specs): Json<Vec<AccessRuleSpec>>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:write").await?;
    let rules = state
        .documents
        .set_rules(&principal, RuleScope::Document(id), specs)
        .await?;
    Ok(Json(json!({ "rules": rules })))
}

#[derive(Debug, Deserialize)]
pub struct LogQueryParams {
    pub limit: Option<i64>,
}

pub async fn access_logs(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Query(params): Query<LogQueryParams>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "documents:read").await?;
    let logs = state
        .documents
        .access_logs(&principal, id, params.limit)
        .await?;
    Ok(Json(json!({
        "total": logs.len(),
        "logs": logs,
    })))
}
