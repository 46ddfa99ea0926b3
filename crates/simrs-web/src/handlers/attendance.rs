//! 考勤与请假

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use simrs_core::{
    AttendanceFilter, GeoPoint, LeaveFilter, LeaveStatus, NewLeaveRequest, Principal, Result,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

/// 打卡请求
#[derive(Debug, Deserialize)]
pub struct PunchRequest {
    pub latitude: f64,
    pub longitude: f64,
    /// 已上传照片的存储键
    pub photo: Option<String>,
}

impl PunchRequest {
    fn location(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AttendanceQueryParams {
    pub user_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LeaveQueryParams {
    pub user_id: Option<Uuid>,
    pub status: Option<LeaveStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewRequest {
    pub note: Option<String>,
}

/// 查看他人记录需要 `attendance:read`，否则只能看自己的
async fn visible_user(
    state: &AppState,
    principal: &Principal,
    requested: Option<Uuid>,
) -> Result<Option<Uuid>> {
    match requested {
        Some(id) if id == principal.user_id => {
            state.access.require(principal, "attendance:self").await?;
            Ok(Some(id))
        }
        Some(id) => {
            state.access.require(principal, "attendance:read").await?;
            Ok(Some(id))
        }
        None => {
            if state.access.is_allowed(principal, "attendance:read").await? {
                Ok(None)
            } else {
                state.access.require(principal, "attendance:self").await?;
                Ok(Some(principal.user_id))
            }
        }
    }
}

pub async fn check_in(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<PunchRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "attendance:self").await?;
    let attendance = state
        .attendance
        .check_in(principal.user_id, request.location(), request.photo)
        .await?;
    Ok((StatusCode::CREATED, Json(attendance)))
}

pub async fn check_out(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<PunchRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "attendance:self").await?;
    let attendance = state
        .attendance
        .check_out(principal.user_id, request.location(), request.photo)
        .await?;
    Ok(Json(attendance))
}

pub async fn list_attendance(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<AttendanceQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let user_id = visible_user(&state, &principal, params.user_id).await?;
    let filter = AttendanceFilter {
        user_id,
        from: params.from,
        to: params.to,
        limit: params.limit,
    };
    let records = state.attendance.list_attendance(&filter).await?;
    Ok(Json(json!({
        "total": records.len(),
        "attendance": records,
    })))
}

pub async fn request_leave(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<NewLeaveRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "attendance:self").await?;
    let leave = state
        .attendance
        .request_leave(principal.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(leave)))
}

pub async fn list_leaves(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<LeaveQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let user_id = visible_user(&state, &principal, params.user_id).await?;
    let filter = LeaveFilter {
        user_id,
        status: params.status,
    };
    let leaves = state.attendance.list_leaves(&filter).await?;
    Ok(Json(json!({
        "total": leaves.len(),
        "leaves": leaves,
    })))
}

pub async fn get_leave(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let leave = state.attendance.get_leave(id).await?;
    visible_user(&state, &principal, Some(leave.user_id)).await?;
    Ok(Json(leave))
}

pub async fn approve_leave(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    body: Option<Json<ReviewRequest>>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "leaves:review").await?;
    let note = body.and_then(|Json(request)| request.note);
    let leave = state
        .attendance
        .approve(id, principal.user_id, note)
        .await?;
    Ok(Json(leave))
}

pub async fn reject_leave(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    body: Option<Json<ReviewRequest>>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "leaves:review").await?;
    let note = body.and_then(|Json(request)| request.note);
    let leave = state
        .attendance
        .reject(id, principal.user_id, note)
        .await?;
    Ok(Json(leave))
}

pub async fn cancel_leave(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "attendance:self").await?;
    Ok(Json(state.attendance.cancel(id, principal.user_id).await?))
}
