//! 排队叫号

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use simrs_core::{Principal, QueueFilter, QueueStatus, Result};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TakeNumberRequest {
    pub polyclinic_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
}

/// 号票查询参数，`status` 为逗号分隔的状态列表
#[derive(Debug, Deserialize)]
pub struct TicketQueryParams {
    pub polyclinic_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub status: Option<String>,
    pub patient_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TicketQueryParams {
    fn into_filter(self) -> Result<QueueFilter> {
        let statuses = match self.status.as_deref() {
            None => None,
            Some(raw) => {
                let parsed = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::parse::<QueueStatus>)
                    .collect::<Result<Vec<_>>>()?;
                (!parsed.is_empty()).then_some(parsed)
            }
        };
        Ok(QueueFilter {
            polyclinic_id: self.polyclinic_id,
            queue_date: self.date,
            statuses,
            patient_id: self.patient_id,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CallNextRequest {
    pub polyclinic_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct BoardQueryParams {
    pub date: Option<NaiveDate>,
}

pub async fn take_number(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<TakeNumberRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "queue:take").await?;
    let ticket = state
        .queue
        .take_number(request.polyclinic_id, request.patient_id, request.doctor_id)
        .await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<TicketQueryParams>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "queue:read").await?;
    let tickets = state.queue.list_tickets(params.into_filter()?).await?;
    Ok(Json(json!({
        "total": tickets.len(),
        "tickets": tickets,
    })))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "queue:read").await?;
    Ok(Json(state.queue.get_ticket(id).await?))
}

pub async fn call_ticket(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "queue:call").await?;
    Ok(Json(state.queue.call(id, Some(principal.user_id)).await?))
}

pub async fn call_next(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<CallNextRequest>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "queue:call").await?;
    let ticket = state
        .queue
        .call_next(request.polyclinic_id, Some(principal.user_id))
        .await?;
    Ok(Json(ticket))
}

pub async fn recall_ticket(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "queue:call").await?;
    Ok(Json(state.queue.recall(id, Some(principal.user_id)).await?))
}

pub async fn serve_ticket(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "queue:call").await?;
    Ok(Json(state.queue.serve(id, Some(principal.user_id)).await?))
}

pub async fn complete_ticket(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "queue:call").await?;
    Ok(Json(state.queue.complete(id, Some(principal.user_id)).await?))
}

pub async fn skip_ticket(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "queue:call").await?;
    Ok(Json(state.queue.skip(id, Some(principal.user_id)).await?))
}

/// 显示屏数据（无需登录）
pub async fn board(
    State(state): State<AppState>,
    Path(polyclinic_id): Path<Uuid>,
    Query(params): Query<BoardQueryParams>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.queue.board(polyclinic_id, params.date).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(status: Option<&str>) -> TicketQueryParams {
        TicketQueryParams {
            polyclinic_id: None,
            date: None,
            status: status.map(str::to_string),
            patient_id: None,
            limit: None,
            offset: None,
        }
    }

    #[test]
    fn test_status_list_is_parsed() {
        let filter = params(Some("waiting, called")).into_filter().unwrap();
        assert_eq!(
            filter.statuses,
            Some(vec![QueueStatus::Waiting, QueueStatus::Called])
        );
        assert!(params(Some(" , ")).into_filter().unwrap().statuses.is_none());
        assert!(params(None).into_filter().unwrap().statuses.is_none());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(params(Some("waiting,lost")).into_filter().is_err());
    }
}
