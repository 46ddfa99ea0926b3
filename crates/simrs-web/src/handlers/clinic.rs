//! 处方与病历

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use simrs_core::{NewPrescription, PrescriptionFilter, Principal};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list_prescriptions(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(filter): Query<PrescriptionFilter>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "prescriptions:read").await?;
    let prescriptions = state.prescriptions.list(&filter).await?;
    Ok(Json(json!({
        "total": prescriptions.len(),
        "prescriptions": prescriptions,
    })))
}

pub async fn create_prescription(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(mut request): Json<NewPrescription>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "prescriptions:create").await?;
    // 医生账号开方时默认记在本人名下
    if request.doctor_id.is_none() {
        request.doctor_id = principal.doctor_id;
    }
    let prescription = state.prescriptions.create(request).await?;
    Ok((StatusCode::CREATED, Json(prescription)))
}

pub async fn get_prescription(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "prescriptions:read").await?;
    Ok(Json(state.prescriptions.get(id).await?))
}

pub async fn dispense(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "prescriptions:dispense").await?;
    let prescription = state
        .prescriptions
        .dispense(id, Some(principal.user_id))
        .await?;
    Ok(Json(prescription))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "prescriptions:create").await?;
    Ok(Json(state.prescriptions.cancel(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct MedicalRecordQueryParams {
    pub patient_id: Uuid,
}

pub async fn medical_records(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<MedicalRecordQueryParams>,
) -> ApiResult<impl IntoResponse> {
    state.access.require(&principal, "medical_records:read").await?;
    let records = state.prescriptions.medical_records(params.patient_id).await?;
    Ok(Json(json!({
        "total": records.len(),
        "medical_records": records,
    })))
}
